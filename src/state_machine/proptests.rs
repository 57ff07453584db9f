//! Property-based tests for state merging and routing
//!
//! Histories are generated as sequences of well-formed rounds so that every
//! tool result references an earlier request in the same thread.

use super::patch::StatePatch;
use super::state::*;
use super::transition::*;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_request() -> impl Strategy<Value = ToolRequest> {
    (
        prop_oneof![
            Just("get_order_status_tool"),
            Just("lookup_customer_tool"),
            Just("create_ticket_tool"),
            Just("search_knowledge_base_tool"),
        ],
        "[a-z0-9]{8}",
        "[A-Z]{3}-[0-9]{3}",
    )
        .prop_map(|(name, id, arg)| ToolRequest::new(name, json!({ "order_number": arg }), id))
}

/// One exchange: a human message, optionally a tool round, and an answer
fn arb_round() -> impl Strategy<Value = Vec<Message>> {
    (
        "[a-zA-Z ?]{1,30}",
        proptest::collection::vec(arb_tool_request(), 0..3),
        "[a-zA-Z .]{1,40}",
    )
        .prop_map(|(question, requests, answer)| {
            let mut round = vec![Message::human(question)];
            if !requests.is_empty() {
                round.push(Message::assistant_with_tools("", requests.clone()));
                round.extend(
                    requests
                        .iter()
                        .map(|r| Message::tool_result(r, "ok", false)),
                );
            }
            round.push(Message::assistant(answer));
            round
        })
}

fn arb_history() -> impl Strategy<Value = Vec<Message>> {
    proptest::collection::vec(arb_round(), 0..5).prop_map(|rounds| {
        let mut messages = vec![Message::system("support")];
        messages.extend(rounds.into_iter().flatten());
        messages
    })
}

/// History with no tool request anywhere
fn arb_tool_free_history() -> impl Strategy<Value = Vec<Message>> {
    proptest::collection::vec(("[a-zA-Z ?]{1,30}", "[a-zA-Z .]{1,40}"), 0..5).prop_map(|pairs| {
        let mut messages = vec![Message::system("support")];
        for (q, a) in pairs {
            messages.push(Message::human(q));
            messages.push(Message::assistant(a));
        }
        messages
    })
}

fn arb_patch() -> impl Strategy<Value = StatePatch> {
    (
        proptest::collection::vec("[a-z ]{0,20}", 0..3),
        proptest::option::of(0.0f64..=1.0),
        any::<bool>(),
        proptest::option::of("[0-9]{1,4}"),
    )
        .prop_map(|(texts, confidence, escalate, customer)| StatePatch {
            messages: texts.into_iter().map(Message::assistant).collect(),
            confidence,
            escalate,
            customer_id: customer,
            ..Default::default()
        })
}

fn state_with(messages: Vec<Message>, confidence: f64) -> ConversationState {
    ConversationState {
        messages,
        confidence,
        ..Default::default()
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Applying patches never removes or reorders earlier messages
    #[test]
    fn prop_messages_only_grow(
        history in arb_history(),
        patches in proptest::collection::vec(arb_patch(), 0..10),
    ) {
        let mut state = state_with(history, DEFAULT_CONFIDENCE);
        for patch in patches {
            let before = state.messages.clone();
            state.apply(patch);
            prop_assert!(state.messages.len() >= before.len());
            prop_assert_eq!(&state.messages[..before.len()], &before[..]);
        }
    }

    // Once set, the escalation flag and customer id survive any later patch
    #[test]
    fn prop_sticky_fields(patches in proptest::collection::vec(arb_patch(), 1..10)) {
        let mut state = ConversationState::default();
        let mut escalated = false;
        let mut customer: Option<String> = None;
        for patch in patches {
            escalated |= patch.escalate;
            if customer.is_none() {
                customer.clone_from(&patch.customer_id);
            }
            state.apply(patch);
            prop_assert_eq!(state.should_escalate, escalated);
            prop_assert_eq!(&state.customer_id, &customer);
            prop_assert!((0.0..=1.0).contains(&state.confidence));
        }
    }

    // Classifier output always lands on one of the six labels
    #[test]
    fn prop_classification_total(reply in ".{0,40}") {
        let (intent, confidence) = interpret_classification(&reply);
        prop_assert!(Intent::ALL.contains(&intent));
        match Intent::parse(&reply) {
            Some(parsed) => {
                prop_assert_eq!(parsed, intent);
                prop_assert!((confidence - CLASSIFIED_CONFIDENCE).abs() < f64::EPSILON);
            }
            None => {
                prop_assert_eq!(intent, Intent::General);
                prop_assert!((confidence - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
            }
        }
    }

    // A reply carrying tool requests never ends the turn
    #[test]
    fn prop_tool_requests_never_end(
        history in arb_history(),
        requests in proptest::collection::vec(arb_tool_request(), 1..4),
        confidence in 0.0f64..=1.0,
        escalate in any::<bool>(),
    ) {
        let mut messages = history;
        messages.push(Message::assistant_with_tools("", requests));
        let mut state = state_with(messages, confidence);
        state.should_escalate = escalate;
        prop_assert_ne!(route_after_call_tools(&state), Route::End);
        prop_assert_ne!(route_after_synthesis(&state), Route::End);
    }

    // Without any tool use in the thread, a direct answer ends the turn
    #[test]
    fn prop_direct_answer_without_tools_ends(
        history in arb_tool_free_history(),
        answer in "[a-zA-Z .]{1,40}",
        confidence in ESCALATION_THRESHOLD..=1.0,
    ) {
        let mut messages = history;
        messages.push(Message::human("hello"));
        messages.push(Message::assistant(answer));
        let state = state_with(messages, confidence);
        prop_assert_eq!(route_after_call_tools(&state), Route::End);
    }

    // Low confidence after synthesis escalates unless tools are pending
    #[test]
    fn prop_low_confidence_after_synthesis_escalates(
        history in arb_history(),
        answer in "[a-zA-Z .]{0,40}",
        confidence in 0.0f64..0.3,
    ) {
        let mut messages = history;
        messages.push(Message::assistant(answer));
        let state = state_with(messages, confidence);
        prop_assert_eq!(route_after_synthesis(&state), Route::Escalate);
    }

    // The escalation flag wins over every other signal
    #[test]
    fn prop_escalation_flag_wins(history in arb_history(), confidence in 0.0f64..=1.0) {
        let mut state = state_with(history, confidence);
        state.should_escalate = true;
        prop_assert_eq!(route_after_call_tools(&state), Route::Escalate);
        prop_assert_eq!(route_after_synthesis(&state), Route::Escalate);
    }

    // Uncertainty never raises confidence and caps it at 0.4
    #[test]
    fn prop_synthesized_confidence_bounded(
        prefix in "[a-z ]{0,10}",
        suffix in "[a-z ]{0,10}",
        incoming in 0.0f64..=1.0,
    ) {
        let uncertain = format!("{prefix}I'm not sure{suffix}");
        let c = synthesized_confidence(&uncertain, incoming);
        prop_assert!(c <= UNCERTAIN_CONFIDENCE_CAP);
        prop_assert!(c <= incoming);
    }

    // A model that keeps requesting tools is cut off at the budget
    #[test]
    fn prop_budget_bounds_dispatch(
        history in arb_history(),
        request in arb_tool_request(),
        max_rounds in 0u32..4,
    ) {
        let mut messages = history;
        messages.push(Message::assistant_with_tools("", vec![request]));
        let state = state_with(messages, DEFAULT_CONFIDENCE);
        let mut budget = TurnBudget::new(max_rounds);
        let mut step = Step::CallTools;
        let mut hops = 0;
        while !step.is_terminal() && hops < 50 {
            step = next_step(step, &state, &budget).unwrap();
            if step == Step::DispatchTools {
                budget.tool_rounds += 1;
            }
            hops += 1;
        }
        prop_assert_eq!(step, Step::Escalate);
        prop_assert_eq!(budget.tool_rounds, max_rounds);
    }
}
