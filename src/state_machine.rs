//! Conversation state and routing
//!
//! Nodes produce `StatePatch` values; the driver merges them and asks the
//! pure routers in `transition` for the next step.

pub mod patch;
pub mod state;
pub mod transition;

#[cfg(test)]
mod proptests;

pub use patch::{StatePatch, TicketUpdate};
pub use state::{ConversationState, Intent, Message, ToolCallRecord, ToolRequest};
pub use transition::{next_step, Step, TransitionError, TurnBudget};
