//! Database schema and row types

use crate::state_machine::ConversationState;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS threads (
    thread_id TEXT PRIMARY KEY,
    customer_id TEXT,
    current_ticket_id TEXT,
    context TEXT NOT NULL DEFAULT '{}',
    intent TEXT,
    confidence REAL NOT NULL DEFAULT 0.5,
    should_escalate BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_updated ON threads(updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    thread_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (thread_id, sequence_id),
    FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS tool_calls (
    thread_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    request_id TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    arguments TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (thread_id, sequence_id),
    FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tool_calls_name ON tool_calls(tool_name);
";

/// A persisted thread with its bookkeeping timestamps
#[derive(Debug, Clone, Serialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
