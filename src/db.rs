//! Database module
//!
//! Persists one `ConversationState` per thread. Messages and tool-call
//! records are stored as numbered rows and only ever appended.

mod schema;

pub use schema::*;

use crate::state_machine::{ConversationState, Intent, Message, ToolCallRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt row data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database lock poisoned")]
    LockPoisoned,
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Refusing to rewrite history of {thread_id}: {stored} {what} stored, {offered} offered")]
    HistoryRewrite {
        thread_id: String,
        what: &'static str,
        stored: usize,
        offered: usize,
    },
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== Thread Operations ====================

    /// Load a thread; `None` when it has never been saved
    pub fn load_thread(&self, thread_id: &str) -> DbResult<Option<ThreadRecord>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                "SELECT customer_id, current_ticket_id, context, intent, confidence,
                        should_escalate, created_at, updated_at
                 FROM threads WHERE thread_id = ?1",
                params![thread_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            customer_id,
            current_ticket_id,
            context,
            intent,
            confidence,
            should_escalate,
            created_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        let state = ConversationState {
            messages: Self::load_messages(&conn, thread_id)?,
            customer_id,
            current_ticket_id,
            tool_call_log: Self::load_tool_calls(&conn, thread_id)?,
            context: serde_json::from_str(&context)?,
            intent: intent.as_deref().and_then(Intent::parse),
            confidence,
            should_escalate,
        };

        Ok(Some(ThreadRecord {
            thread_id: thread_id.to_string(),
            state,
            created_at: parse_datetime(&created_at),
            updated_at: parse_datetime(&updated_at),
        }))
    }

    fn load_messages(conn: &Connection, thread_id: &str) -> DbResult<Vec<Message>> {
        let mut stmt = conn.prepare(
            "SELECT content FROM messages WHERE thread_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![thread_id], |row| row.get::<_, String>(0))?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(serde_json::from_str(&row?)?);
        }
        Ok(messages)
    }

    fn load_tool_calls(conn: &Connection, thread_id: &str) -> DbResult<Vec<ToolCallRecord>> {
        let mut stmt = conn.prepare(
            "SELECT request_id, tool_name, arguments FROM tool_calls
             WHERE thread_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![thread_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (request_id, tool_name, arguments) = row?;
            records.push(ToolCallRecord {
                tool_name,
                arguments: serde_json::from_str(&arguments)?,
                request_id,
            });
        }
        Ok(records)
    }

    /// Persist a thread's state.
    ///
    /// Scalars are overwritten; messages and tool-call records beyond what is
    /// already stored are appended. A state whose history does not extend the
    /// stored one is rejected.
    pub fn save_thread(&self, thread_id: &str, state: &ConversationState) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO threads (thread_id, customer_id, current_ticket_id, context, intent,
                                  confidence, should_escalate, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(thread_id) DO UPDATE SET
                customer_id = excluded.customer_id,
                current_ticket_id = excluded.current_ticket_id,
                context = excluded.context,
                intent = excluded.intent,
                confidence = excluded.confidence,
                should_escalate = excluded.should_escalate,
                updated_at = excluded.updated_at",
            params![
                thread_id,
                state.customer_id,
                state.current_ticket_id,
                serde_json::to_string(&state.context)?,
                state.intent.map(Intent::as_str),
                state.confidence,
                state.should_escalate,
                now,
            ],
        )?;

        Self::append_messages(&tx, thread_id, &state.messages, &now)?;
        Self::append_tool_calls(&tx, thread_id, &state.tool_call_log, &now)?;

        tx.commit()?;
        Ok(())
    }

    fn stored_column(
        tx: &Transaction<'_>,
        table: &str,
        column: &str,
        thread_id: &str,
    ) -> DbResult<Vec<String>> {
        let mut stmt = tx.prepare(&format!(
            "SELECT {column} FROM {table} WHERE thread_id = ?1 ORDER BY sequence_id"
        ))?;
        let rows = stmt
            .query_map(params![thread_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// Append the messages past the stored rows. The stored rows must be an
    /// unchanged prefix of `messages`.
    fn append_messages(
        tx: &Transaction<'_>,
        thread_id: &str,
        messages: &[Message],
        now: &str,
    ) -> DbResult<()> {
        let stored = Self::stored_column(tx, "messages", "content", thread_id)?;
        let mut is_prefix = stored.len() <= messages.len();
        for (row, offered) in stored.iter().zip(messages) {
            if serde_json::from_str::<Message>(row)? != *offered {
                is_prefix = false;
                break;
            }
        }
        if !is_prefix {
            return Err(DbError::HistoryRewrite {
                thread_id: thread_id.to_string(),
                what: "messages",
                stored: stored.len(),
                offered: messages.len(),
            });
        }

        let mut stmt = tx.prepare(
            "INSERT INTO messages (thread_id, sequence_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (seq, message) in messages.iter().enumerate().skip(stored.len()) {
            stmt.execute(params![
                thread_id,
                i64::try_from(seq).unwrap_or(i64::MAX),
                message.role(),
                serde_json::to_string(message)?,
                now,
            ])?;
        }
        Ok(())
    }

    fn append_tool_calls(
        tx: &Transaction<'_>,
        thread_id: &str,
        records: &[ToolCallRecord],
        now: &str,
    ) -> DbResult<()> {
        let stored = Self::stored_column(tx, "tool_calls", "request_id", thread_id)?;
        let is_prefix = stored.len() <= records.len()
            && stored
                .iter()
                .zip(records)
                .all(|(request_id, record)| *request_id == record.request_id);
        if !is_prefix {
            return Err(DbError::HistoryRewrite {
                thread_id: thread_id.to_string(),
                what: "tool calls",
                stored: stored.len(),
                offered: records.len(),
            });
        }

        let mut stmt = tx.prepare(
            "INSERT INTO tool_calls (thread_id, sequence_id, request_id, tool_name, arguments, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (seq, record) in records.iter().enumerate().skip(stored.len()) {
            stmt.execute(params![
                thread_id,
                i64::try_from(seq).unwrap_or(i64::MAX),
                record.request_id,
                record.tool_name,
                serde_json::to_string(&record.arguments)?,
                now,
            ])?;
        }
        Ok(())
    }

    /// Overwrite the escalation flag (administrative action)
    pub fn set_escalation(&self, thread_id: &str, should_escalate: bool) -> DbResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE threads SET should_escalate = ?1, updated_at = ?2 WHERE thread_id = ?3",
            params![should_escalate, Utc::now().to_rfc3339(), thread_id],
        )?;
        if updated == 0 {
            return Err(DbError::ThreadNotFound(thread_id.to_string()));
        }
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
