//! Prompt data model — queue entries, completion records, status events.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One opaque executable unit submitted for processing.
///
/// The payload's internal structure (node graph, parameters) is owned by the
/// execution engine; the queue and worker only need the id and, for outbound
/// addressing, the submitting client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptJob {
    pub id: Uuid,
    pub payload: serde_json::Value,
    /// Client that submitted this prompt (for result notifications).
    pub client_id: Option<String>,
}

impl PromptJob {
    pub fn new(payload: serde_json::Value, client_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            client_id,
        }
    }
}

/// A pending queue entry. Ordered by `number` — lower runs first; default
/// numbers come from a monotonically increasing counter, so arrival order is
/// FIFO unless the caller asked to jump the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedPrompt {
    pub number: i64,
    pub job: PromptJob,
    #[serde(skip)]
    pub enqueued_at: Instant,
}

impl PartialEq for QueuedPrompt {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for QueuedPrompt {}

impl PartialOrd for QueuedPrompt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPrompt {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.number.cmp(&other.number)
    }
}

/// Terminal status of one executed prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
    /// Cancelled cooperatively mid-execution.
    Interrupted,
}

/// One diagnostic event produced during execution (ordered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub event: String,
    pub data: serde_json::Value,
}

impl StatusMessage {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Outcome summary recorded with a completed prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub status: Status,
    pub completed: bool,
    pub messages: Vec<StatusMessage>,
}

impl ExecutionStatus {
    pub fn success(messages: Vec<StatusMessage>) -> Self {
        Self {
            status: Status::Success,
            completed: true,
            messages,
        }
    }

    pub fn error(messages: Vec<StatusMessage>) -> Self {
        Self {
            status: Status::Error,
            completed: false,
            messages,
        }
    }

    pub fn interrupted(messages: Vec<StatusMessage>) -> Self {
        Self {
            status: Status::Interrupted,
            completed: false,
            messages,
        }
    }
}

/// Terminal record for one prompt, created exactly once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: Uuid,
    pub outputs: serde_json::Value,
    pub status: ExecutionStatus,
    pub completed_at: DateTime<Utc>,
}
