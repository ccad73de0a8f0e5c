// src/models/operation.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a buffered mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// A mutation awaiting delivery to the persistent store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub kind: OperationKind,

    /// Target collection (table) name.
    pub target: String,

    /// Opaque record, interpreted by the store.
    pub payload: serde_json::Value,

    pub enqueued_at: DateTime<Utc>,

    /// Failed delivery attempts so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueuedOperation {
    pub fn new(
        kind: OperationKind,
        target: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: target.into(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries,
        }
    }

    /// Records a failed delivery. Returns `true` while the operation still
    /// has budget for another pass.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.retry_count < self.max_retries
    }
}

/// Response body for a mutation that was buffered instead of applied.
#[derive(Debug, Serialize)]
pub struct QueuedMutation {
    pub queued: bool,
    pub operation_id: Uuid,
    /// Id of the record the mutation targets.
    pub id: Uuid,
}
