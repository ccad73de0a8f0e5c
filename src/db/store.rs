// src/db/store.rs

use async_trait::async_trait;
use sqlx::PgPool;

use super::simulation_history::{self, AttemptKey, AttemptPatch};
use crate::{
    models::{
        attempt::AttemptRecord,
        operation::{OperationKind, QueuedOperation},
    },
    queue::{MutationStore, StoreError},
};

/// Replays queued operations against Postgres.
#[derive(Clone)]
pub struct PgMutationStore {
    pool: PgPool,
}

impl PgMutationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_simulation_history(&self, op: &QueuedOperation) -> Result<(), StoreError> {
        match op.kind {
            OperationKind::Create => {
                let record: AttemptRecord = serde_json::from_value(op.payload.clone())?;
                if simulation_history::insert_attempt(&self.pool, &record)
                    .await?
                    .is_none()
                {
                    tracing::debug!(record_id = %record.id, "Attempt already stored, skipping insert");
                }
            }
            OperationKind::Update => {
                let AttemptPatch { id, user_id, patch } =
                    serde_json::from_value(op.payload.clone())?;
                simulation_history::update_attempt(&self.pool, user_id, id, &patch)
                    .await?
                    .ok_or(StoreError::NotFound(id))?;
            }
            OperationKind::Delete => {
                let key: AttemptKey = serde_json::from_value(op.payload.clone())?;
                // Deleting an already missing row is the desired end state.
                if !simulation_history::delete_attempt(&self.pool, key.user_id, key.id).await? {
                    tracing::debug!(record_id = %key.id, "Attempt already deleted");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MutationStore for PgMutationStore {
    async fn apply(&self, op: &QueuedOperation) -> Result<(), StoreError> {
        match op.target.as_str() {
            simulation_history::COLLECTION => self.apply_simulation_history(op).await,
            other => Err(StoreError::UnknownCollection(other.to_string())),
        }
    }
}
