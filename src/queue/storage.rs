// src/queue/storage.rs

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::QueueError;
use crate::{
    config::{DEAD_LETTER_STORAGE_KEY, QUEUE_STORAGE_KEY},
    models::operation::QueuedOperation,
};

/// The blobs a queue keeps: operations awaiting delivery, and those that
/// exhausted their retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSlot {
    Pending,
    DeadLetters,
}

impl QueueSlot {
    pub fn key(self) -> &'static str {
        match self {
            QueueSlot::Pending => QUEUE_STORAGE_KEY,
            QueueSlot::DeadLetters => DEAD_LETTER_STORAGE_KEY,
        }
    }
}

/// Durable home of the queue. Each slot is written as one blob on every
/// change.
#[async_trait]
pub trait QueueStorage: Send + Sync {
    async fn load(&self, slot: QueueSlot) -> Result<Vec<QueuedOperation>, QueueError>;
    async fn save(&self, slot: QueueSlot, ops: &[QueuedOperation]) -> Result<(), QueueError>;
}

/// Stores each slot as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileQueueStorage {
    dir: PathBuf,
}

impl FileQueueStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, slot: QueueSlot) -> PathBuf {
        self.dir.join(format!("{}.json", slot.key()))
    }
}

#[async_trait]
impl QueueStorage for FileQueueStorage {
    async fn load(&self, slot: QueueSlot) -> Result<Vec<QueuedOperation>, QueueError> {
        match tokio::fs::read(self.path(slot)).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, slot: QueueSlot, ops: &[QueuedOperation]) -> Result<(), QueueError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write then rename so a crash never leaves a half-written blob.
        let path = self.path(slot);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(ops)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryQueueStorage {
    pending: Mutex<Vec<QueuedOperation>>,
    dead_letters: Mutex<Vec<QueuedOperation>>,
}

impl MemoryQueueStorage {
    pub fn with_operations(ops: Vec<QueuedOperation>) -> Self {
        Self {
            pending: Mutex::new(ops),
            ..Default::default()
        }
    }

    pub fn with_dead_letters(mut self, ops: Vec<QueuedOperation>) -> Self {
        self.dead_letters = Mutex::new(ops);
        self
    }

    /// Persisted pending operations.
    pub async fn snapshot(&self) -> Vec<QueuedOperation> {
        self.pending.lock().await.clone()
    }

    pub async fn dead_letter_snapshot(&self) -> Vec<QueuedOperation> {
        self.dead_letters.lock().await.clone()
    }

    fn slot(&self, slot: QueueSlot) -> &Mutex<Vec<QueuedOperation>> {
        match slot {
            QueueSlot::Pending => &self.pending,
            QueueSlot::DeadLetters => &self.dead_letters,
        }
    }
}

#[async_trait]
impl QueueStorage for MemoryQueueStorage {
    async fn load(&self, slot: QueueSlot) -> Result<Vec<QueuedOperation>, QueueError> {
        Ok(self.slot(slot).lock().await.clone())
    }

    async fn save(&self, slot: QueueSlot, ops: &[QueuedOperation]) -> Result<(), QueueError> {
        *self.slot(slot).lock().await = ops.to_vec();
        Ok(())
    }
}
