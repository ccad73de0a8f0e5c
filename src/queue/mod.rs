// src/queue/mod.rs

//! Offline mutation queue.
//!
//! Buffers CREATE/UPDATE/DELETE operations while the persistent store is
//! unreachable, persists them after every change, and replays them in FIFO
//! order once connectivity returns. Each operation gets a bounded number of
//! delivery attempts; exhausted operations move to a persisted, capped
//! dead-letter list and a [`QueueEvent::Dropped`] is broadcast.

pub mod connectivity;
pub mod storage;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::{
    config::MAX_DEAD_LETTERS,
    models::operation::{OperationKind, QueuedOperation},
};

pub use storage::{FileQueueStorage, MemoryQueueStorage, QueueSlot, QueueStorage};

const EVENT_CAPACITY: usize = 64;

/// Applies a queued operation to the persistent store.
#[async_trait]
pub trait MutationStore: Send + Sync {
    async fn apply(&self, op: &QueuedOperation) -> Result<(), StoreError>;
}

/// Store-side failures. Every variant counts as a failed delivery.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Record {0} not found")]
    NotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivery notifications for optional subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Delivered { id: Uuid },
    Retrying { id: Uuid, retry_count: u32 },
    Dropped { id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub is_processing: bool,
    pub is_online: bool,
    pub dead_letter_count: usize,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<QueuedOperation>,
    dead_letters: Vec<QueuedOperation>,
    /// Bumped by `clear_queue` so an in-flight pass does not resurrect
    /// operations that were discarded while it ran.
    generation: u64,
}

/// Clears the processing flag when a pass ends, panics included.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drops the oldest entries beyond [`MAX_DEAD_LETTERS`].
fn trim_dead_letters(dead_letters: &mut Vec<QueuedOperation>) {
    if dead_letters.len() > MAX_DEAD_LETTERS {
        let excess = dead_letters.len() - MAX_DEAD_LETTERS;
        tracing::warn!("Discarding {} oldest dead letter(s)", excess);
        dead_letters.drain(..excess);
    }
}

pub struct OfflineQueue {
    state: Mutex<QueueState>,
    store: Arc<dyn MutationStore>,
    storage: Arc<dyn QueueStorage>,
    max_retries: u32,
    is_processing: AtomicBool,
    is_online: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
}

impl OfflineQueue {
    /// Creates an empty queue that considers the store reachable.
    pub fn new(
        store: Arc<dyn MutationStore>,
        storage: Arc<dyn QueueStorage>,
        max_retries: u32,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(QueueState::default()),
            store,
            storage,
            max_retries: max_retries.max(1),
            is_processing: AtomicBool::new(false),
            is_online: AtomicBool::new(true),
            events,
        }
    }

    /// Creates a queue holding whatever `storage` persisted earlier.
    /// Does not start processing.
    pub async fn restore(
        store: Arc<dyn MutationStore>,
        storage: Arc<dyn QueueStorage>,
        max_retries: u32,
    ) -> Result<Self, QueueError> {
        let pending = storage.load(QueueSlot::Pending).await?;
        let mut dead_letters = storage.load(QueueSlot::DeadLetters).await?;
        if !pending.is_empty() {
            tracing::info!("Restored {} queued mutation(s)", pending.len());
        }
        trim_dead_letters(&mut dead_letters);

        let queue = Self::new(store, storage, max_retries);
        {
            let mut state = queue.state.lock().await;
            state.pending = pending;
            state.dead_letters = dead_letters;
        }
        Ok(queue)
    }

    /// Starts the queue in the offline state.
    pub fn offline(self) -> Self {
        self.is_online.store(false, Ordering::Release);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_online(&self) -> bool {
        self.is_online.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Appends an operation and persists the queue. When online, a
    /// processing pass is started in the background; the caller does not
    /// wait for delivery.
    pub async fn enqueue(
        self: &Arc<Self>,
        kind: OperationKind,
        target: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, QueueError> {
        let op = QueuedOperation::new(kind, target, payload, self.max_retries);
        let id = op.id;

        {
            let mut state = self.state.lock().await;
            state.pending.push(op);
            if let Err(e) = self.storage.save(QueueSlot::Pending, &state.pending).await {
                state.pending.pop();
                return Err(e);
            }
        }

        tracing::debug!(operation_id = %id, ?kind, collection = target, "Mutation queued");

        if self.is_online() {
            self.trigger();
        }
        Ok(id)
    }

    /// Runs one delivery pass over the pending operations.
    ///
    /// No-op when offline or when another pass is running. Operations are
    /// applied one at a time in enqueue order.
    pub async fn process_queue(&self) {
        if !self.is_online() {
            return;
        }
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let _pass = PassGuard(&self.is_processing);

        let (batch, generation) = {
            let state = self.state.lock().await;
            (state.pending.clone(), state.generation)
        };

        if !batch.is_empty() {
            tracing::info!("Replaying {} queued mutation(s)", batch.len());
        }

        let mut handled = HashSet::with_capacity(batch.len());
        let mut retained = Vec::new();
        let mut exhausted = Vec::new();

        for mut op in batch {
            handled.insert(op.id);
            match self.store.apply(&op).await {
                Ok(()) => {
                    tracing::debug!(operation_id = %op.id, collection = %op.target, "Queued mutation delivered");
                    let _ = self.events.send(QueueEvent::Delivered { id: op.id });
                }
                Err(e) => {
                    if op.record_failure() {
                        tracing::warn!(
                            operation_id = %op.id,
                            retry_count = op.retry_count,
                            "Queued mutation failed, will retry: {}",
                            e
                        );
                        let _ = self.events.send(QueueEvent::Retrying {
                            id: op.id,
                            retry_count: op.retry_count,
                        });
                        retained.push(op);
                    } else {
                        tracing::warn!(
                            operation_id = %op.id,
                            collection = %op.target,
                            "Dropping queued mutation after {} attempts: {}",
                            op.retry_count,
                            e
                        );
                        exhausted.push(op);
                    }
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            let arrived: Vec<QueuedOperation> = state
                .pending
                .drain(..)
                .filter(|op| !handled.contains(&op.id))
                .collect();

            let mut dead_letters_changed = false;
            if state.generation == generation {
                retained.extend(arrived);
                state.pending = retained;
                for op in exhausted {
                    let _ = self.events.send(QueueEvent::Dropped { id: op.id });
                    state.dead_letters.push(op);
                    dead_letters_changed = true;
                }
                trim_dead_letters(&mut state.dead_letters);
            } else {
                state.pending = arrived;
            }

            if let Err(e) = self.storage.save(QueueSlot::Pending, &state.pending).await {
                tracing::error!("Failed to persist offline queue: {}", e);
            }
            if dead_letters_changed {
                if let Err(e) = self
                    .storage
                    .save(QueueSlot::DeadLetters, &state.dead_letters)
                    .await
                {
                    tracing::error!("Failed to persist dead letters: {}", e);
                }
            }
        }
    }

    /// Records a connectivity change. Going from offline to online starts a
    /// processing pass.
    pub fn set_online(self: &Arc<Self>, online: bool) {
        let was_online = self.is_online.swap(online, Ordering::AcqRel);
        match (was_online, online) {
            (false, true) => {
                tracing::info!("Store reachable again, replaying queued mutations");
                self.trigger();
            }
            (true, false) => tracing::warn!("Store unreachable, buffering mutations"),
            _ => {}
        }
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            pending_count: state.pending.len(),
            is_processing: self.is_processing.load(Ordering::Acquire),
            is_online: self.is_online(),
            dead_letter_count: state.dead_letters.len(),
        }
    }

    /// Discards every pending operation.
    pub async fn clear_queue(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        let discarded = state.pending.len();
        state.pending.clear();
        state.generation += 1;
        self.storage.save(QueueSlot::Pending, &state.pending).await?;

        tracing::info!("Cleared {} queued mutation(s)", discarded);
        Ok(discarded)
    }

    /// Discards every dead letter.
    pub async fn clear_dead_letters(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        let discarded = state.dead_letters.len();
        self.storage.save(QueueSlot::DeadLetters, &[]).await?;
        state.dead_letters.clear();

        tracing::info!("Cleared {} dead letter(s)", discarded);
        Ok(discarded)
    }

    pub async fn pending(&self) -> Vec<QueuedOperation> {
        self.state.lock().await.pending.clone()
    }

    pub async fn dead_letters(&self) -> Vec<QueuedOperation> {
        self.state.lock().await.dead_letters.clone()
    }

    fn trigger(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.process_queue().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingStore {
        delivered: std::sync::Mutex<Vec<Uuid>>,
        failing: AtomicBool,
    }

    impl RecordingStore {
        fn failing() -> Self {
            Self {
                failing: AtomicBool::new(true),
                ..Default::default()
            }
        }

        fn delivered(&self) -> Vec<Uuid> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MutationStore for RecordingStore {
        async fn apply(&self, op: &QueuedOperation) -> Result<(), StoreError> {
            if self.failing.load(Ordering::Acquire) {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.delivered.lock().unwrap().push(op.id);
            Ok(())
        }
    }

    /// Blocks every delivery until the gate is opened.
    struct GatedStore {
        entered: Notify,
        gate: Notify,
        delivered: std::sync::Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl MutationStore for GatedStore {
        async fn apply(&self, op: &QueuedOperation) -> Result<(), StoreError> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.delivered.lock().unwrap().push(op.id);
            Ok(())
        }
    }

    fn ops(n: usize) -> Vec<QueuedOperation> {
        (0..n)
            .map(|i| {
                QueuedOperation::new(
                    OperationKind::Create,
                    "simulation_history",
                    serde_json::json!({ "n": i }),
                    3,
                )
            })
            .collect()
    }

    async fn restored(
        store: Arc<dyn MutationStore>,
        initial: Vec<QueuedOperation>,
    ) -> (Arc<OfflineQueue>, Arc<MemoryQueueStorage>) {
        let storage = Arc::new(MemoryQueueStorage::with_operations(initial));
        let queue = OfflineQueue::restore(store, storage.clone(), 3).await.unwrap();
        (Arc::new(queue), storage)
    }

    async fn next_event(rx: &mut broadcast::Receiver<QueueEvent>) -> QueueEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for queue event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_pass_delivers_in_enqueue_order() {
        let store = Arc::new(RecordingStore::default());
        let initial = ops(5);
        let expected: Vec<Uuid> = initial.iter().map(|op| op.id).collect();
        let (queue, storage) = restored(store.clone(), initial).await;

        queue.process_queue().await;

        assert_eq!(store.delivered(), expected);
        let status = queue.get_queue_status().await;
        assert_eq!(status.pending_count, 0);
        assert!(!status.is_processing);
        assert!(storage.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_operation_is_dropped_after_max_retries() {
        let store = Arc::new(RecordingStore::failing());
        let (queue, storage) = restored(store.clone(), ops(1)).await;
        let mut rx = queue.subscribe();

        queue.process_queue().await;
        assert_eq!(queue.pending().await[0].retry_count, 1);
        assert_eq!(storage.snapshot().await[0].retry_count, 1);

        queue.process_queue().await;
        assert_eq!(queue.get_queue_status().await.pending_count, 1);

        queue.process_queue().await;
        let status = queue.get_queue_status().await;
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.dead_letter_count, 1);
        assert!(store.delivered().is_empty());
        assert!(storage.snapshot().await.is_empty());

        let dead = queue.dead_letters().await;
        assert_eq!(dead[0].retry_count, 3);

        assert!(matches!(next_event(&mut rx).await, QueueEvent::Retrying { retry_count: 1, .. }));
        assert!(matches!(next_event(&mut rx).await, QueueEvent::Retrying { retry_count: 2, .. }));
        assert_eq!(next_event(&mut rx).await, QueueEvent::Dropped { id: dead[0].id });
    }

    #[tokio::test]
    async fn test_failed_operations_keep_relative_order() {
        let store = Arc::new(RecordingStore::failing());
        let initial = ops(3);
        let expected: Vec<Uuid> = initial.iter().map(|op| op.id).collect();
        let (queue, _) = restored(store.clone(), initial).await;

        queue.process_queue().await;
        store.failing.store(false, Ordering::Release);
        queue.process_queue().await;

        assert_eq!(store.delivered(), expected);
        assert_eq!(queue.get_queue_status().await.pending_count, 0);
    }

    #[tokio::test]
    async fn test_offline_queue_does_not_process() {
        let store = Arc::new(RecordingStore::default());
        let storage = Arc::new(MemoryQueueStorage::default());
        let queue = Arc::new(OfflineQueue::new(store.clone(), storage.clone(), 3).offline());

        queue
            .enqueue(OperationKind::Delete, "simulation_history", serde_json::json!({}))
            .await
            .unwrap();
        queue.process_queue().await;

        assert!(store.delivered().is_empty());
        let status = queue.get_queue_status().await;
        assert_eq!(status.pending_count, 1);
        assert!(!status.is_online);
        assert_eq!(storage.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_while_online_delivers_in_background() {
        let store = Arc::new(RecordingStore::default());
        let queue = Arc::new(OfflineQueue::new(
            store.clone(),
            Arc::new(MemoryQueueStorage::default()),
            3,
        ));
        let mut rx = queue.subscribe();

        let id = queue
            .enqueue(OperationKind::Create, "simulation_history", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(next_event(&mut rx).await, QueueEvent::Delivered { id });
        assert_eq!(store.delivered(), vec![id]);
    }

    #[tokio::test]
    async fn test_coming_online_triggers_replay() {
        let store = Arc::new(RecordingStore::default());
        let queue = Arc::new(
            OfflineQueue::new(store.clone(), Arc::new(MemoryQueueStorage::default()), 3).offline(),
        );
        let mut rx = queue.subscribe();

        let first = queue
            .enqueue(OperationKind::Create, "simulation_history", serde_json::json!({}))
            .await
            .unwrap();
        let second = queue
            .enqueue(OperationKind::Update, "simulation_history", serde_json::json!({}))
            .await
            .unwrap();

        queue.set_online(true);

        assert_eq!(next_event(&mut rx).await, QueueEvent::Delivered { id: first });
        assert_eq!(next_event(&mut rx).await, QueueEvent::Delivered { id: second });
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_ignored_and_new_work_survives() {
        let store = Arc::new(GatedStore {
            entered: Notify::new(),
            gate: Notify::new(),
            delivered: std::sync::Mutex::new(Vec::new()),
        });
        let initial = ops(1);
        let first = initial[0].id;
        let (queue, _) = restored(store.clone(), initial).await;

        let pass = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.process_queue().await }
        });
        store.entered.notified().await;
        assert!(queue.get_queue_status().await.is_processing);

        // A second trigger while processing returns immediately.
        queue.process_queue().await;

        let late = queue
            .enqueue(OperationKind::Create, "simulation_history", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(queue.get_queue_status().await.pending_count, 2);

        store.gate.notify_one();
        pass.await.unwrap();

        assert_eq!(store.delivered.lock().unwrap().clone(), vec![first]);
        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, late);
    }

    #[tokio::test]
    async fn test_dead_letters_are_persisted_and_restored() {
        let store = Arc::new(RecordingStore::failing());
        let initial = ops(1);
        let dead_id = initial[0].id;
        let storage = Arc::new(MemoryQueueStorage::with_operations(initial));
        let queue = OfflineQueue::restore(store.clone(), storage.clone(), 1)
            .await
            .unwrap();

        queue.process_queue().await;

        let persisted = storage.dead_letter_snapshot().await;
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, dead_id);
        assert!(storage.snapshot().await.is_empty());

        let reopened = OfflineQueue::restore(store, storage, 1).await.unwrap();
        assert_eq!(reopened.get_queue_status().await.dead_letter_count, 1);
        assert_eq!(reopened.dead_letters().await[0].id, dead_id);
    }

    #[tokio::test]
    async fn test_dead_letters_are_capped_oldest_first() {
        let store = Arc::new(RecordingStore::failing());
        let old = ops(MAX_DEAD_LETTERS);
        let oldest = old[0].id;
        let newest_old = old[MAX_DEAD_LETTERS - 1].id;
        let storage =
            Arc::new(MemoryQueueStorage::with_operations(ops(1)).with_dead_letters(old));
        let queue = OfflineQueue::restore(store, storage.clone(), 1).await.unwrap();

        queue.process_queue().await;

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), MAX_DEAD_LETTERS);
        assert!(dead.iter().all(|op| op.id != oldest));
        assert_eq!(dead[MAX_DEAD_LETTERS - 2].id, newest_old);
        assert_eq!(storage.dead_letter_snapshot().await.len(), MAX_DEAD_LETTERS);
    }

    #[tokio::test]
    async fn test_clear_dead_letters_empties_memory_and_storage() {
        let store = Arc::new(RecordingStore::default());
        let storage = Arc::new(MemoryQueueStorage::default().with_dead_letters(ops(2)));
        let queue = OfflineQueue::restore(store, storage.clone(), 3).await.unwrap();

        assert_eq!(queue.clear_dead_letters().await.unwrap(), 2);
        assert!(queue.dead_letters().await.is_empty());
        assert!(storage.dead_letter_snapshot().await.is_empty());
    }

    /// Panics on the first delivery, succeeds afterwards.
    #[derive(Default)]
    struct PanicOnceStore {
        panicked: AtomicBool,
        delivered: std::sync::Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl MutationStore for PanicOnceStore {
        async fn apply(&self, op: &QueuedOperation) -> Result<(), StoreError> {
            if !self.panicked.swap(true, Ordering::AcqRel) {
                panic!("store blew up");
            }
            self.delivered.lock().unwrap().push(op.id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_pass_does_not_block_later_passes() {
        let store = Arc::new(PanicOnceStore::default());
        let initial = ops(1);
        let id = initial[0].id;
        let (queue, _) = restored(store.clone(), initial).await;

        let pass = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.process_queue().await }
        });
        assert!(pass.await.unwrap_err().is_panic());

        let status = queue.get_queue_status().await;
        assert!(!status.is_processing);
        assert_eq!(status.pending_count, 1);

        queue.process_queue().await;
        assert_eq!(store.delivered.lock().unwrap().clone(), vec![id]);
        assert_eq!(queue.get_queue_status().await.pending_count, 0);
    }

    #[tokio::test]
    async fn test_clear_queue_discards_pending() {
        let store = Arc::new(RecordingStore::default());
        let (queue, storage) = restored(store.clone(), ops(4)).await;

        assert_eq!(queue.clear_queue().await.unwrap(), 4);
        queue.process_queue().await;

        assert!(store.delivered().is_empty());
        assert_eq!(queue.get_queue_status().await.pending_count, 0);
        assert!(storage.snapshot().await.is_empty());
    }
}
