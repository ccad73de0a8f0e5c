// src/queue/connectivity.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use super::OfflineQueue;

/// Reachability check against the persistent store.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

#[async_trait]
impl Probe for PgPool {
    async fn is_reachable(&self) -> bool {
        match sqlx::query("SELECT 1").execute(self).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Store probe failed: {}", e);
                false
            }
        }
    }
}

/// Periodically probes the store and feeds the result to the queue, so an
/// offline -> online transition starts a replay.
pub fn spawn_monitor(
    queue: Arc<OfflineQueue>,
    probe: Arc<dyn Probe>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reachable = probe.is_reachable().await;
            queue.set_online(reachable);
        }
    })
}
