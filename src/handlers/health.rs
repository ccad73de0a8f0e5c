// src/handlers/health.rs

use std::time::Instant;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::PgPool;

use crate::{
    queue::{QueueStatus, connectivity::Probe},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub reachable: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub memory_rss_bytes: Option<u64>,
    pub database: DatabaseHealth,
    pub queue: QueueStatus,
}

/// Resident set size from procfs. `None` where procfs is unavailable.
async fn resident_memory_bytes() -> Option<u64> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

/// Liveness report: 200 when the store answers, 503 otherwise.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let reachable = state.pool.is_reachable().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let report = HealthReport {
        status: if reachable { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        memory_rss_bytes: resident_memory_bytes().await,
        database: DatabaseHealth {
            reachable,
            latency_ms,
        },
        queue: state.queue.get_queue_status().await,
    };

    let code = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// Bodiless variant for connectivity probes.
pub async fn health_head(State(pool): State<PgPool>) -> StatusCode {
    if pool.is_reachable().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resident_memory_is_reported_on_linux() {
        if cfg!(target_os = "linux") {
            assert!(resident_memory_bytes().await.unwrap_or(0) > 0);
        }
    }
}
