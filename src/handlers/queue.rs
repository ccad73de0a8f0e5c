// src/handlers/queue.rs

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::{error::AppError, models::DataResponse, queue::OfflineQueue};

#[derive(Debug, Serialize)]
struct Cleared {
    discarded: usize,
}

pub async fn queue_status(State(queue): State<Arc<OfflineQueue>>) -> impl IntoResponse {
    Json(DataResponse::new(queue.get_queue_status().await))
}

/// Drops every pending operation (admin only).
pub async fn clear_queue(
    State(queue): State<Arc<OfflineQueue>>,
) -> Result<impl IntoResponse, AppError> {
    let discarded = queue.clear_queue().await?;
    tracing::warn!("Offline queue cleared, {} operations discarded", discarded);
    Ok(Json(DataResponse::new(Cleared { discarded })))
}

/// Operations dropped after exhausting their retries (admin only).
pub async fn dead_letters(State(queue): State<Arc<OfflineQueue>>) -> impl IntoResponse {
    Json(DataResponse::new(queue.dead_letters().await))
}

/// Drops every dead letter once an operator has inspected them (admin only).
pub async fn clear_dead_letters(
    State(queue): State<Arc<OfflineQueue>>,
) -> Result<impl IntoResponse, AppError> {
    let discarded = queue.clear_dead_letters().await?;
    tracing::warn!("Dead letters cleared, {} operations discarded", discarded);
    Ok(Json(DataResponse::new(Cleared { discarded })))
}
