// src/handlers/simulation_history.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    config::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT},
    db::{
        is_unavailable,
        simulation_history::{self, AttemptKey, AttemptPatch, COLLECTION},
    },
    error::AppError,
    models::{
        DataResponse,
        attempt::{CreateAttemptRequest, HistoryFilter, HistoryParams, UpdateAttemptRequest},
        operation::{OperationKind, QueuedMutation},
    },
    queue::OfflineQueue,
    state::AppState,
    statistics,
    utils::{
        jwt::Claims,
        time::{Bound, parse_iso_bound},
    },
};

#[derive(Debug, Serialize)]
struct Deleted {
    id: Uuid,
    deleted: bool,
}

/// Parses the date/simulation filters shared by listing and statistics.
fn parse_filter(params: &HistoryParams) -> Result<HistoryFilter, AppError> {
    let from = params
        .from
        .as_deref()
        .map(|v| parse_iso_bound("from", v, Bound::Start))
        .transpose()?;
    let to = params
        .to
        .as_deref()
        .map(|v| parse_iso_bound("to", v, Bound::End))
        .transpose()?;

    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(AppError::BadRequest("from must not be after to".to_string()));
        }
    }

    Ok(HistoryFilter {
        simulation_id: params.simulation_id,
        from,
        to,
    })
}

fn parse_page(params: &HistoryParams) -> Result<(i64, i64), AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }

    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::BadRequest("offset must not be negative".to_string()));
    }

    Ok((limit, offset))
}

/// Buffers a write the store could not take and answers 202 Accepted.
async fn buffer_mutation(
    queue: &Arc<OfflineQueue>,
    kind: OperationKind,
    payload: serde_json::Value,
    id: Uuid,
    cause: &sqlx::Error,
) -> Result<Response, AppError> {
    tracing::warn!("Store unavailable ({}), queueing {:?} of attempt {}", cause, kind, id);

    // Replay waits for the connectivity monitor to see the store again.
    queue.set_online(false);
    let operation_id = queue.enqueue(kind, COLLECTION, payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse::new(QueuedMutation {
            queued: true,
            operation_id,
            id,
        })),
    )
        .into_response())
}

/// Lists the caller's attempts, newest first.
pub async fn list_history(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let filter = parse_filter(&params)?;
    let (limit, offset) = parse_page(&params)?;

    let records = simulation_history::list_attempts(&pool, user_id, &filter, Some(limit), offset)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list simulation history: {:?}", e);
            AppError::from(e)
        })?;

    Ok(Json(DataResponse::new(records)))
}

/// Records a completed attempt.
///
/// * Validates ranges and that the percentage agrees with the score.
/// * Falls back to the offline queue when the store is unreachable.
pub async fn create_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, AppError> {
    let user_id = claims.user_id()?;
    let request: CreateAttemptRequest = serde_json::from_value(body)?;
    let record = request.into_record(user_id, Utc::now())?;

    match simulation_history::insert_attempt(&state.pool, &record).await {
        Ok(stored) => Ok((
            StatusCode::CREATED,
            Json(DataResponse::new(stored.unwrap_or(record))),
        )
            .into_response()),
        Err(e) if is_unavailable(&e) => {
            let payload = serde_json::to_value(&record)?;
            buffer_mutation(&state.queue, OperationKind::Create, payload, record.id, &e).await
        }
        Err(e) => {
            tracing::error!("Failed to insert simulation attempt: {:?}", e);
            Err(e.into())
        }
    }
}

pub async fn get_history(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let record = simulation_history::fetch_attempt(&pool, user_id, id)
        .await?
        .ok_or(AppError::NotFound("Simulation attempt not found".to_string()))?;

    Ok(Json(DataResponse::new(record)))
}

/// Partially updates an attempt owned by the caller.
pub async fn update_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, AppError> {
    let user_id = claims.user_id()?;
    let patch: UpdateAttemptRequest = serde_json::from_value(body)?;
    let patch = patch.normalized()?;

    match simulation_history::update_attempt(&state.pool, user_id, id, &patch).await {
        Ok(Some(record)) => Ok(Json(DataResponse::new(record)).into_response()),
        Ok(None) => Err(AppError::NotFound(
            "Simulation attempt not found".to_string(),
        )),
        Err(e) if is_unavailable(&e) => {
            let payload = serde_json::to_value(AttemptPatch { id, user_id, patch })?;
            buffer_mutation(&state.queue, OperationKind::Update, payload, id, &e).await
        }
        Err(e) => {
            tracing::error!("Failed to update simulation attempt: {:?}", e);
            Err(e.into())
        }
    }
}

pub async fn delete_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let user_id = claims.user_id()?;

    match simulation_history::delete_attempt(&state.pool, user_id, id).await {
        Ok(true) => Ok(Json(DataResponse::new(Deleted { id, deleted: true })).into_response()),
        Ok(false) => Err(AppError::NotFound(
            "Simulation attempt not found".to_string(),
        )),
        Err(e) if is_unavailable(&e) => {
            let payload = serde_json::to_value(AttemptKey { id, user_id })?;
            buffer_mutation(&state.queue, OperationKind::Delete, payload, id, &e).await
        }
        Err(e) => {
            tracing::error!("Failed to delete simulation attempt: {:?}", e);
            Err(e.into())
        }
    }
}

/// Summary statistics over the caller's attempts matching the filters.
pub async fn get_statistics(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let filter = parse_filter(&params)?;

    let records = simulation_history::list_attempts(&pool, user_id, &filter, None, 0)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load attempts for statistics: {:?}", e);
            AppError::from(e)
        })?;

    Ok(Json(DataResponse::new(statistics::summarize(
        &records,
        Utc::now(),
    ))))
}
