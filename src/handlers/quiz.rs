// src/handlers/quiz.rs

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::simulation_history::COLLECTION,
    error::AppError,
    models::{DataResponse, attempt::AttemptRecord, operation::OperationKind},
    session::{QuizSession, SessionError, SessionPhase},
    state::{AppState, SessionRegistry},
    utils::jwt::Claims,
};

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub simulation_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnswerRequest {
    pub question_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "Choice must be 1-500 characters"))]
    pub choice: String,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub index: usize,
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub result: AttemptRecord,
    pub operation_id: Uuid,
}

/// Runs `f` against the caller's session. The registry lock is never held
/// across an await point.
fn with_session<T>(
    sessions: &SessionRegistry,
    user_id: Uuid,
    f: impl FnOnce(&mut QuizSession) -> Result<T, SessionError>,
) -> Result<T, AppError> {
    let mut guard = sessions
        .lock()
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    let session = guard
        .get_mut(&user_id)
        .ok_or(SessionError::NoActiveSession)?;
    Ok(f(session)?)
}

/// Starts a session for a simulation: `idle -> loading -> reviewing`.
///
/// A finished session (phase `results`) is replaced; one that is still
/// loading or under review answers 409. If the session was reset while
/// the questions were loading, the fetched questions are discarded.
pub async fn start_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let simulation_id = payload.simulation_id;

    let load_id = {
        let mut guard = state
            .sessions
            .lock()
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        let session = guard.entry(user_id).or_default();
        if session.phase() == SessionPhase::Results {
            session.reset();
        }
        session.begin_load(simulation_id)?
    };

    let loaded = state.questions.questions_for(simulation_id).await;

    let mut guard = state
        .sessions
        .lock()
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    let Some(session) = guard
        .get_mut(&user_id)
        .filter(|session| session.is_loading(load_id))
    else {
        tracing::debug!("Discarding superseded quiz load for user {}", user_id);
        return Err(SessionError::StaleLoad.into());
    };

    let outcome = match loaded {
        Ok(questions) => session
            .complete_load(load_id, questions, Utc::now())
            .map_err(AppError::from),
        Err(e) => {
            tracing::error!("Failed to load questions for {}: {:?}", simulation_id, e);
            session.fail_load(load_id);
            Err(AppError::from(e))
        }
    };

    if let Err(err) = outcome {
        if session.phase() == SessionPhase::Idle {
            guard.remove(&user_id);
        }
        return Err(err);
    }

    tracing::info!("User {} started quiz on simulation {}", user_id, simulation_id);
    Ok((StatusCode::CREATED, Json(DataResponse::new(session.view()))))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let view = with_session(&state.sessions, user_id, |s| Ok(s.view()))?;
    Ok(Json(DataResponse::new(view)))
}

/// Records or overwrites one answer.
pub async fn answer_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let view = with_session(&state.sessions, user_id, |s| {
        s.answer(payload.question_id, payload.choice)?;
        Ok(s.view())
    })?;

    Ok(Json(DataResponse::new(view)))
}

pub async fn navigate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NavigateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let view = with_session(&state.sessions, user_id, |s| {
        s.navigate(payload.index)?;
        Ok(s.view())
    })?;

    Ok(Json(DataResponse::new(view)))
}

/// Scores the session and hands the attempt to the offline queue for
/// persistence. If the queue cannot take it, the session goes back to
/// `reviewing` with its answers so the caller can finalize again.
pub async fn finalize_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let record = with_session(&state.sessions, user_id, |s| s.finalize(user_id, Utc::now()))?;

    let queued = match serde_json::to_value(&record) {
        Ok(payload) => state
            .queue
            .enqueue(OperationKind::Create, COLLECTION, payload)
            .await
            .map_err(AppError::from),
        Err(e) => Err(AppError::from(e)),
    };

    let operation_id = match queued {
        Ok(id) => id,
        Err(err) => {
            tracing::error!("Failed to queue attempt {} for storage: {}", record.id, err);
            let reopened = with_session(&state.sessions, user_id, |s| Ok(s.reopen(record.id)));
            if !matches!(reopened, Ok(true)) {
                tracing::warn!(
                    "Session of user {} moved on, attempt {} not reopened",
                    user_id,
                    record.id
                );
            }
            return Err(err);
        }
    };

    tracing::info!(
        "User {} finished simulation {} with {}/{}",
        user_id,
        record.simulation_id,
        record.score,
        record.total_questions
    );

    Ok(Json(DataResponse::new(FinalizeResponse {
        result: record,
        operation_id,
    })))
}

/// Discards the caller's session, whatever its phase.
pub async fn reset_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    state
        .sessions
        .lock()
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .remove(&user_id);

    Ok(Json(DataResponse::new(QuizSession::new().view())))
}
