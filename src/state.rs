// src/state.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::FromRef;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{config::Config, db::questions::QuestionSource, queue::OfflineQueue, session::QuizSession};

/// Active quiz sessions, one per user.
pub type SessionRegistry = Mutex<HashMap<Uuid, QuizSession>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub queue: Arc<OfflineQueue>,
    pub questions: Arc<dyn QuestionSource>,
    pub sessions: Arc<SessionRegistry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: Config,
        queue: Arc<OfflineQueue>,
        questions: Arc<dyn QuestionSource>,
    ) -> Self {
        Self {
            pool,
            config,
            queue,
            questions,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            started_at: Instant::now(),
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<OfflineQueue> {
    fn from_ref(state: &AppState) -> Self {
        state.queue.clone()
    }
}
