// src/db/questions.rs

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::question::Question;

/// Where quiz questions come from.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn questions_for(&self, simulation_id: Uuid) -> Result<Vec<Question>, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgQuestionSource {
    pool: PgPool,
}

impl PgQuestionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionSource for PgQuestionSource {
    async fn questions_for(&self, simulation_id: Uuid) -> Result<Vec<Question>, sqlx::Error> {
        sqlx::query_as::<_, Question>(
            r#"
            SELECT id, simulation_id, position, content, options, correct_answer, explanation
            FROM simulation_questions
            WHERE simulation_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(simulation_id)
        .fetch_all(&self.pool)
        .await
    }
}
