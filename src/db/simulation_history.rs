// src/db/simulation_history.rs

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};
use uuid::Uuid;

use crate::models::attempt::{AttemptRecord, HistoryFilter, UpdateAttemptRequest};

/// Collection name used by queued operations targeting this table.
pub const COLLECTION: &str = "simulation_history";

const COLUMNS: &str = "id, user_id, simulation_id, score, total_questions, percentage, \
                       time_taken_minutes, answers, completed_at, created_at";

/// Payload of a queued UPDATE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptPatch {
    pub id: Uuid,
    pub user_id: Uuid,
    pub patch: UpdateAttemptRequest,
}

/// Payload of a queued DELETE.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AttemptKey {
    pub id: Uuid,
    pub user_id: Uuid,
}

/// Inserts `record`. Returns `None` when a row with the same id already
/// exists, which happens when a queued insert is replayed.
pub async fn insert_attempt(
    pool: &PgPool,
    record: &AttemptRecord,
) -> Result<Option<AttemptRecord>, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO simulation_history
            (id, user_id, simulation_id, score, total_questions, percentage,
             time_taken_minutes, answers, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO NOTHING
        RETURNING {COLUMNS}
        "#
    );

    sqlx::query_as::<_, AttemptRecord>(&sql)
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.simulation_id)
        .bind(record.score)
        .bind(record.total_questions)
        .bind(record.percentage)
        .bind(record.time_taken_minutes)
        .bind(&record.answers)
        .bind(record.completed_at)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_attempt(
    pool: &PgPool,
    user_id: Uuid,
    id: Uuid,
) -> Result<Option<AttemptRecord>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM simulation_history WHERE id = $1 AND user_id = $2");

    sqlx::query_as::<_, AttemptRecord>(&sql)
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Lists the owner's attempts, newest first. `limit = None` returns every
/// matching row.
pub async fn list_attempts(
    pool: &PgPool,
    user_id: Uuid,
    filter: &HistoryFilter,
    limit: Option<i64>,
    offset: i64,
) -> Result<Vec<AttemptRecord>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {COLUMNS}
        FROM simulation_history
        WHERE user_id = $1
          AND ($2::UUID IS NULL OR simulation_id = $2)
          AND ($3::TIMESTAMPTZ IS NULL OR completed_at >= $3)
          AND ($4::TIMESTAMPTZ IS NULL OR completed_at <= $4)
        ORDER BY completed_at DESC, id
        LIMIT $5 OFFSET $6
        "#
    );

    sqlx::query_as::<_, AttemptRecord>(&sql)
        .bind(user_id)
        .bind(filter.simulation_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
}

/// Applies the non-empty fields of `patch`. Returns `None` when the row
/// does not exist or belongs to someone else.
pub async fn update_attempt(
    pool: &PgPool,
    user_id: Uuid,
    id: Uuid,
    patch: &UpdateAttemptRequest,
) -> Result<Option<AttemptRecord>, sqlx::Error> {
    if patch.is_empty() {
        return fetch_attempt(pool, user_id, id).await;
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE simulation_history SET ");
    let mut separated = builder.separated(", ");

    if let Some(simulation_id) = patch.simulation_id {
        separated.push("simulation_id = ");
        separated.push_bind_unseparated(simulation_id);
    }

    if let Some(score) = patch.score {
        separated.push("score = ");
        separated.push_bind_unseparated(score);
    }

    if let Some(total_questions) = patch.total_questions {
        separated.push("total_questions = ");
        separated.push_bind_unseparated(total_questions);
    }

    if let Some(percentage) = patch.percentage {
        separated.push("percentage = ");
        separated.push_bind_unseparated(percentage);
    }

    if let Some(minutes) = patch.time_taken_minutes {
        separated.push("time_taken_minutes = ");
        separated.push_bind_unseparated(minutes);
    }

    if let Some(answers) = &patch.answers {
        separated.push("answers = ");
        separated.push_bind_unseparated(Json(answers.clone()));
    }

    if let Some(completed_at) = patch.completed_at {
        separated.push("completed_at = ");
        separated.push_bind_unseparated(completed_at);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(" AND user_id = ");
    builder.push_bind(user_id);
    builder.push(" RETURNING ");
    builder.push(COLUMNS);

    builder
        .build_query_as::<AttemptRecord>()
        .fetch_optional(pool)
        .await
}

/// Returns `false` when nothing was deleted.
pub async fn delete_attempt(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM simulation_history WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
