// src/models/attempt.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;
use validator::Validate;

use crate::{config::MAX_ANSWERS_PER_ATTEMPT, error::AppError};

/// Tolerance allowed between a client supplied percentage and the one
/// derived from `score / total_questions`.
const PERCENTAGE_TOLERANCE: f64 = 0.5;

/// Represents the 'simulation_history' table in the database.
/// One completed quiz/simulation attempt.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub simulation_id: Uuid,
    pub score: i32,
    pub total_questions: i32,

    /// Stored as given at ingestion; the aggregator does not recompute it.
    pub percentage: f64,

    pub time_taken_minutes: Option<i32>,

    /// Question id -> chosen option.
    pub answers: Json<HashMap<String, String>>,

    pub completed_at: DateTime<Utc>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// `score / total * 100`, rounded to 2 decimals.
pub fn percentage_of(score: i32, total_questions: i32) -> f64 {
    if total_questions <= 0 {
        return 0.0;
    }
    round2(f64::from(score) / f64::from(total_questions) * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// DTO for creating an attempt.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAttemptRequest {
    pub simulation_id: Uuid,

    #[validate(range(min = 0, message = "score must not be negative"))]
    pub score: i32,

    #[validate(range(min = 1, message = "total_questions must be at least 1"))]
    pub total_questions: i32,

    #[validate(range(min = 0.0, max = 100.0, message = "percentage must be between 0 and 100"))]
    pub percentage: Option<f64>,

    #[validate(range(min = 0, message = "time_taken_minutes must not be negative"))]
    pub time_taken_minutes: Option<i32>,

    #[serde(default)]
    #[validate(custom(function = validate_answers))]
    pub answers: HashMap<String, String>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl CreateAttemptRequest {
    /// Validates field ranges and cross-field consistency, then builds the
    /// record that will be stored.
    pub fn into_record(self, user_id: Uuid, now: DateTime<Utc>) -> Result<AttemptRecord, AppError> {
        self.validate()?;
        let percentage = consistent_percentage(self.score, self.total_questions, self.percentage)?;

        Ok(AttemptRecord {
            id: Uuid::new_v4(),
            user_id,
            simulation_id: self.simulation_id,
            score: self.score,
            total_questions: self.total_questions,
            percentage,
            time_taken_minutes: self.time_taken_minutes,
            answers: Json(self.answers),
            completed_at: self.completed_at.unwrap_or(now),
            created_at: None,
        })
    }
}

/// DTO for a partial update. Score and total travel together so the
/// stored percentage always matches them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateAttemptRequest {
    pub simulation_id: Option<Uuid>,

    #[validate(range(min = 0, message = "score must not be negative"))]
    pub score: Option<i32>,

    #[validate(range(min = 1, message = "total_questions must be at least 1"))]
    pub total_questions: Option<i32>,

    #[validate(range(min = 0.0, max = 100.0, message = "percentage must be between 0 and 100"))]
    pub percentage: Option<f64>,

    #[validate(range(min = 0, message = "time_taken_minutes must not be negative"))]
    pub time_taken_minutes: Option<i32>,

    #[validate(custom(function = validate_answers))]
    pub answers: Option<HashMap<String, String>>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl UpdateAttemptRequest {
    pub fn is_empty(&self) -> bool {
        self.simulation_id.is_none()
            && self.score.is_none()
            && self.total_questions.is_none()
            && self.percentage.is_none()
            && self.time_taken_minutes.is_none()
            && self.answers.is_none()
            && self.completed_at.is_none()
    }

    /// Checks the patch and fills in the derived percentage.
    pub fn normalized(mut self) -> Result<Self, AppError> {
        self.validate()?;
        match (self.score, self.total_questions) {
            (Some(score), Some(total)) => {
                self.percentage = Some(consistent_percentage(score, total, self.percentage)?);
            }
            (None, None) => {
                if self.percentage.is_some() {
                    return Err(AppError::BadRequest(
                        "percentage can only change together with score and total_questions"
                            .to_string(),
                    ));
                }
            }
            _ => {
                return Err(AppError::BadRequest(
                    "score and total_questions must be updated together".to_string(),
                ));
            }
        }
        Ok(self)
    }
}

/// Query parameters for listing attempts and computing statistics.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub simulation_id: Option<Uuid>,

    /// Lower bound on `completed_at` (RFC 3339 or YYYY-MM-DD).
    pub from: Option<String>,

    /// Upper bound on `completed_at` (RFC 3339 or YYYY-MM-DD, inclusive).
    pub to: Option<String>,

    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Parsed, validated form of [`HistoryParams`].
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub simulation_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

fn consistent_percentage(
    score: i32,
    total_questions: i32,
    claimed: Option<f64>,
) -> Result<f64, AppError> {
    if score > total_questions {
        return Err(AppError::BadRequest(
            "score cannot exceed total_questions".to_string(),
        ));
    }

    let derived = percentage_of(score, total_questions);
    match claimed {
        Some(claimed) if (claimed - derived).abs() > PERCENTAGE_TOLERANCE => {
            Err(AppError::BadRequest(format!(
                "percentage {claimed} does not match score {score}/{total_questions}"
            )))
        }
        Some(claimed) => Ok(round2(claimed)),
        None => Ok(derived),
    }
}

fn validate_answers(answers: &HashMap<String, String>) -> Result<(), validator::ValidationError> {
    if answers.len() > MAX_ANSWERS_PER_ATTEMPT {
        return Err(validator::ValidationError::new("too_many_answers"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(score: i32, total: i32, percentage: Option<f64>) -> CreateAttemptRequest {
        CreateAttemptRequest {
            simulation_id: Uuid::new_v4(),
            score,
            total_questions: total,
            percentage,
            time_taken_minutes: Some(12),
            answers: HashMap::new(),
            completed_at: None,
        }
    }

    #[test]
    fn test_percentage_is_derived_when_missing() {
        let record = request(2, 3, None)
            .into_record(Uuid::new_v4(), Utc::now())
            .unwrap();
        assert_eq!(record.percentage, 66.67);
    }

    #[test]
    fn test_rounded_client_percentage_is_accepted() {
        let record = request(2, 3, Some(67.0))
            .into_record(Uuid::new_v4(), Utc::now())
            .unwrap();
        assert_eq!(record.percentage, 67.0);
    }

    #[test]
    fn test_inconsistent_percentage_is_rejected() {
        let result = request(8, 10, Some(30.0)).into_record(Uuid::new_v4(), Utc::now());
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_score_above_total_is_rejected() {
        let result = request(11, 10, None).into_record(Uuid::new_v4(), Utc::now());
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_zero_total_is_rejected() {
        let result = request(0, 0, None).into_record(Uuid::new_v4(), Utc::now());
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_update_requires_score_and_total_together() {
        let patch = UpdateAttemptRequest {
            score: Some(3),
            ..Default::default()
        };
        assert!(matches!(patch.normalized(), Err(AppError::BadRequest(_))));

        let patch = UpdateAttemptRequest {
            score: Some(3),
            total_questions: Some(4),
            ..Default::default()
        };
        assert_eq!(patch.normalized().unwrap().percentage, Some(75.0));
    }

    #[test]
    fn test_update_rejects_lone_percentage() {
        let patch = UpdateAttemptRequest {
            percentage: Some(50.0),
            ..Default::default()
        };
        assert!(matches!(patch.normalized(), Err(AppError::BadRequest(_))));
    }
}
