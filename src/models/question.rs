// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use uuid::Uuid;

/// Represents the 'simulation_questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,

    pub simulation_id: Uuid,

    /// Display order inside the simulation.
    pub position: i32,

    /// The text content of the question.
    pub content: String,

    /// List of options (e.g., ["Option A", "Option B"]).
    /// Stored as a JSON array in the database.
    pub options: Json<Vec<String>>,

    /// The option a correct attempt must select.
    pub correct_answer: String,

    /// Explanation revealed in the session review once the attempt is finalized.
    pub explanation: Option<String>,
}

/// DTO for sending a question to the client during a quiz (excludes the answer).
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    pub id: Uuid,
    pub position: i32,
    pub content: String,
    pub options: Vec<String>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            position: q.position,
            content: q.content.clone(),
            options: q.options.0.clone(),
        }
    }
}
