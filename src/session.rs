// src/session.rs

//! In-progress quiz state.
//!
//! `idle -> loading -> reviewing -> results`, with `reset` returning to
//! `idle` from any phase. The session never touches the store itself:
//! callers fetch questions between `begin_load` and `complete_load`, and
//! persist the record returned by `finalize`.
//!
//! `begin_load` hands out a load token. Only the load holding the current
//! token can complete or fail, so a fetch that outlives a reset cannot
//! land in a newer session.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{
    attempt::{AttemptRecord, percentage_of},
    question::{PublicQuestion, Question},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Loading,
    Reviewing,
    Results,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No active quiz session")]
    NoActiveSession,

    #[error("Simulation {0} has no questions")]
    NoQuestions(Uuid),

    #[error("Quiz load was superseded by a newer request")]
    StaleLoad,

    #[error("Cannot {action} while the session is {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: SessionPhase,
    },

    #[error("Not all questions answered ({unanswered} remaining)")]
    Incomplete { unanswered: usize },

    #[error("Question {0} is not part of this quiz")]
    UnknownQuestion(Uuid),

    #[error("Question index {index} is out of bounds for {len} questions")]
    OutOfBounds { index: usize, len: usize },
}

/// Questions, answers given so far and the question on screen.
#[derive(Debug, Clone)]
pub struct QuizSessionState {
    questions: Vec<Question>,
    answers: HashMap<Uuid, String>,
    current_index: usize,
}

impl QuizSessionState {
    fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            answers: HashMap::new(),
            current_index: 0,
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn answers(&self) -> &HashMap<Uuid, String> {
        &self.answers
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn unanswered(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| !self.answers.contains_key(&q.id))
            .count()
    }

    /// Number of answers matching the question's correct answer.
    pub fn score(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| self.answers.get(&q.id) == Some(&q.correct_answer))
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct QuizSession {
    phase: SessionPhase,
    simulation_id: Option<Uuid>,
    load_id: Option<Uuid>,
    state: Option<QuizSessionState>,
    started_at: Option<DateTime<Utc>>,
    result: Option<AttemptRecord>,
}

impl Default for QuizSession {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizSession {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            simulation_id: None,
            load_id: None,
            state: None,
            started_at: None,
            result: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn simulation_id(&self) -> Option<Uuid> {
        self.simulation_id
    }

    pub fn state(&self) -> Option<&QuizSessionState> {
        self.state.as_ref()
    }

    pub fn result(&self) -> Option<&AttemptRecord> {
        self.result.as_ref()
    }

    /// `idle -> loading`. Returns the token the matching
    /// `complete_load`/`fail_load` must present.
    pub fn begin_load(&mut self, simulation_id: Uuid) -> Result<Uuid, SessionError> {
        self.expect_phase(SessionPhase::Idle, "load a quiz")?;
        let load_id = Uuid::new_v4();
        self.phase = SessionPhase::Loading;
        self.simulation_id = Some(simulation_id);
        self.load_id = Some(load_id);
        Ok(load_id)
    }

    /// Whether `load_id` is the load this session is waiting for.
    pub fn is_loading(&self, load_id: Uuid) -> bool {
        self.phase == SessionPhase::Loading && self.load_id == Some(load_id)
    }

    /// `loading -> reviewing` with a fresh state. A simulation without
    /// questions cannot be reviewed and sends the session back to `idle`.
    /// Results of any load but the current one are refused.
    pub fn complete_load(
        &mut self,
        load_id: Uuid,
        mut questions: Vec<Question>,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if !self.is_loading(load_id) {
            return Err(SessionError::StaleLoad);
        }

        if questions.is_empty() {
            let simulation_id = self.simulation_id.unwrap_or_default();
            self.reset();
            return Err(SessionError::NoQuestions(simulation_id));
        }

        questions.sort_by_key(|q| q.position);
        self.state = Some(QuizSessionState::new(questions));
        self.started_at = Some(now);
        self.phase = SessionPhase::Reviewing;
        Ok(())
    }

    /// Loading failed; nothing to review, back to `idle`. A stale token
    /// leaves the session alone.
    pub fn fail_load(&mut self, load_id: Uuid) {
        if self.is_loading(load_id) {
            self.reset();
        }
    }

    /// Records or overwrites the answer to `question_id`. Does not move
    /// the current index.
    pub fn answer(&mut self, question_id: Uuid, choice: String) -> Result<(), SessionError> {
        let state = self.reviewing_state("answer")?;
        if !state.questions.iter().any(|q| q.id == question_id) {
            return Err(SessionError::UnknownQuestion(question_id));
        }
        state.answers.insert(question_id, choice);
        Ok(())
    }

    /// Jumps to `index`; no wraparound.
    pub fn navigate(&mut self, index: usize) -> Result<(), SessionError> {
        let state = self.reviewing_state("navigate")?;
        let len = state.questions.len();
        if index >= len {
            return Err(SessionError::OutOfBounds { index, len });
        }
        state.current_index = index;
        Ok(())
    }

    /// `reviewing -> results`. Fails, leaving the session untouched, when
    /// any question is unanswered.
    pub fn finalize(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, SessionError> {
        let started_at = self.started_at;
        let simulation_id = self.simulation_id.unwrap_or_default();
        let state = self.reviewing_state("finalize")?;

        let unanswered = state.unanswered();
        if unanswered > 0 {
            return Err(SessionError::Incomplete { unanswered });
        }

        let total_questions = state.questions.len() as i32;
        let score = state.score() as i32;
        let answers = state
            .answers
            .iter()
            .map(|(id, choice)| (id.to_string(), choice.clone()))
            .collect();

        let time_taken_minutes = started_at.map(|start| {
            let seconds = (now - start).num_seconds().max(0);
            ((seconds + 30) / 60) as i32
        });

        let record = AttemptRecord {
            id: Uuid::new_v4(),
            user_id,
            simulation_id,
            score,
            total_questions,
            percentage: percentage_of(score, total_questions),
            time_taken_minutes,
            answers: Json(answers),
            completed_at: now,
            created_at: None,
        };

        self.result = Some(record.clone());
        self.phase = SessionPhase::Results;
        Ok(record)
    }

    /// `results -> reviewing` for the attempt `attempt_id`, keeping every
    /// answer. Used when the finalized attempt could not be handed on for
    /// storage. Returns `false` when the session has moved on.
    pub fn reopen(&mut self, attempt_id: Uuid) -> bool {
        let finalized = self.phase == SessionPhase::Results
            && self.result.as_ref().is_some_and(|r| r.id == attempt_id);
        if finalized {
            self.result = None;
            self.phase = SessionPhase::Reviewing;
        }
        finalized
    }

    /// Back to `idle`, discarding all in-memory state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            simulation_id: self.simulation_id,
            current_index: self.state.as_ref().map(|s| s.current_index),
            questions: self
                .state
                .as_ref()
                .map(|s| s.questions.iter().map(PublicQuestion::from).collect())
                .unwrap_or_default(),
            answers: self
                .state
                .as_ref()
                .map(|s| s.answers.clone())
                .unwrap_or_default(),
            result: self.result.clone(),
            review: self.review(),
        }
    }

    /// Per-question outcome, only once the attempt is finalized.
    fn review(&self) -> Vec<QuestionReview> {
        let Some(state) = self.state.as_ref().filter(|_| self.phase == SessionPhase::Results)
        else {
            return Vec::new();
        };

        state
            .questions
            .iter()
            .map(|q| {
                let chosen = state.answers.get(&q.id).cloned();
                QuestionReview {
                    question_id: q.id,
                    is_correct: chosen.as_deref() == Some(q.correct_answer.as_str()),
                    chosen,
                    correct_answer: q.correct_answer.clone(),
                    explanation: q.explanation.clone(),
                }
            })
            .collect()
    }

    fn expect_phase(&self, phase: SessionPhase, action: &'static str) -> Result<(), SessionError> {
        if self.phase != phase {
            return Err(SessionError::InvalidTransition {
                action,
                phase: self.phase,
            });
        }
        Ok(())
    }

    fn reviewing_state(
        &mut self,
        action: &'static str,
    ) -> Result<&mut QuizSessionState, SessionError> {
        self.expect_phase(SessionPhase::Reviewing, action)?;
        let phase = self.phase;
        self.state
            .as_mut()
            .ok_or(SessionError::InvalidTransition { action, phase })
    }
}

/// Client-facing snapshot of a session. Correct answers stay hidden
/// until the `results` phase, where `review` reveals them.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub simulation_id: Option<Uuid>,
    pub current_index: Option<usize>,
    pub questions: Vec<PublicQuestion>,
    pub answers: HashMap<Uuid, String>,
    pub result: Option<AttemptRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub review: Vec<QuestionReview>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionReview {
    pub question_id: Uuid,
    pub chosen: Option<String>,
    pub correct_answer: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: Uuid::new_v4(),
                simulation_id: Uuid::nil(),
                position: i as i32,
                content: format!("Question {i}"),
                options: Json(vec!["A".into(), "B".into(), "C".into()]),
                correct_answer: "A".to_string(),
                explanation: None,
            })
            .collect()
    }

    fn reviewing(n: usize) -> (QuizSession, Vec<Question>) {
        let qs = questions(n);
        let mut session = QuizSession::new();
        let load = session.begin_load(Uuid::new_v4()).unwrap();
        session.complete_load(load, qs.clone(), Utc::now()).unwrap();
        (session, qs)
    }

    #[test]
    fn test_load_moves_to_reviewing_with_fresh_state() {
        let (session, qs) = reviewing(3);
        assert_eq!(session.phase(), SessionPhase::Reviewing);

        let state = session.state().unwrap();
        assert_eq!(state.current_index(), 0);
        assert!(state.answers().is_empty());
        assert_eq!(state.questions().len(), qs.len());
    }

    #[test]
    fn test_load_orders_questions_by_position() {
        let mut qs = questions(3);
        qs.reverse();
        let mut session = QuizSession::new();
        let load = session.begin_load(Uuid::new_v4()).unwrap();
        session.complete_load(load, qs, Utc::now()).unwrap();

        let positions: Vec<i32> = session
            .state()
            .unwrap()
            .questions()
            .iter()
            .map(|q| q.position)
            .collect();
        assert_eq!(positions, [0, 1, 2]);
    }

    #[test]
    fn test_failed_or_empty_load_returns_to_idle() {
        let mut session = QuizSession::new();
        let load = session.begin_load(Uuid::new_v4()).unwrap();
        session.fail_load(load);
        assert_eq!(session.phase(), SessionPhase::Idle);

        let load = session.begin_load(Uuid::new_v4()).unwrap();
        let err = session.complete_load(load, Vec::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, SessionError::NoQuestions(_)));
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_load_outlived_by_reset_is_refused() {
        let first_sim = Uuid::new_v4();
        let second_sim = Uuid::new_v4();
        let mut session = QuizSession::new();

        let stale = session.begin_load(first_sim).unwrap();
        session.reset();
        let current = session.begin_load(second_sim).unwrap();

        let err = session.complete_load(stale, questions(2), Utc::now()).unwrap_err();
        assert!(matches!(err, SessionError::StaleLoad));
        session.fail_load(stale);
        assert!(session.is_loading(current));
        assert_eq!(session.simulation_id(), Some(second_sim));

        session.complete_load(current, questions(3), Utc::now()).unwrap();
        assert_eq!(session.phase(), SessionPhase::Reviewing);
        assert_eq!(session.state().unwrap().questions().len(), 3);
    }

    #[test]
    fn test_cannot_load_twice() {
        let (mut session, _) = reviewing(2);
        let err = session.begin_load(Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                phase: SessionPhase::Reviewing,
                ..
            }
        ));
    }

    #[test]
    fn test_answer_overwrites_and_keeps_index() {
        let (mut session, qs) = reviewing(3);
        session.answer(qs[1].id, "B".to_string()).unwrap();
        session.answer(qs[1].id, "A".to_string()).unwrap();

        let state = session.state().unwrap();
        assert_eq!(state.answers().get(&qs[1].id), Some(&"A".to_string()));
        assert_eq!(state.answers().len(), 1);
        assert_eq!(state.current_index(), 0);
    }

    #[test]
    fn test_answer_to_unknown_question_is_rejected() {
        let (mut session, _) = reviewing(2);
        let err = session.answer(Uuid::new_v4(), "A".to_string()).unwrap_err();
        assert!(matches!(err, SessionError::UnknownQuestion(_)));
        assert!(session.state().unwrap().answers().is_empty());
    }

    #[test]
    fn test_navigate_within_bounds_only() {
        let (mut session, _) = reviewing(3);
        session.navigate(2).unwrap();
        assert_eq!(session.state().unwrap().current_index(), 2);

        let err = session.navigate(3).unwrap_err();
        assert!(matches!(err, SessionError::OutOfBounds { index: 3, len: 3 }));
        assert_eq!(session.state().unwrap().current_index(), 2);
    }

    #[test]
    fn test_finalize_with_unanswered_question_is_rejected() {
        let (mut session, qs) = reviewing(5);
        for q in &qs[..4] {
            session.answer(q.id, "A".to_string()).unwrap();
        }

        let err = session.finalize(Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, SessionError::Incomplete { unanswered: 1 }));
        assert_eq!(session.phase(), SessionPhase::Reviewing);
        assert!(session.result().is_none());
        assert_eq!(session.state().unwrap().answers().len(), 4);
    }

    #[test]
    fn test_finalize_scores_attempt() {
        let user = Uuid::new_v4();
        let (mut session, qs) = reviewing(4);
        let started = Utc::now();
        for (i, q) in qs.iter().enumerate() {
            let choice = if i == 0 { "B" } else { "A" };
            session.answer(q.id, choice.to_string()).unwrap();
        }

        let record = session
            .finalize(user, started + Duration::minutes(12))
            .unwrap();

        assert_eq!(session.phase(), SessionPhase::Results);
        assert_eq!(record.user_id, user);
        assert_eq!(record.simulation_id, session.simulation_id().unwrap());
        assert_eq!(record.score, 3);
        assert_eq!(record.total_questions, 4);
        assert_eq!(record.percentage, 75.0);
        assert_eq!(record.time_taken_minutes, Some(12));
        assert_eq!(record.answers.0.len(), 4);
        assert_eq!(
            record.answers.0.get(&qs[0].id.to_string()),
            Some(&"B".to_string())
        );
        assert_eq!(session.result(), Some(&record));
    }

    #[test]
    fn test_reopen_restores_reviewing_with_answers() {
        let (mut session, qs) = reviewing(2);
        for q in &qs {
            session.answer(q.id, "A".to_string()).unwrap();
        }
        let record = session.finalize(Uuid::new_v4(), Utc::now()).unwrap();

        assert!(!session.reopen(Uuid::new_v4()));
        assert_eq!(session.phase(), SessionPhase::Results);

        assert!(session.reopen(record.id));
        assert_eq!(session.phase(), SessionPhase::Reviewing);
        assert!(session.result().is_none());
        assert_eq!(session.state().unwrap().answers().len(), 2);

        let again = session.finalize(record.user_id, Utc::now()).unwrap();
        assert_eq!(again.score, 2);
    }

    #[test]
    fn test_results_view_reveals_review() {
        let mut qs = questions(2);
        qs[1].explanation = Some("Because B is wrong".to_string());
        let mut session = QuizSession::new();
        let load = session.begin_load(Uuid::new_v4()).unwrap();
        session.complete_load(load, qs.clone(), Utc::now()).unwrap();
        session.answer(qs[0].id, "A".to_string()).unwrap();
        session.answer(qs[1].id, "B".to_string()).unwrap();
        assert!(session.view().review.is_empty());

        session.finalize(Uuid::new_v4(), Utc::now()).unwrap();
        let review = session.view().review;

        assert_eq!(review.len(), 2);
        assert!(review[0].is_correct);
        assert!(!review[1].is_correct);
        assert_eq!(review[1].chosen.as_deref(), Some("B"));
        assert_eq!(review[1].correct_answer, "A");
        assert_eq!(review[1].explanation.as_deref(), Some("Because B is wrong"));
    }

    #[test]
    fn test_reset_discards_results() {
        let (mut session, qs) = reviewing(1);
        session.answer(qs[0].id, "A".to_string()).unwrap();
        session.finalize(Uuid::new_v4(), Utc::now()).unwrap();

        assert!(session.answer(qs[0].id, "B".to_string()).is_err());

        session.reset();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.state().is_none());
        assert!(session.result().is_none());
        assert!(session.view().questions.is_empty());
    }

    #[test]
    fn test_view_hides_correct_answers() {
        let (session, _) = reviewing(2);
        let json = serde_json::to_value(session.view()).unwrap();
        assert_eq!(json["phase"], "reviewing");
        assert!(json["questions"][0].get("correct_answer").is_none());
        assert!(json.get("review").is_none());
        assert_eq!(json["questions"].as_array().unwrap().len(), 2);
    }
}
