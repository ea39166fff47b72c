//! Shared session record and its merge rules.
//!
//! Nodes never mutate a [`Blackboard`] directly. Each one reads an
//! immutable snapshot and returns a [`Delta`]; the engine merges the delta
//! with [`Blackboard::apply`], which enforces the per-field reducers and the
//! status transition graph.

mod delta;
mod draft;
mod status;

pub use delta::{Delta, Field, Reducer};
pub use draft::{AgentNote, Draft};
pub use status::Status;

use serde::{Deserialize, Serialize};

use delta::absorb_field;

use crate::errors::{EngineError, EngineResult};

/// Highest score a reviewer may assign.
pub const MAX_SCORE: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    pub user_intent: String,
    pub current_draft: Option<Draft>,
    #[serde(default)]
    pub draft_history: Vec<Draft>,
    #[serde(default)]
    pub scratchpad: Vec<AgentNote>,
    pub iteration_count: u32,
    pub safety_score: Option<u8>,
    pub empathy_score: Option<u8>,
    #[serde(default)]
    pub critique_feedback: Vec<String>,
    #[serde(default)]
    pub safety_feedback: Vec<String>,
    pub status: Status,
    pub human_feedback: Option<String>,
    pub human_approved: Option<bool>,
}

impl Blackboard {
    pub fn new(user_intent: impl Into<String>) -> Self {
        Self {
            user_intent: user_intent.into(),
            current_draft: None,
            draft_history: Vec::new(),
            scratchpad: Vec::new(),
            iteration_count: 0,
            safety_score: None,
            empathy_score: None,
            critique_feedback: Vec::new(),
            safety_feedback: Vec::new(),
            status: Status::Drafting,
            human_feedback: None,
            human_approved: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a delta. Either the whole delta lands or nothing changes.
    ///
    /// Each field is folded in by the reducer [`Field::reducer`] declares for it.
    pub fn apply(&mut self, delta: Delta) -> EngineResult<()> {
        self.check(&delta)?;

        let Delta {
            user_intent,
            current_draft,
            draft_history,
            scratchpad,
            iteration_count,
            safety_score,
            empathy_score,
            critique_feedback,
            safety_feedback,
            status,
            human_feedback,
            human_approved,
        } = delta;

        let board = self.clone();
        let next = Blackboard {
            user_intent: absorb_scalar(Field::UserIntent, board.user_intent, user_intent)?,
            current_draft: absorb_field(Field::CurrentDraft, board.current_draft, current_draft)?,
            draft_history: absorb_field(Field::DraftHistory, board.draft_history, draft_history)?,
            scratchpad: absorb_field(Field::Scratchpad, board.scratchpad, scratchpad)?,
            iteration_count: absorb_scalar(
                Field::IterationCount,
                board.iteration_count,
                iteration_count,
            )?,
            safety_score: absorb_field(Field::SafetyScore, board.safety_score, safety_score)?,
            empathy_score: absorb_field(Field::EmpathyScore, board.empathy_score, empathy_score)?,
            critique_feedback: absorb_field(
                Field::CritiqueFeedback,
                board.critique_feedback,
                critique_feedback,
            )?,
            safety_feedback: absorb_field(
                Field::SafetyFeedback,
                board.safety_feedback,
                safety_feedback,
            )?,
            status: absorb_scalar(Field::Status, board.status, status)?,
            human_feedback: absorb_field(
                Field::HumanFeedback,
                board.human_feedback,
                human_feedback,
            )?,
            human_approved: absorb_field(
                Field::HumanApproved,
                board.human_approved,
                human_approved,
            )?,
        };
        *self = next;
        Ok(())
    }

    fn check(&self, delta: &Delta) -> EngineResult<()> {
        if self.is_terminal() && !delta.is_empty() {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: delta.status.unwrap_or(self.status),
            });
        }
        if let Some(to) = delta.iteration_count
            && to < self.iteration_count
        {
            return Err(EngineError::IterationRegression {
                from: self.iteration_count,
                to,
            });
        }
        for score in [delta.safety_score, delta.empathy_score].into_iter().flatten() {
            if score > MAX_SCORE {
                return Err(EngineError::InvalidInput(format!(
                    "score {} exceeds {}",
                    score, MAX_SCORE
                )));
            }
        }
        if let Some(to) = delta.status
            && !self.status.can_transition_to(to)
        {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}

/// [`absorb_field`] for a field the blackboard stores without an `Option`.
fn absorb_scalar<T>(field: Field, current: T, update: Option<T>) -> EngineResult<T> {
    match absorb_field(field, None, update)? {
        Some(value) => Ok(value),
        None => Ok(current),
    }
}
