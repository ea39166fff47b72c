use std::fmt;

use crate::errors::{EngineError, EngineResult};

use super::draft::{AgentNote, Draft};
use super::status::Status;

/// How a field absorbs a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// Written at creation; never carried by a delta
    SetOnce,
    /// Last write wins
    Overwrite,
    /// Existing items kept, new items appended
    Append,
}

/// Blackboard fields, one variant each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    UserIntent,
    CurrentDraft,
    DraftHistory,
    Scratchpad,
    IterationCount,
    SafetyScore,
    EmpathyScore,
    CritiqueFeedback,
    SafetyFeedback,
    Status,
    HumanFeedback,
    HumanApproved,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Self::UserIntent,
        Self::CurrentDraft,
        Self::DraftHistory,
        Self::Scratchpad,
        Self::IterationCount,
        Self::SafetyScore,
        Self::EmpathyScore,
        Self::CritiqueFeedback,
        Self::SafetyFeedback,
        Self::Status,
        Self::HumanFeedback,
        Self::HumanApproved,
    ];

    pub const fn reducer(self) -> Reducer {
        match self {
            Self::UserIntent => Reducer::SetOnce,
            Self::CurrentDraft
            | Self::IterationCount
            | Self::SafetyScore
            | Self::EmpathyScore
            | Self::Status
            | Self::HumanFeedback
            | Self::HumanApproved => Reducer::Overwrite,
            Self::DraftHistory
            | Self::Scratchpad
            | Self::CritiqueFeedback
            | Self::SafetyFeedback => Reducer::Append,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserIntent => "user_intent",
            Self::CurrentDraft => "current_draft",
            Self::DraftHistory => "draft_history",
            Self::Scratchpad => "scratchpad",
            Self::IterationCount => "iteration_count",
            Self::SafetyScore => "safety_score",
            Self::EmpathyScore => "empathy_score",
            Self::CritiqueFeedback => "critique_feedback",
            Self::SafetyFeedback => "safety_feedback",
            Self::Status => "status",
            Self::HumanFeedback => "human_feedback",
            Self::HumanApproved => "human_approved",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial update returned by a node.
///
/// Overwrite fields use `None` for "not touched"; append fields use an
/// empty vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub user_intent: Option<String>,
    pub current_draft: Option<Draft>,
    pub draft_history: Vec<Draft>,
    pub scratchpad: Vec<AgentNote>,
    pub iteration_count: Option<u32>,
    pub safety_score: Option<u8>,
    pub empathy_score: Option<u8>,
    pub critique_feedback: Vec<String>,
    pub safety_feedback: Vec<String>,
    pub status: Option<Status>,
    pub human_feedback: Option<String>,
    pub human_approved: Option<bool>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scratchpad note.
    pub fn with_note(mut self, agent_name: &str, content: impl Into<String>) -> Self {
        self.scratchpad.push(AgentNote::new(agent_name, content));
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn touches(&self, field: Field) -> bool {
        match field {
            Field::UserIntent => self.user_intent.is_some(),
            Field::CurrentDraft => self.current_draft.is_some(),
            Field::DraftHistory => !self.draft_history.is_empty(),
            Field::Scratchpad => !self.scratchpad.is_empty(),
            Field::IterationCount => self.iteration_count.is_some(),
            Field::SafetyScore => self.safety_score.is_some(),
            Field::EmpathyScore => self.empathy_score.is_some(),
            Field::CritiqueFeedback => !self.critique_feedback.is_empty(),
            Field::SafetyFeedback => !self.safety_feedback.is_empty(),
            Field::Status => self.status.is_some(),
            Field::HumanFeedback => self.human_feedback.is_some(),
            Field::HumanApproved => self.human_approved.is_some(),
        }
    }

    /// Fields this delta writes, in declaration order.
    pub fn touched(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| self.touches(*f))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.touched().is_empty()
    }

    /// Combine two sibling deltas from one fan-out.
    ///
    /// Every field goes through [`join_field`] under its declared reducer:
    /// append fields concatenate `self` then `other`, and any overwrite or
    /// set-once field written by both is a `MergeConflict`.
    pub fn join(self, other: Delta) -> EngineResult<Delta> {
        Ok(Delta {
            user_intent: join_field(Field::UserIntent, self.user_intent, other.user_intent)?,
            current_draft: join_field(
                Field::CurrentDraft,
                self.current_draft,
                other.current_draft,
            )?,
            draft_history: join_field(
                Field::DraftHistory,
                self.draft_history,
                other.draft_history,
            )?,
            scratchpad: join_field(Field::Scratchpad, self.scratchpad, other.scratchpad)?,
            iteration_count: join_field(
                Field::IterationCount,
                self.iteration_count,
                other.iteration_count,
            )?,
            safety_score: join_field(Field::SafetyScore, self.safety_score, other.safety_score)?,
            empathy_score: join_field(
                Field::EmpathyScore,
                self.empathy_score,
                other.empathy_score,
            )?,
            critique_feedback: join_field(
                Field::CritiqueFeedback,
                self.critique_feedback,
                other.critique_feedback,
            )?,
            safety_feedback: join_field(
                Field::SafetyFeedback,
                self.safety_feedback,
                other.safety_feedback,
            )?,
            status: join_field(Field::Status, self.status, other.status)?,
            human_feedback: join_field(
                Field::HumanFeedback,
                self.human_feedback,
                other.human_feedback,
            )?,
            human_approved: join_field(
                Field::HumanApproved,
                self.human_approved,
                other.human_approved,
            )?,
        })
    }
}

/// Storage shape of one field inside a [`Delta`] or [`Blackboard`](super::Blackboard).
///
/// Scalars live in `Option`, sequences in `Vec`. Only sequences can append.
pub(super) trait Slot: Sized {
    fn is_set(&self) -> bool;

    /// `other` where it is set, otherwise `self`.
    fn replace(self, other: Self) -> Self;

    /// `self` followed by `other`; `None` if the shape has no order.
    fn concat(self, other: Self) -> Option<Self>;
}

impl<T> Slot for Option<T> {
    fn is_set(&self) -> bool {
        self.is_some()
    }

    fn replace(self, other: Self) -> Self {
        other.or(self)
    }

    fn concat(self, _other: Self) -> Option<Self> {
        None
    }
}

impl<T> Slot for Vec<T> {
    fn is_set(&self) -> bool {
        !self.is_empty()
    }

    fn replace(self, other: Self) -> Self {
        if other.is_empty() { self } else { other }
    }

    fn concat(mut self, other: Self) -> Option<Self> {
        self.extend(other);
        Some(self)
    }
}

/// Join two sibling writes of `field`.
pub(super) fn join_field<S: Slot>(field: Field, a: S, b: S) -> EngineResult<S> {
    match field.reducer() {
        Reducer::Append => a.concat(b).ok_or(EngineError::ReducerShape { field }),
        Reducer::Overwrite | Reducer::SetOnce if a.is_set() && b.is_set() => {
            Err(EngineError::MergeConflict { field })
        }
        Reducer::Overwrite | Reducer::SetOnce => Ok(a.replace(b)),
    }
}

/// Fold a delta's write of `field` into the stored value.
pub(super) fn absorb_field<S: Slot>(field: Field, current: S, update: S) -> EngineResult<S> {
    if !update.is_set() {
        return Ok(current);
    }
    match field.reducer() {
        Reducer::SetOnce => Err(EngineError::SetOnceField { field }),
        Reducer::Overwrite => Ok(current.replace(update)),
        Reducer::Append => current
            .concat(update)
            .ok_or(EngineError::ReducerShape { field }),
    }
}
