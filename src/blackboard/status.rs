use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a session blackboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Fresh session, no draft yet
    #[default]
    Drafting,
    /// A draft exists and is waiting on (or under) review
    ReviewPending,
    /// Reviews or the human asked for another draft
    RevisionNeeded,
    /// Supervisor accepted the draft; waiting at the human gate
    Completed,
    /// Human approved the draft
    Approved,
    /// Node failure or unsafe draft at the iteration cap
    Failed,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Self::Drafting,
        Self::ReviewPending,
        Self::RevisionNeeded,
        Self::Completed,
        Self::Approved,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::ReviewPending => "review_pending",
            Self::RevisionNeeded => "revision_needed",
            Self::Completed => "completed",
            Self::Approved => "approved",
            Self::Failed => "failed",
        }
    }

    /// Terminal blackboards accept no further node-originated mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Failed)
    }

    /// The closed status transition graph.
    ///
    /// `drafting → review_pending → (revision_needed → review_pending)* →
    /// {completed → approved | failed}`, plus the human gate sending a
    /// completed draft back with `revision_needed`.
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        match self {
            Drafting => matches!(next, ReviewPending | Failed),
            ReviewPending => matches!(next, RevisionNeeded | Completed | Failed),
            RevisionNeeded => matches!(next, ReviewPending | Failed),
            Completed => matches!(next, Approved | RevisionNeeded),
            Approved | Failed => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drafting" => Ok(Self::Drafting),
            "review_pending" => Ok(Self::ReviewPending),
            "revision_needed" => Ok(Self::RevisionNeeded),
            "completed" => Ok(Self::Completed),
            "approved" => Ok(Self::Approved),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}
