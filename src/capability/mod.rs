//! Capability contracts the engine drives.
//!
//! The engine knows nothing about how drafts and reviews are produced; it
//! calls [`DraftService`] and [`ReviewService`] and checks that what comes
//! back honours the contract. [`command::CommandCapability`] is the
//! production adapter; [`scripted`] holds deterministic stand-ins.

pub mod command;
pub mod prompts;
pub mod scripted;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::blackboard::{Blackboard, Draft, MAX_SCORE};

/// Everything the drafter needs to produce the next draft.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftRequest {
    pub intent: String,
    pub current_draft: Option<Draft>,
    pub critique_feedback: Vec<String>,
    pub safety_feedback: Vec<String>,
}

impl DraftRequest {
    pub fn from_blackboard(board: &Blackboard) -> Self {
        Self {
            intent: board.user_intent.clone(),
            current_draft: board.current_draft.clone(),
            critique_feedback: board.critique_feedback.clone(),
            safety_feedback: board.safety_feedback.clone(),
        }
    }

    pub fn is_revision(&self) -> bool {
        self.current_draft.is_some()
    }
}

/// Which reviewer is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAxis {
    Safety,
    Empathy,
}

impl ReviewAxis {
    pub const ALL: [ReviewAxis; 2] = [Self::Safety, Self::Empathy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safety => "safety",
            Self::Empathy => "empathy",
        }
    }

    /// Scratchpad author for this reviewer.
    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::Safety => "SafetyGuardian",
            Self::Empathy => "ClinicalCritic",
        }
    }

    /// Prefix of the feedback entry written below threshold.
    pub fn feedback_label(&self) -> &'static str {
        match self {
            Self::Safety => "Safety Issues",
            Self::Empathy => "Clinical Feedback",
        }
    }
}

impl fmt::Display for ReviewAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safety" => Ok(Self::Safety),
            "empathy" => Ok(Self::Empathy),
            _ => Err(format!("Invalid review axis: {}", s)),
        }
    }
}

/// A reviewer's verdict on one axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub score: u8,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl Review {
    pub fn new(score: u8, issues: Vec<String>) -> Self {
        Self { score, issues }
    }

    /// Scores are 0..=10 and a score below `threshold` must say why.
    pub fn check_contract(&self, threshold: u8) -> Result<(), String> {
        if self.score > MAX_SCORE {
            return Err(format!("score {} is outside 0..={}", self.score, MAX_SCORE));
        }
        if self.score < threshold && self.issues.iter().all(|i| i.trim().is_empty()) {
            return Err(format!(
                "score {} is below {} but no issues were given",
                self.score, threshold
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait DraftService: Send + Sync {
    async fn draft(&self, request: DraftRequest) -> Result<Draft>;
}

#[async_trait]
pub trait ReviewService: Send + Sync {
    async fn review(&self, axis: ReviewAxis, draft: &Draft) -> Result<Review>;
}
