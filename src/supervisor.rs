//! Rule-based supervisor for the review loop.
//!
//! `decide` is a pure function of the iteration count and the two review
//! scores. Missing scores count as 0.

use serde::{Deserialize, Serialize};

use crate::blackboard::{MAX_SCORE, Status};
use crate::capability::ReviewAxis;
use crate::errors::{EngineError, EngineResult};

pub const SAFETY_THRESHOLD: u8 = 8;
pub const EMPATHY_THRESHOLD: u8 = 8;
pub const MAX_ITERATIONS: u32 = 3;

/// Outcome of one supervisor pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorDecision {
    pub status: Status,
    pub reason: String,
}

impl SupervisorDecision {
    fn new(status: Status, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorPolicy {
    pub safety_threshold: u8,
    pub empathy_threshold: u8,
    pub max_iterations: u32,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            safety_threshold: SAFETY_THRESHOLD,
            empathy_threshold: EMPATHY_THRESHOLD,
            max_iterations: MAX_ITERATIONS,
        }
    }
}

impl SupervisorPolicy {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_iterations == 0 {
            return Err(EngineError::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("safety_threshold", self.safety_threshold),
            ("empathy_threshold", self.empathy_threshold),
        ] {
            if value > MAX_SCORE {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_SCORE, value
                )));
            }
        }
        Ok(())
    }

    pub fn decide(
        &self,
        iteration_count: u32,
        safety_score: Option<u8>,
        empathy_score: Option<u8>,
    ) -> SupervisorDecision {
        let safety = safety_score.unwrap_or(0);
        let empathy = empathy_score.unwrap_or(0);

        // At the cap only safety matters.
        if iteration_count >= self.max_iterations {
            return if safety >= self.safety_threshold {
                SupervisorDecision::new(
                    Status::Completed,
                    "Max iterations reached. Proceeding with current draft as it is safe.",
                )
            } else {
                SupervisorDecision::new(
                    Status::Failed,
                    "Max iterations reached. Draft is unsafe. Aborting.",
                )
            };
        }

        if safety >= self.safety_threshold && empathy >= self.empathy_threshold {
            return SupervisorDecision::new(Status::Completed, "Draft approved by Supervisor.");
        }

        SupervisorDecision::new(
            Status::RevisionNeeded,
            format!(
                "Draft needs revision. Safety: {}, Empathy: {}",
                safety, empathy
            ),
        )
    }

    /// Threshold the reviewer on `axis` must meet.
    pub fn threshold(&self, axis: ReviewAxis) -> u8 {
        match axis {
            ReviewAxis::Safety => self.safety_threshold,
            ReviewAxis::Empathy => self.empathy_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SupervisorPolicy {
        SupervisorPolicy::default()
    }

    #[test]
    fn test_both_scores_pass() {
        let d = policy().decide(1, Some(9), Some(9));
        assert_eq!(d.status, Status::Completed);
        assert_eq!(d.reason, "Draft approved by Supervisor.");
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        assert_eq!(policy().decide(1, Some(8), Some(8)).status, Status::Completed);
        assert_eq!(
            policy().decide(1, Some(8), Some(7)).status,
            Status::RevisionNeeded
        );
    }

    #[test]
    fn test_low_score_requests_revision() {
        let d = policy().decide(1, Some(5), Some(9));
        assert_eq!(d.status, Status::RevisionNeeded);
        assert_eq!(d.reason, "Draft needs revision. Safety: 5, Empathy: 9");
    }

    #[test]
    fn test_missing_scores_count_as_zero() {
        let d = policy().decide(1, None, None);
        assert_eq!(d.status, Status::RevisionNeeded);
        assert!(d.reason.contains("Safety: 0, Empathy: 0"));
    }

    #[test]
    fn test_cap_completes_safe_draft_regardless_of_empathy() {
        let d = policy().decide(3, Some(8), Some(2));
        assert_eq!(d.status, Status::Completed);
        assert!(d.reason.starts_with("Max iterations reached"));
    }

    #[test]
    fn test_cap_fails_unsafe_draft() {
        let d = policy().decide(3, Some(4), Some(10));
        assert_eq!(d.status, Status::Failed);
        assert_eq!(d.reason, "Max iterations reached. Draft is unsafe. Aborting.");
    }

    #[test]
    fn test_validate() {
        assert!(policy().validate().is_ok());
        let zero_cap = SupervisorPolicy {
            max_iterations: 0,
            ..policy()
        };
        assert!(matches!(
            zero_cap.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
        let too_strict = SupervisorPolicy {
            empathy_threshold: 11,
            ..policy()
        };
        assert!(too_strict.validate().is_err());
    }
}
