//! Human decisions at the gate.
//!
//! A thread pauses with `pending = [human_gate]` and `status = completed`.
//! Nothing about the pause lives in memory: [`InterruptController::resume`]
//! reads the persisted checkpoint, applies the decision and schedules what
//! comes next. Anything other than a paused thread is refused without a
//! write, so replaying an applied decision is harmless.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::blackboard::{Delta, Draft, Status};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::engine::{NodeId, Route, RoutingTable, ThreadLocks, commit};
use crate::errors::{EngineError, EngineResult};
use crate::history::HistorySink;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Accept the draft, optionally replacing it with an edited version.
    Approve { modified_draft: Option<Draft> },
    /// Send the draft back to the drafter with reviewer feedback.
    Revise { feedback: String },
}

/// Wire form of a decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeInput {
    pub action: String,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub modified_draft: Option<Draft>,
}

impl TryFrom<ResumeInput> for Decision {
    type Error = EngineError;

    fn try_from(input: ResumeInput) -> Result<Self, Self::Error> {
        match input.action.trim() {
            "approve" => Ok(Decision::Approve {
                modified_draft: input.modified_draft,
            }),
            "revise" => match input.feedback {
                Some(feedback) if !feedback.trim().is_empty() => Ok(Decision::Revise { feedback }),
                _ => Err(EngineError::InvalidInput(
                    "revise requires non-empty feedback".into(),
                )),
            },
            other => Err(EngineError::InvalidInput(format!(
                "unknown action '{}' (expected approve or revise)",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct InterruptController {
    store: Arc<dyn CheckpointStore>,
    history: Arc<dyn HistorySink>,
    routes: Arc<RoutingTable>,
    locks: ThreadLocks,
    max_iterations: u32,
}

impl InterruptController {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        history: Arc<dyn HistorySink>,
        routes: Arc<RoutingTable>,
        locks: ThreadLocks,
        max_iterations: u32,
    ) -> Self {
        Self {
            store,
            history,
            routes,
            locks,
            max_iterations,
        }
    }

    /// Apply `decision` to a thread paused at the gate.
    #[instrument(skip(self, decision))]
    pub async fn resume(&self, thread_id: &str, decision: Decision) -> EngineResult<Checkpoint> {
        let _guard = self.locks.acquire(thread_id).await;

        let current = self
            .store
            .get(thread_id)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })?;
        if !current.is_paused_at_gate() {
            return Err(EngineError::NotAwaitingDecision {
                thread_id: thread_id.to_string(),
            });
        }

        let delta = match decision {
            Decision::Approve { modified_draft } => {
                if let Some(draft) = &modified_draft {
                    draft.validate().map_err(EngineError::InvalidInput)?;
                }
                Delta {
                    current_draft: modified_draft,
                    human_approved: Some(true),
                    status: Some(Status::Approved),
                    ..Delta::default()
                }
                .with_note("Human", "Human approved the draft.")
            }
            Decision::Revise { feedback } => {
                let feedback = feedback.trim().to_string();
                if feedback.is_empty() {
                    return Err(EngineError::InvalidInput(
                        "revise requires non-empty feedback".into(),
                    ));
                }
                if current.snapshot.iteration_count >= self.max_iterations {
                    return Err(EngineError::IterationCapReached {
                        max: self.max_iterations,
                    });
                }
                Delta {
                    human_approved: Some(false),
                    human_feedback: Some(feedback.clone()),
                    critique_feedback: vec![format!("Human Reviewer: {}", feedback)],
                    status: Some(Status::RevisionNeeded),
                    ..Delta::default()
                }
                .with_note("Human", format!("Human feedback: {}", feedback))
            }
        };

        let status = delta.status.unwrap_or(current.snapshot.status);
        let pending = match self.routes.route(NodeId::HumanGate, status)? {
            Route::Node(node) => vec![node],
            Route::Terminal => Vec::new(),
            Route::Await => vec![NodeId::HumanGate],
        };

        let next = commit(
            self.store.as_ref(),
            self.history.as_ref(),
            thread_id,
            &current,
            delta,
            pending,
        )
        .await?;
        info!(thread_id, status = %next.snapshot.status, "decision applied");
        Ok(next)
    }
}
