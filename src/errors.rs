//! Typed error hierarchy for the tend engine.
//!
//! `EngineError` covers everything the orchestration core can report:
//! - node failures (`Generation`, `Review`) that end a run with `status=failed`
//! - contract violations (`MergeConflict`, `UnroutableStatus`, `UnschedulablePending`,
//!   `InvalidTransition`)
//! - persistence failures (`Persistence`, `StaleWrite`)
//! - caller mistakes (`ThreadNotFound`, `NotAwaitingDecision`, `InvalidInput`)
//!
//! Application glue (CLI, config, server startup) uses `anyhow` instead.

use thiserror::Error;

use crate::blackboard::{Field, Status};
use crate::capability::ReviewAxis;
use crate::engine::NodeId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Draft generation failed: {0}")]
    Generation(String),

    #[error("{axis} review failed: {message}")]
    Review { axis: ReviewAxis, message: String },

    #[error("Sibling deltas both wrote '{field}'")]
    MergeConflict { field: Field },

    #[error("Field '{field}' is set once at creation and cannot be merged")]
    SetOnceField { field: Field },

    #[error("Field '{field}' cannot be stored with its declared reducer")]
    ReducerShape { field: Field },

    #[error("iteration_count cannot decrease ({from} -> {to})")]
    IterationRegression { from: u32, to: u32 },

    #[error("Checkpoint store error: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("Stale write on thread {thread_id}: expected step {expected:?}, found {actual:?}")]
    StaleWrite {
        thread_id: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("No route from {node} for status '{status}'")]
    UnroutableStatus { node: NodeId, status: Status },

    #[error("Thread {thread_id} has an unschedulable pending set {pending:?}")]
    UnschedulablePending {
        thread_id: String,
        pending: Vec<NodeId>,
    },

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("Thread {thread_id} is terminal ({status})")]
    TerminalState { thread_id: String, status: Status },

    #[error("Thread {thread_id} not found")]
    ThreadNotFound { thread_id: String },

    #[error("Thread {thread_id} is not paused at the human gate")]
    NotAwaitingDecision { thread_id: String },

    #[error("Iteration cap of {max} reached; no further drafts allowed")]
    IterationCapReached { max: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Node failures are committed as `status=failed` rather than propagated.
    pub fn is_node_failure(&self) -> bool {
        matches!(self, Self::Generation(_) | Self::Review { .. })
    }

    /// A losing writer should refetch and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StaleWrite { .. })
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
