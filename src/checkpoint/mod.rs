//! Durable per-thread checkpoints with compare-and-swap writes.
//!
//! A checkpoint is the whole truth about a thread: the blackboard snapshot,
//! the nodes scheduled next, and a step counter. Writers name the
//! `step_seq` they read; a store only accepts the write if that is still
//! the stored value.

mod memory;
mod sqlite;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blackboard::{Blackboard, Status};
use crate::engine::NodeId;
use crate::errors::EngineResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub snapshot: Blackboard,
    /// Nodes to run next; empty once the thread is done.
    pub pending: Vec<NodeId>,
    pub step_seq: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Fresh thread, scheduled to draft.
    pub fn initial(intent: &str) -> Self {
        Self {
            snapshot: Blackboard::new(intent),
            pending: vec![NodeId::Draft],
            step_seq: 0,
            updated_at: Utc::now(),
        }
    }

    /// The checkpoint that follows this one.
    pub fn advance(&self, snapshot: Blackboard, pending: Vec<NodeId>) -> Self {
        Self {
            snapshot,
            pending,
            step_seq: self.step_seq + 1,
            updated_at: Utc::now(),
        }
    }

    pub fn is_paused_at_gate(&self) -> bool {
        self.pending == [NodeId::HumanGate] && self.snapshot.status == Status::Completed
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn summary(&self, thread_id: &str) -> ThreadSummary {
        ThreadSummary {
            thread_id: thread_id.to_string(),
            user_intent: self.snapshot.user_intent.clone(),
            status: self.snapshot.status,
            iteration_count: self.snapshot.iteration_count,
            pending: self.pending.clone(),
            step_seq: self.step_seq,
            updated_at: self.updated_at,
        }
    }
}

/// Listing row for a stored thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub user_intent: String,
    pub status: Status,
    pub iteration_count: u32,
    pub pending: Vec<NodeId>,
    pub step_seq: u64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, thread_id: &str) -> EngineResult<Option<Checkpoint>>;

    /// Write `value` if the stored `step_seq` equals `expected`
    /// (`None`: the thread must not exist yet). Otherwise `StaleWrite`.
    async fn put(
        &self,
        thread_id: &str,
        value: &Checkpoint,
        expected: Option<u64>,
    ) -> EngineResult<()>;

    /// All threads, most recently updated first.
    async fn list(&self) -> EngineResult<Vec<ThreadSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_checkpoint_schedules_draft() {
        let cp = Checkpoint::initial("grief");
        assert_eq!(cp.pending, vec![NodeId::Draft]);
        assert_eq!(cp.step_seq, 0);
        assert_eq!(cp.snapshot.status, Status::Drafting);
        assert!(!cp.is_paused_at_gate());
    }

    #[test]
    fn test_advance_bumps_step_seq() {
        let cp = Checkpoint::initial("grief");
        let next = cp.advance(cp.snapshot.clone(), vec![]);
        assert_eq!(next.step_seq, 1);
        assert!(next.is_finished());
    }

    #[test]
    fn test_gate_pause_needs_completed_status() {
        let cp = Checkpoint::initial("grief");
        let at_gate = cp.advance(cp.snapshot.clone(), vec![NodeId::HumanGate]);
        assert!(!at_gate.is_paused_at_gate());

        let mut snapshot = cp.snapshot.clone();
        snapshot.status = Status::Completed;
        let paused = cp.advance(snapshot, vec![NodeId::HumanGate]);
        assert!(paused.is_paused_at_gate());
    }

    #[test]
    fn test_checkpoint_json_shape() {
        let cp = Checkpoint::initial("grief");
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["pending"], serde_json::json!(["draft"]));
        assert_eq!(json["snapshot"]["user_intent"], "grief");
    }
}
