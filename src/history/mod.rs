//! Fire-and-forget session log.
//!
//! The engine reports lifecycle events here; a failing sink is logged and
//! ignored. Recording is idempotent per thread id.

mod sqlite;

pub use sqlite::SqliteHistory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blackboard::{Draft, Status};

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    Created { thread_id: String, intent: String },
    StatusChanged { thread_id: String, status: Status },
    Completed { thread_id: String, artifact: Draft },
    Failed { thread_id: String },
}

impl HistoryEvent {
    pub fn thread_id(&self) -> &str {
        match self {
            Self::Created { thread_id, .. }
            | Self::StatusChanged { thread_id, .. }
            | Self::Completed { thread_id, .. }
            | Self::Failed { thread_id } => thread_id,
        }
    }
}

/// One row of the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub thread_id: String,
    pub user_intent: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub final_artifact: Option<Draft>,
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, event: HistoryEvent) -> Result<()>;

    /// Entries, newest first.
    async fn list(&self) -> Result<Vec<HistoryEntry>>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHistory;

#[async_trait]
impl HistorySink for NullHistory {
    async fn record(&self, _event: HistoryEvent) -> Result<()> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<HistoryEntry>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_history_accepts_everything() {
        let sink = NullHistory;
        sink.record(HistoryEvent::Failed {
            thread_id: "t".into(),
        })
        .await
        .unwrap();
        assert!(sink.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_event_thread_id() {
        let event = HistoryEvent::StatusChanged {
            thread_id: "abc".into(),
            status: Status::Completed,
        };
        assert_eq!(event.thread_id(), "abc");
    }
}
