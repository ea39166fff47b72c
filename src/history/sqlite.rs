use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{HistoryEntry, HistoryEvent, HistorySink};
use crate::blackboard::Status;
use crate::db::{DbHandle, TendDb};

impl TendDb {
    pub(crate) fn record_history(&self, event: &HistoryEvent) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        match event {
            HistoryEvent::Created { thread_id, intent } => {
                self.conn
                    .execute(
                        "INSERT OR IGNORE INTO history (thread_id, user_intent, status, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![thread_id, intent, Status::Drafting.as_str(), now],
                    )
                    .context("Failed to insert history row")?;
            }
            HistoryEvent::StatusChanged { thread_id, status } => {
                self.conn
                    .execute(
                        "UPDATE history SET status = ?2, updated_at = ?3 WHERE thread_id = ?1",
                        params![thread_id, status.as_str(), now],
                    )
                    .context("Failed to update history status")?;
            }
            HistoryEvent::Completed {
                thread_id,
                artifact,
            } => {
                let artifact =
                    serde_json::to_string(artifact).context("Failed to encode artifact")?;
                self.conn
                    .execute(
                        "UPDATE history SET final_artifact = ?2, updated_at = ?3 WHERE thread_id = ?1",
                        params![thread_id, artifact, now],
                    )
                    .context("Failed to store final artifact")?;
            }
            HistoryEvent::Failed { thread_id } => {
                self.conn
                    .execute(
                        "UPDATE history SET status = ?2, updated_at = ?3 WHERE thread_id = ?1",
                        params![thread_id, Status::Failed.as_str(), now],
                    )
                    .context("Failed to mark history failed")?;
            }
        }
        Ok(())
    }

    pub(crate) fn list_history(&self) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT thread_id, user_intent, status, created_at, updated_at, final_artifact
             FROM history ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (thread_id, user_intent, status, created_at, updated_at, artifact) =
                row.context("Failed to read history row")?;
            entries.push(HistoryEntry {
                thread_id,
                user_intent,
                status: parse_status(&status)?,
                created_at: parse_time(&created_at)?,
                updated_at: parse_time(&updated_at)?,
                final_artifact: artifact
                    .map(|a| serde_json::from_str(&a))
                    .transpose()
                    .context("Corrupt final_artifact JSON")?,
            });
        }
        Ok(entries)
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Corrupt timestamp '{}'", value))?
        .with_timezone(&Utc))
}

fn parse_status(value: &str) -> Result<Status> {
    value.parse().map_err(|e: String| anyhow::anyhow!(e))
}

/// History log backed by the `history` table.
#[derive(Clone)]
pub struct SqliteHistory {
    db: DbHandle,
}

impl SqliteHistory {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HistorySink for SqliteHistory {
    async fn record(&self, event: HistoryEvent) -> Result<()> {
        self.db.call(move |db| db.record_history(&event)).await
    }

    async fn list(&self) -> Result<Vec<HistoryEntry>> {
        self.db.call(|db| db.list_history()).await
    }
}
