use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{Checkpoint, CheckpointStore, ThreadSummary};
use crate::db::{DbHandle, TendDb};
use crate::engine::NodeId;
use crate::errors::{EngineError, EngineResult};

/// Outcome of a conditional write.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PutResult {
    Written,
    Stale { actual: Option<u64> },
}

impl TendDb {
    pub(crate) fn load_checkpoint(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.conn
            .query_row(
                "SELECT step_seq, pending, snapshot, updated_at FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
                read_row,
            )
            .optional()
            .context("Failed to query checkpoint")?
            .transpose()
    }

    pub(crate) fn store_checkpoint(
        &self,
        thread_id: &str,
        value: &Checkpoint,
        expected: Option<u64>,
    ) -> Result<PutResult> {
        let pending = serde_json::to_string(&value.pending).context("Failed to encode pending")?;
        let snapshot =
            serde_json::to_string(&value.snapshot).context("Failed to encode snapshot")?;
        let step_seq = i64::try_from(value.step_seq).context("step_seq overflow")?;
        let updated_at = value.updated_at.to_rfc3339();

        let changed = match expected {
            None => self
                .conn
                .execute(
                    "INSERT INTO checkpoints (thread_id, step_seq, pending, snapshot, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(thread_id) DO NOTHING",
                    params![thread_id, step_seq, pending, snapshot, updated_at],
                )
                .context("Failed to insert checkpoint")?,
            Some(prev) => {
                let prev = i64::try_from(prev).context("step_seq overflow")?;
                self.conn
                    .execute(
                        "UPDATE checkpoints
                         SET step_seq = ?2, pending = ?3, snapshot = ?4, updated_at = ?5
                         WHERE thread_id = ?1 AND step_seq = ?6",
                        params![thread_id, step_seq, pending, snapshot, updated_at, prev],
                    )
                    .context("Failed to update checkpoint")?
            }
        };

        if changed == 1 {
            return Ok(PutResult::Written);
        }
        let actual: Option<i64> = self
            .conn
            .query_row(
                "SELECT step_seq FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read current step_seq")?;
        Ok(PutResult::Stale {
            actual: actual.map(|n| n as u64),
        })
    }

    pub(crate) fn list_checkpoints(&self) -> Result<Vec<ThreadSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT thread_id, step_seq, pending, snapshot, updated_at
             FROM checkpoints ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let thread_id: String = row.get(0)?;
            Ok((thread_id, read_row_at(row, 1)))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (thread_id, checkpoint) = row.context("Failed to read checkpoint row")?;
            summaries.push(checkpoint?.summary(&thread_id));
        }
        Ok(summaries)
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<Checkpoint>> {
    Ok(read_row_at(row, 0))
}

/// Decode `step_seq, pending, snapshot, updated_at` starting at column `at`.
fn read_row_at(row: &Row<'_>, at: usize) -> Result<Checkpoint> {
    let step_seq: i64 = row.get(at)?;
    let pending: String = row.get(at + 1)?;
    let snapshot: String = row.get(at + 2)?;
    let updated_at: String = row.get(at + 3)?;

    Ok(Checkpoint {
        snapshot: serde_json::from_str(&snapshot).context("Corrupt snapshot JSON")?,
        pending: serde_json::from_str::<Vec<NodeId>>(&pending).context("Corrupt pending list")?,
        step_seq: u64::try_from(step_seq).context("Negative step_seq")?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .context("Corrupt updated_at")?
            .with_timezone(&Utc),
    })
}

/// Checkpoint store backed by the `checkpoints` table.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: DbHandle,
}

impl SqliteCheckpointStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(DbHandle::open_in_memory()?))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(&self, thread_id: &str) -> EngineResult<Option<Checkpoint>> {
        let id = thread_id.to_string();
        self.db
            .call(move |db| db.load_checkpoint(&id))
            .await
            .map_err(EngineError::Persistence)
    }

    async fn put(
        &self,
        thread_id: &str,
        value: &Checkpoint,
        expected: Option<u64>,
    ) -> EngineResult<()> {
        let id = thread_id.to_string();
        let value = value.clone();
        let result = self
            .db
            .call(move |db| db.store_checkpoint(&id, &value, expected))
            .await
            .map_err(EngineError::Persistence)?;
        match result {
            PutResult::Written => Ok(()),
            PutResult::Stale { actual } => Err(EngineError::StaleWrite {
                thread_id: thread_id.to_string(),
                expected,
                actual,
            }),
        }
    }

    async fn list(&self) -> EngineResult<Vec<ThreadSummary>> {
        self.db
            .call(|db| db.list_checkpoints())
            .await
            .map_err(EngineError::Persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Status;

    #[tokio::test]
    async fn test_round_trip() -> Result<()> {
        let store = SqliteCheckpointStore::open_in_memory()?;
        let cp = Checkpoint::initial("insomnia");
        store.put("t1", &cp, None).await?;

        let loaded = store.get("t1").await?.expect("checkpoint should exist");
        assert_eq!(loaded.snapshot, cp.snapshot);
        assert_eq!(loaded.pending, vec![NodeId::Draft]);
        assert_eq!(loaded.step_seq, 0);
        assert!(store.get("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_cas_update() -> Result<()> {
        let store = SqliteCheckpointStore::open_in_memory()?;
        let cp = Checkpoint::initial("insomnia");
        store.put("t1", &cp, None).await?;

        let mut snapshot = cp.snapshot.clone();
        snapshot.status = Status::ReviewPending;
        let next = cp.advance(snapshot, NodeId::FAN_OUT.to_vec());
        store.put("t1", &next, Some(0)).await?;

        let err = store.put("t1", &next, Some(0)).await.unwrap_err();
        match err {
            EngineError::StaleWrite {
                expected, actual, ..
            } => {
                assert_eq!(expected, Some(0));
                assert_eq!(actual, Some(1));
            }
            other => panic!("expected StaleWrite, got {:?}", other),
        }

        let loaded = store.get("t1").await?.expect("checkpoint should exist");
        assert_eq!(loaded.pending, NodeId::FAN_OUT.to_vec());
        assert_eq!(loaded.snapshot.status, Status::ReviewPending);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_existing_thread_is_stale() -> Result<()> {
        let store = SqliteCheckpointStore::open_in_memory()?;
        let cp = Checkpoint::initial("insomnia");
        store.put("t1", &cp, None).await?;
        let err = store.put("t1", &cp, None).await.unwrap_err();
        assert!(err.is_conflict());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_thread_is_stale() -> Result<()> {
        let store = SqliteCheckpointStore::open_in_memory()?;
        let cp = Checkpoint::initial("insomnia");
        let err = store.put("ghost", &cp, Some(0)).await.unwrap_err();
        assert!(matches!(err, EngineError::StaleWrite { actual: None, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tend.db");
        {
            let store = SqliteCheckpointStore::new(DbHandle::open(&path)?);
            store.put("t1", &Checkpoint::initial("insomnia"), None).await?;
        }
        let store = SqliteCheckpointStore::new(DbHandle::open(&path)?);
        let list = store.list().await?;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].thread_id, "t1");
        assert_eq!(list[0].user_intent, "insomnia");
        Ok(())
    }
}
