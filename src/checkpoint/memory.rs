use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Checkpoint, CheckpointStore, ThreadSummary};
use crate::errors::{EngineError, EngineResult};

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    threads: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> EngineResult<Option<Checkpoint>> {
        Ok(self.threads.lock().await.get(thread_id).cloned())
    }

    async fn put(
        &self,
        thread_id: &str,
        value: &Checkpoint,
        expected: Option<u64>,
    ) -> EngineResult<()> {
        let mut threads = self.threads.lock().await;
        let actual = threads.get(thread_id).map(|cp| cp.step_seq);
        if actual != expected {
            return Err(EngineError::StaleWrite {
                thread_id: thread_id.to_string(),
                expected,
                actual,
            });
        }
        threads.insert(thread_id.to_string(), value.clone());
        Ok(())
    }

    async fn list(&self) -> EngineResult<Vec<ThreadSummary>> {
        let threads = self.threads.lock().await;
        let mut summaries: Vec<_> = threads
            .iter()
            .map(|(id, cp)| cp.summary(id))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryCheckpointStore::new();
        let cp = Checkpoint::initial("intent");
        store.put("t1", &cp, None).await.unwrap();
        assert_eq!(store.get("t1").await.unwrap(), Some(cp));
        assert!(store.get("t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_twice_is_stale() {
        let store = MemoryCheckpointStore::new();
        let cp = Checkpoint::initial("intent");
        store.put("t1", &cp, None).await.unwrap();
        let err = store.put("t1", &cp, None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::StaleWrite {
                expected: None,
                actual: Some(0),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cas_rejects_second_writer() {
        let store = MemoryCheckpointStore::new();
        let cp = Checkpoint::initial("intent");
        store.put("t1", &cp, None).await.unwrap();

        let a = cp.advance(cp.snapshot.clone(), vec![]);
        let b = cp.advance(cp.snapshot.clone(), vec![]);
        store.put("t1", &a, Some(0)).await.unwrap();
        let err = store.put("t1", &b, Some(0)).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get("t1").await.unwrap().unwrap().step_seq, 1);
    }

    #[tokio::test]
    async fn test_list() {
        let store = MemoryCheckpointStore::new();
        store
            .put("t1", &Checkpoint::initial("one"), None)
            .await
            .unwrap();
        store
            .put("t2", &Checkpoint::initial("two"), None)
            .await
            .unwrap();
        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
    }
}
