//! Step-per-poll event stream over a thread.
//!
//! Every poll that reaches the engine runs one step. Because state lives in
//! the store, dropping the stream and calling [`GraphEngine::stream`] again
//! carries on from the last commit.

use std::collections::VecDeque;

use futures::Stream;
use serde::{Deserialize, Serialize};

use super::{GraphEngine, NodeId, Next};
use crate::blackboard::{Blackboard, Status};
use crate::errors::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// State after a committed step.
    Snapshot {
        step_seq: u64,
        nodes: Vec<NodeId>,
        state: Blackboard,
    },
    /// Run ended normally.
    Completed { status: Status },
    /// Run is paused before `next`.
    Interrupt { next: NodeId },
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Snapshot { .. })
    }
}

struct Cursor {
    engine: GraphEngine,
    thread_id: String,
    queued: VecDeque<StreamEvent>,
    done: bool,
}

impl Cursor {
    async fn pull(&mut self) {
        let outcome = match self.engine.step(&self.thread_id).await {
            Ok(outcome) => outcome,
            Err(EngineError::TerminalState { status, .. }) => {
                self.finish(StreamEvent::Completed { status });
                return;
            }
            Err(err) => {
                self.finish(StreamEvent::Error {
                    message: err.to_string(),
                });
                return;
            }
        };

        let cp = outcome.checkpoint;
        // A step that committed nothing (a thread already paused) has no snapshot.
        if !outcome.ran.is_empty() {
            self.queued.push_back(StreamEvent::Snapshot {
                step_seq: cp.step_seq,
                nodes: outcome.ran,
                state: cp.snapshot.clone(),
            });
        }

        match outcome.next {
            Next::Nodes(_) => {}
            Next::Interrupted(next) => self.finish(StreamEvent::Interrupt { next }),
            Next::Finished => self.finish(StreamEvent::Completed {
                status: cp.snapshot.status,
            }),
            Next::Failed(message) => self.finish(StreamEvent::Error { message }),
        }
    }

    fn finish(&mut self, event: StreamEvent) {
        self.queued.push_back(event);
        self.done = true;
    }
}

impl GraphEngine {
    /// Lazily drive `thread_id`, one step per event.
    pub fn stream(
        &self,
        thread_id: &str,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static + use<> {
        let cursor = Cursor {
            engine: self.clone(),
            thread_id: thread_id.to_string(),
            queued: VecDeque::new(),
            done: false,
        };
        futures::stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(event) = cursor.queued.pop_front() {
                    return Some((event, cursor));
                }
                if cursor.done {
                    return None;
                }
                cursor.pull().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;

    use super::*;
    use crate::capability::ReviewAxis;
    use crate::capability::scripted::{ScriptedDrafter, ScriptedReviewer};
    use crate::checkpoint::MemoryCheckpointStore;

    fn engine(reviewer: ScriptedReviewer) -> GraphEngine {
        GraphEngine::builder(
            Arc::new(ScriptedDrafter::new()),
            Arc::new(reviewer),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_stream_to_interrupt() {
        let engine = engine(ScriptedReviewer::new());
        let id = engine.start("fear of dogs").await.unwrap();
        let events: Vec<_> = engine.stream(&id).collect().await;

        let types: Vec<_> = events
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["snapshot", "snapshot", "snapshot", "interrupt"]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Interrupt {
                next: NodeId::HumanGate
            })
        );
    }

    #[tokio::test]
    async fn test_restarted_stream_resumes_from_store() {
        let engine = engine(ScriptedReviewer::new());
        let id = engine.start("fear of dogs").await.unwrap();

        let first: Vec<_> = engine.stream(&id).take(1).collect().await;
        assert!(matches!(first[0], StreamEvent::Snapshot { step_seq: 1, .. }));

        let rest: Vec<_> = engine.stream(&id).collect().await;
        match &rest[0] {
            StreamEvent::Snapshot { step_seq, nodes, .. } => {
                assert_eq!(*step_seq, 2);
                assert_eq!(nodes, &NodeId::FAN_OUT.to_vec());
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert!(rest.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_restreaming_paused_thread_only_reports_interrupt() {
        let engine = engine(ScriptedReviewer::new());
        let id = engine.start("fear of dogs").await.unwrap();
        let first: Vec<_> = engine.stream(&id).collect().await;
        assert_eq!(first.len(), 4);
        let paused_at = engine.get(&id).await.unwrap().step_seq;

        let again: Vec<_> = engine.stream(&id).collect().await;
        assert_eq!(
            again,
            vec![StreamEvent::Interrupt {
                next: NodeId::HumanGate
            }]
        );
        assert_eq!(engine.get(&id).await.unwrap().step_seq, paused_at);
    }

    #[tokio::test]
    async fn test_failed_run_ends_with_error() {
        let engine = engine(ScriptedReviewer::new().with_scores(ReviewAxis::Safety, &[4]));
        let id = engine.start("fear of dogs").await.unwrap();
        let events: Vec<_> = engine.stream(&id).collect().await;
        match events.last() {
            Some(StreamEvent::Error { message }) => {
                assert!(message.contains("Max iterations reached"))
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_of_finished_thread_reports_completion() {
        let engine = engine(ScriptedReviewer::new());
        let id = engine.start("fear of dogs").await.unwrap();
        engine.run_to_completion(&id).await.unwrap();

        let events: Vec<_> = engine.stream(&id).collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::Completed {
                status: Status::Completed
            }]
        );
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(StreamEvent::Error {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "message": "boom"}));
    }
}
