//! End-to-end engine scenarios driven through the public API with scripted
//! capabilities.

use std::sync::Arc;
use std::time::Duration;

use tend::blackboard::Status;
use tend::capability::ReviewAxis;
use tend::capability::scripted::{Scripted, ScriptedDrafter, ScriptedReviewer, sample_draft};
use tend::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use tend::db::DbHandle;
use tend::engine::{GraphEngine, Next, NodeId, RunOutcome};
use tend::errors::EngineError;
use tend::history::{HistorySink, SqliteHistory};
use tend::interrupt::Decision;

struct Harness {
    engine: GraphEngine,
    drafter: Arc<ScriptedDrafter>,
    store: Arc<MemoryCheckpointStore>,
}

fn harness(reviewer: ScriptedReviewer) -> Harness {
    let drafter = Arc::new(ScriptedDrafter::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let engine = GraphEngine::builder(drafter.clone(), Arc::new(reviewer), store.clone())
        .build()
        .unwrap();
    Harness {
        engine,
        drafter,
        store,
    }
}

fn approve() -> Decision {
    Decision::Approve {
        modified_draft: None,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn test_first_draft_accepted_halts_at_gate() {
        let h = harness(ScriptedReviewer::new());
        let id = h.engine.start("fear of elevators").await.unwrap();

        let outcome = h.engine.run_to_next_interrupt(&id).await.unwrap();
        match &outcome {
            RunOutcome::Interrupted { next, .. } => assert_eq!(*next, NodeId::HumanGate),
            other => panic!("expected interrupt, got {:?}", other),
        }

        let cp = outcome.checkpoint();
        assert_eq!(cp.snapshot.status, Status::Completed);
        assert_eq!(cp.snapshot.iteration_count, 1);
        assert_eq!(cp.snapshot.draft_history.len(), 1);
        assert_eq!(cp.snapshot.safety_score, Some(9));
        assert_eq!(cp.snapshot.empathy_score, Some(9));
        assert_eq!(cp.pending, vec![NodeId::HumanGate]);
        assert!(cp.is_paused_at_gate());
    }

    #[tokio::test]
    async fn test_unsafe_first_draft_is_revised() {
        let h = harness(ScriptedReviewer::new().with_scores(ReviewAxis::Safety, &[5, 9]));
        let id = h.engine.start("fear of elevators").await.unwrap();

        let outcome = h.engine.run_to_next_interrupt(&id).await.unwrap();
        let board = &outcome.checkpoint().snapshot;
        assert_eq!(board.status, Status::Completed);
        assert_eq!(board.iteration_count, 2);
        assert_eq!(board.draft_history.len(), 2);
        assert_eq!(board.safety_feedback.len(), 1);
        assert!(board.safety_feedback[0].starts_with("Safety Issues: "));
        assert!(
            board
                .scratchpad
                .iter()
                .any(|n| n.content == "Draft needs revision. Safety: 5, Empathy: 9")
        );

        let requests = h.drafter.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].is_revision());
        assert!(requests[1].is_revision());
        assert_eq!(requests[1].safety_feedback, board.safety_feedback);
    }

    #[tokio::test]
    async fn test_persistently_unsafe_draft_fails_at_cap() {
        let h = harness(ScriptedReviewer::new().with_scores(ReviewAxis::Safety, &[4]));
        let id = h.engine.start("fear of elevators").await.unwrap();

        let outcome = h.engine.run_to_next_interrupt(&id).await.unwrap();
        match &outcome {
            RunOutcome::Failed { message, .. } => {
                assert_eq!(message, "Max iterations reached. Draft is unsafe. Aborting.")
            }
            other => panic!("expected failure, got {:?}", other),
        }
        let cp = outcome.checkpoint();
        assert_eq!(cp.snapshot.status, Status::Failed);
        assert_eq!(cp.snapshot.iteration_count, 3);
        assert!(cp.pending.is_empty());
        assert_eq!(h.drafter.calls(), 3);

        // Failed is terminal: nothing more runs.
        assert!(matches!(
            h.engine.step(&id).await,
            Err(EngineError::TerminalState {
                status: Status::Failed,
                ..
            })
        ));
        assert_eq!(h.drafter.calls(), 3);
    }

    #[tokio::test]
    async fn test_human_revision_reenters_draft() {
        let h = harness(ScriptedReviewer::new());
        let id = h.engine.start("fear of elevators").await.unwrap();
        h.engine.run_to_next_interrupt(&id).await.unwrap();

        let cp = h
            .engine
            .interrupts()
            .resume(
                &id,
                Decision::Revise {
                    feedback: "too intense".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(cp.snapshot.status, Status::RevisionNeeded);
        assert_eq!(cp.snapshot.human_feedback.as_deref(), Some("too intense"));
        assert_eq!(cp.snapshot.human_approved, Some(false));
        assert_eq!(cp.pending, vec![NodeId::Draft]);

        let draft_step = h.engine.step(&id).await.unwrap();
        assert_eq!(draft_step.ran, vec![NodeId::Draft]);
        assert_eq!(draft_step.checkpoint.snapshot.iteration_count, 2);

        let requests = h.drafter.requests().await;
        assert!(
            requests[1]
                .critique_feedback
                .contains(&"Human Reviewer: too intense".to_string())
        );

        let outcome = h.engine.run_to_next_interrupt(&id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Interrupted { .. }));
        assert_eq!(outcome.checkpoint().snapshot.draft_history.len(), 2);
    }

    #[tokio::test]
    async fn test_approval_ends_run() {
        let h = harness(ScriptedReviewer::new());
        let id = h.engine.start("fear of elevators").await.unwrap();
        h.engine.run_to_next_interrupt(&id).await.unwrap();

        let mut edited = sample_draft(1);
        edited.title = "Gentle Exposure Ladder".into();
        let cp = h
            .engine
            .interrupts()
            .resume(
                &id,
                Decision::Approve {
                    modified_draft: Some(edited.clone()),
                },
            )
            .await
            .unwrap();

        assert_eq!(cp.snapshot.status, Status::Approved);
        assert_eq!(cp.snapshot.human_approved, Some(true));
        assert_eq!(cp.snapshot.current_draft, Some(edited));
        assert!(cp.pending.is_empty());
        // The edit replaces the current draft only.
        assert_eq!(cp.snapshot.draft_history.len(), 1);
    }
}

// =============================================================================
// Invariants
// =============================================================================

mod invariants {
    use super::*;

    #[tokio::test]
    async fn test_iteration_and_history_bounds_hold_every_step() {
        let h = harness(
            ScriptedReviewer::new()
                .with_scores(ReviewAxis::Safety, &[5, 6, 9])
                .with_scores(ReviewAxis::Empathy, &[9, 4, 9]),
        );
        let id = h.engine.start("fear of elevators").await.unwrap();
        let mut previous = h.engine.get(&id).await.unwrap().snapshot.status;

        loop {
            let outcome = h.engine.step(&id).await.unwrap();
            let board = &outcome.checkpoint.snapshot;
            if outcome.ran == vec![NodeId::Draft] {
                assert!(board.iteration_count >= 1 && board.iteration_count <= 3);
                assert_eq!(board.draft_history.len() as u32, board.iteration_count);
            }
            assert!(
                board.status == previous || previous.can_transition_to(board.status),
                "illegal transition {} -> {}",
                previous,
                board.status
            );
            previous = board.status;
            if !matches!(outcome.next, Next::Nodes(_)) {
                break;
            }
        }

        let cp = h.engine.get(&id).await.unwrap();
        assert_eq!(cp.snapshot.iteration_count, 3);
        assert!(cp.is_paused_at_gate());
    }

    #[tokio::test]
    async fn test_replayed_approval_is_a_no_op() {
        let h = harness(ScriptedReviewer::new());
        let id = h.engine.start("fear of elevators").await.unwrap();
        h.engine.run_to_next_interrupt(&id).await.unwrap();

        let interrupts = h.engine.interrupts();
        let applied = interrupts.resume(&id, approve()).await.unwrap();

        let err = interrupts.resume(&id, approve()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAwaitingDecision { .. }));

        let stored = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.step_seq, applied.step_seq);
        assert_eq!(stored.snapshot, applied.snapshot);
    }

    #[tokio::test]
    async fn test_resume_before_gate_is_refused() {
        let h = harness(ScriptedReviewer::new());
        let id = h.engine.start("fear of elevators").await.unwrap();
        h.engine.step(&id).await.unwrap();

        let err = h.engine.interrupts().resume(&id, approve()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAwaitingDecision { .. }));
        assert_eq!(h.engine.get(&id).await.unwrap().step_seq, 1);
    }

    #[tokio::test]
    async fn test_revise_at_cap_keeps_pause() {
        let h = harness(ScriptedReviewer::new().with_scores(ReviewAxis::Safety, &[5, 5, 9]));
        let id = h.engine.start("fear of elevators").await.unwrap();
        let paused = h.engine.run_to_next_interrupt(&id).await.unwrap();
        assert_eq!(paused.checkpoint().snapshot.iteration_count, 3);

        let err = h
            .engine
            .interrupts()
            .resume(
                &id,
                Decision::Revise {
                    feedback: "one more pass".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IterationCapReached { max: 3 }));

        let cp = h.engine.get(&id).await.unwrap();
        assert!(cp.is_paused_at_gate());
        assert_eq!(cp.step_seq, paused.checkpoint().step_seq);

        let approved = h.engine.interrupts().resume(&id, approve()).await.unwrap();
        assert_eq!(approved.snapshot.status, Status::Approved);
    }

    #[tokio::test]
    async fn test_unknown_pending_status_is_fatal() {
        let h = harness(ScriptedReviewer::new());
        let mut cp = Checkpoint::initial("fear of elevators");
        cp.pending = vec![NodeId::HumanGate];
        cp.snapshot.status = Status::ReviewPending;
        h.store.put("corrupt", &cp, None).await.unwrap();

        let err = h.engine.step("corrupt").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnroutableStatus {
                node: NodeId::HumanGate,
                status: Status::ReviewPending
            }
        ));
        // Nothing was written.
        assert_eq!(h.store.get("corrupt").await.unwrap().unwrap().step_seq, 0);
    }
}

// =============================================================================
// Fan-out and concurrency
// =============================================================================

mod concurrency {
    use super::*;

    async fn reviewed_notes(reviewer: ScriptedReviewer) -> Vec<String> {
        let h = harness(reviewer);
        let id = h.engine.start("fear of elevators").await.unwrap();
        h.engine.step(&id).await.unwrap();
        let reviews = h.engine.step(&id).await.unwrap();
        reviews
            .checkpoint
            .snapshot
            .scratchpad
            .iter()
            .skip(1)
            .map(|n| n.agent_name.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_join_order_is_independent_of_completion_order() {
        let slow_safety = reviewed_notes(
            ScriptedReviewer::new().with_delay(ReviewAxis::Safety, Duration::from_millis(40)),
        )
        .await;
        let slow_empathy = reviewed_notes(
            ScriptedReviewer::new().with_delay(ReviewAxis::Empathy, Duration::from_millis(40)),
        )
        .await;

        assert_eq!(slow_safety, vec!["SafetyGuardian", "ClinicalCritic"]);
        assert_eq!(slow_safety, slow_empathy);
    }

    #[tokio::test]
    async fn test_failed_review_does_not_wait_for_sibling() {
        let drafter = Arc::new(ScriptedDrafter::new());
        let reviewer = ScriptedReviewer::new()
            .with_script(ReviewAxis::Safety, vec![Scripted::Fail("model unavailable".into())])
            .with_script(ReviewAxis::Empathy, vec![Scripted::Hang]);
        let engine = GraphEngine::builder(
            drafter,
            Arc::new(reviewer),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .with_node_timeout(Duration::from_secs(60))
        .build()
        .unwrap();
        let id = engine.start("fear of elevators").await.unwrap();
        engine.step(&id).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), engine.step(&id))
            .await
            .expect("join should not wait for the hanging reviewer")
            .unwrap();
        match outcome.next {
            Next::Failed(message) => assert!(message.contains("model unavailable")),
            other => panic!("expected failure, got {:?}", other),
        }
        let board = &outcome.checkpoint.snapshot;
        assert_eq!(board.status, Status::Failed);
        assert!(board.empathy_score.is_none());
        assert_eq!(board.scratchpad.last().unwrap().agent_name, "SafetyGuardian");
    }

    #[tokio::test]
    async fn test_competing_writers_one_wins() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let slow = GraphEngine::builder(
            Arc::new(ScriptedDrafter::new()),
            Arc::new(
                ScriptedReviewer::new()
                    .with_delay(ReviewAxis::Safety, Duration::from_millis(150))
                    .with_delay(ReviewAxis::Empathy, Duration::from_millis(150)),
            ),
            store.clone(),
        )
        .build()
        .unwrap();
        let fast = GraphEngine::builder(
            Arc::new(ScriptedDrafter::new()),
            Arc::new(ScriptedReviewer::new()),
            store.clone(),
        )
        .build()
        .unwrap();

        let id = slow.start("fear of elevators").await.unwrap();
        slow.step(&id).await.unwrap();

        let (a, b) = tokio::join!(slow.step(&id), fast.step(&id));
        let err = a.unwrap_err();
        assert!(err.is_conflict(), "expected stale write, got {:?}", err);
        assert_eq!(b.unwrap().checkpoint.step_seq, 2);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.step_seq, 2);
        assert_eq!(stored.pending, vec![NodeId::Supervisor]);
    }
}

// =============================================================================
// Durability
// =============================================================================

mod durability {
    use super::*;

    fn sqlite_engine(path: &std::path::Path) -> (GraphEngine, Arc<SqliteHistory>) {
        let db = DbHandle::open(path).unwrap();
        let history = Arc::new(SqliteHistory::new(db.clone()));
        let engine = GraphEngine::builder(
            Arc::new(ScriptedDrafter::new()),
            Arc::new(ScriptedReviewer::new()),
            Arc::new(SqliteCheckpointStore::new(db)),
        )
        .with_history(history.clone())
        .build()
        .unwrap();
        (engine, history)
    }

    #[tokio::test]
    async fn test_pause_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tend.db");

        let id = {
            let (engine, _) = sqlite_engine(&path);
            let id = engine.start("fear of elevators").await.unwrap();
            engine.run_to_next_interrupt(&id).await.unwrap();
            id
        };

        let (engine, history) = sqlite_engine(&path);
        let cp = engine.get(&id).await.unwrap();
        assert!(cp.is_paused_at_gate());

        let approved = engine.interrupts().resume(&id, approve()).await.unwrap();
        assert_eq!(approved.snapshot.status, Status::Approved);

        let entries = history.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].thread_id, id);
        assert_eq!(entries[0].status, Status::Approved);
        assert_eq!(entries[0].final_artifact, approved.snapshot.current_draft);
    }

    #[tokio::test]
    async fn test_failed_run_recorded_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let db = DbHandle::open(&dir.path().join("tend.db")).unwrap();
        let history = Arc::new(SqliteHistory::new(db.clone()));
        let engine = GraphEngine::builder(
            Arc::new(ScriptedDrafter::failing("quota exceeded")),
            Arc::new(ScriptedReviewer::new()),
            Arc::new(SqliteCheckpointStore::new(db)),
        )
        .with_history(history.clone())
        .build()
        .unwrap();

        let id = engine.start("fear of elevators").await.unwrap();
        let outcome = engine.run_to_completion(&id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));

        let entries = history.list().await.unwrap();
        assert_eq!(entries[0].status, Status::Failed);
        assert!(entries[0].final_artifact.is_none());
    }
}
