//! The single write path for thread state.

use tracing::{error, info, warn};

use super::NodeId;
use crate::blackboard::{Delta, Status};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::errors::{EngineError, EngineResult};
use crate::history::{HistoryEvent, HistorySink};

/// Merge `delta` into `current`, persist with CAS, then report to history.
///
/// On any error the stored checkpoint is left as it was.
pub(crate) async fn commit(
    store: &dyn CheckpointStore,
    history: &dyn HistorySink,
    thread_id: &str,
    current: &Checkpoint,
    delta: Delta,
    pending: Vec<NodeId>,
) -> EngineResult<Checkpoint> {
    if current.snapshot.is_terminal() {
        return Err(EngineError::TerminalState {
            thread_id: thread_id.to_string(),
            status: current.snapshot.status,
        });
    }

    let before = current.snapshot.status;
    let mut snapshot = current.snapshot.clone();
    snapshot.apply(delta)?;
    let next = current.advance(snapshot, pending);

    if let Err(err) = store.put(thread_id, &next, Some(current.step_seq)).await {
        match &err {
            EngineError::StaleWrite { .. } => {
                warn!(thread_id, step_seq = current.step_seq, "lost checkpoint race")
            }
            _ => error!(thread_id, error = %err, "checkpoint write failed"),
        }
        return Err(err);
    }

    info!(
        thread_id,
        step_seq = next.step_seq,
        status = %next.snapshot.status,
        pending = ?next.pending,
        "committed"
    );
    report(history, thread_id, before, &next).await;
    Ok(next)
}

async fn report(history: &dyn HistorySink, thread_id: &str, before: Status, cp: &Checkpoint) {
    let status = cp.snapshot.status;
    if status != before {
        record(
            history,
            HistoryEvent::StatusChanged {
                thread_id: thread_id.to_string(),
                status,
            },
        )
        .await;
    }
    if status == Status::Failed {
        record(
            history,
            HistoryEvent::Failed {
                thread_id: thread_id.to_string(),
            },
        )
        .await;
    }
    if cp.is_finished()
        && matches!(status, Status::Completed | Status::Approved)
        && let Some(draft) = &cp.snapshot.current_draft
    {
        record(
            history,
            HistoryEvent::Completed {
                thread_id: thread_id.to_string(),
                artifact: draft.clone(),
            },
        )
        .await;
    }
}

/// History failures never fail the engine.
pub(crate) async fn record(history: &dyn HistorySink, event: HistoryEvent) {
    let thread_id = event.thread_id().to_string();
    if let Err(err) = history.record(event).await {
        warn!(thread_id = %thread_id, error = %err, "history sink failed");
    }
}
