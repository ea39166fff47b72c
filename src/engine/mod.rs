//! Graph executor for the draft → review → supervise loop.
//!
//! The topology is fixed:
//!
//! ```text
//! draft ──┬── guardian ──┬── supervisor ──┬── human_gate ── ⊥ / draft
//!         └── critic ────┘                ├── draft
//!                                         └── ⊥
//! ```
//!
//! Each [`GraphEngine::step`] loads the thread's checkpoint, runs whatever is
//! pending, merges the resulting delta and persists the next checkpoint with
//! a compare-and-swap on `step_seq`. Nothing is held in memory between
//! steps, so any process holding the store can pick a thread up.

mod commit;
pub mod routing;
pub mod stream;

pub use routing::{NodeId, Route, RoutingTable};
pub use stream::StreamEvent;

pub(crate) use commit::{commit, record};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::blackboard::{Delta, Draft, Status};
use crate::capability::{DraftRequest, DraftService, ReviewAxis, ReviewService};
use crate::checkpoint::{Checkpoint, CheckpointStore, ThreadSummary};
use crate::errors::{EngineError, EngineResult};
use crate::history::{HistoryEvent, HistorySink, NullHistory};
use crate::interrupt::InterruptController;
use crate::supervisor::SupervisorPolicy;

/// Default per-node deadline.
pub const DEFAULT_NODE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for every capability call.
    pub node_timeout: Duration,
    /// Pause before the human gate instead of passing through it.
    pub interrupt_before_gate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(DEFAULT_NODE_TIMEOUT_SECS),
            interrupt_before_gate: true,
        }
    }
}

/// Per-thread writer locks. Sessions on different threads never contend.
///
/// An entry lives only while someone holds or waits on it.
#[derive(Debug, Clone, Default)]
pub struct ThreadLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ThreadLocks {
    pub async fn acquire(&self, thread_id: &str) -> ThreadGuard {
        let lock = self
            .inner
            .entry(thread_id.to_string())
            .or_default()
            .clone();
        ThreadGuard {
            guard: Some(lock.lock_owned().await),
            locks: self.clone(),
            thread_id: thread_id.to_string(),
        }
    }

    /// Number of threads with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held writer lock; prunes the map entry on release when nobody waits.
#[derive(Debug)]
pub struct ThreadGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: ThreadLocks,
    thread_id: String,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone of the Arc, so the map's is the last one only when idle.
        self.locks
            .inner
            .remove_if(&self.thread_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// What the engine will do after a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum Next {
    Nodes(Vec<NodeId>),
    Interrupted(NodeId),
    Finished,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Nodes that ran in this step; empty when nothing was committed.
    pub ran: Vec<NodeId>,
    pub checkpoint: Checkpoint,
    pub next: Next,
}

impl StepOutcome {
    fn committed(ran: Vec<NodeId>, checkpoint: Checkpoint, next: Next) -> Self {
        Self {
            ran,
            checkpoint,
            next,
        }
    }
}

/// Where a multi-step run stopped.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Finished(Checkpoint),
    Interrupted { checkpoint: Checkpoint, next: NodeId },
    Failed { checkpoint: Checkpoint, message: String },
}

impl RunOutcome {
    pub fn checkpoint(&self) -> &Checkpoint {
        match self {
            Self::Finished(cp) => cp,
            Self::Interrupted { checkpoint, .. } | Self::Failed { checkpoint, .. } => checkpoint,
        }
    }

    pub fn status(&self) -> Status {
        self.checkpoint().snapshot.status
    }
}

pub struct EngineBuilder {
    drafter: Arc<dyn DraftService>,
    reviewer: Arc<dyn ReviewService>,
    store: Arc<dyn CheckpointStore>,
    history: Arc<dyn HistorySink>,
    policy: SupervisorPolicy,
    routes: RoutingTable,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = history;
        self
    }

    pub fn with_policy(mut self, policy: SupervisorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_routes(mut self, routes: RoutingTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.config.node_timeout = timeout;
        self
    }

    pub fn with_interrupt_before_gate(mut self, enabled: bool) -> Self {
        self.config.interrupt_before_gate = enabled;
        self
    }

    /// Validate the policy and routes and build the engine.
    pub fn build(self) -> EngineResult<GraphEngine> {
        self.policy.validate()?;
        self.routes.validate()?;
        if self.config.node_timeout.is_zero() {
            return Err(EngineError::InvalidConfig(
                "node timeout must be positive".into(),
            ));
        }
        Ok(GraphEngine {
            drafter: self.drafter,
            reviewer: self.reviewer,
            store: self.store,
            history: self.history,
            policy: self.policy,
            routes: Arc::new(self.routes),
            config: self.config,
            locks: ThreadLocks::default(),
        })
    }
}

#[derive(Clone)]
pub struct GraphEngine {
    drafter: Arc<dyn DraftService>,
    reviewer: Arc<dyn ReviewService>,
    store: Arc<dyn CheckpointStore>,
    history: Arc<dyn HistorySink>,
    policy: SupervisorPolicy,
    routes: Arc<RoutingTable>,
    config: EngineConfig,
    locks: ThreadLocks,
}

impl GraphEngine {
    pub fn builder(
        drafter: Arc<dyn DraftService>,
        reviewer: Arc<dyn ReviewService>,
        store: Arc<dyn CheckpointStore>,
    ) -> EngineBuilder {
        EngineBuilder {
            drafter,
            reviewer,
            store,
            history: Arc::new(NullHistory),
            policy: SupervisorPolicy::default(),
            routes: RoutingTable::standard(),
            config: EngineConfig::default(),
        }
    }

    pub fn policy(&self) -> &SupervisorPolicy {
        &self.policy
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<dyn HistorySink> {
        &self.history
    }

    /// Controller for decisions at the human gate, sharing this engine's
    /// store and locks.
    pub fn interrupts(&self) -> InterruptController {
        InterruptController::new(
            self.store.clone(),
            self.history.clone(),
            self.routes.clone(),
            self.locks.clone(),
            self.policy.max_iterations,
        )
    }

    /// Open a new thread for `intent`.
    #[instrument(skip(self))]
    pub async fn start(&self, intent: &str) -> EngineResult<String> {
        let intent = intent.trim();
        if intent.is_empty() {
            return Err(EngineError::InvalidInput("intent must not be blank".into()));
        }

        let thread_id = Uuid::new_v4().to_string();
        let checkpoint = Checkpoint::initial(intent);
        self.store.put(&thread_id, &checkpoint, None).await?;
        record(
            self.history.as_ref(),
            HistoryEvent::Created {
                thread_id: thread_id.clone(),
                intent: intent.to_string(),
            },
        )
        .await;

        info!(thread_id = %thread_id, "thread started");
        Ok(thread_id)
    }

    pub async fn get(&self, thread_id: &str) -> EngineResult<Checkpoint> {
        self.store
            .get(thread_id)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })
    }

    pub async fn list(&self) -> EngineResult<Vec<ThreadSummary>> {
        self.store.list().await
    }

    /// Run whatever is pending on `thread_id` and commit the result.
    #[instrument(skip(self))]
    pub async fn step(&self, thread_id: &str) -> EngineResult<StepOutcome> {
        let _guard = self.locks.acquire(thread_id).await;
        self.advance(thread_id, self.config.interrupt_before_gate)
            .await
    }

    /// Step until the thread ends or pauses at the gate.
    pub async fn run_to_next_interrupt(&self, thread_id: &str) -> EngineResult<RunOutcome> {
        self.run(thread_id, self.config.interrupt_before_gate).await
    }

    /// Step until the thread ends, passing the gate without pausing.
    pub async fn run_to_completion(&self, thread_id: &str) -> EngineResult<RunOutcome> {
        self.run(thread_id, false).await
    }

    async fn run(&self, thread_id: &str, halt_at_gate: bool) -> EngineResult<RunOutcome> {
        // Terminates: every pass commits, and drafts stop at the iteration cap.
        loop {
            let outcome = {
                let _guard = self.locks.acquire(thread_id).await;
                self.advance(thread_id, halt_at_gate).await?
            };
            match outcome.next {
                Next::Nodes(_) => continue,
                Next::Interrupted(next) => {
                    return Ok(RunOutcome::Interrupted {
                        checkpoint: outcome.checkpoint,
                        next,
                    });
                }
                Next::Finished => return Ok(RunOutcome::Finished(outcome.checkpoint)),
                Next::Failed(message) => {
                    return Ok(RunOutcome::Failed {
                        checkpoint: outcome.checkpoint,
                        message,
                    });
                }
            }
        }
    }

    /// One step. Caller holds the thread lock.
    async fn advance(&self, thread_id: &str, halt_at_gate: bool) -> EngineResult<StepOutcome> {
        let current = self.get(thread_id).await?;
        if current.snapshot.is_terminal() || current.is_finished() {
            return Err(EngineError::TerminalState {
                thread_id: thread_id.to_string(),
                status: current.snapshot.status,
            });
        }

        let pending = current.pending.clone();
        match pending.as_slice() {
            [NodeId::Draft] => self.run_draft(thread_id, &current).await,
            [NodeId::Guardian, NodeId::Critic] => self.run_reviews(thread_id, &current).await,
            [NodeId::Supervisor] => self.run_supervisor(thread_id, &current, halt_at_gate).await,
            [NodeId::HumanGate] => self.pass_gate(thread_id, current, halt_at_gate).await,
            other => Err(EngineError::UnschedulablePending {
                thread_id: thread_id.to_string(),
                pending: other.to_vec(),
            }),
        }
    }

    async fn run_draft(&self, thread_id: &str, current: &Checkpoint) -> EngineResult<StepOutcome> {
        let board = &current.snapshot;
        let max = self.policy.max_iterations;
        if board.iteration_count >= max {
            let err = EngineError::IterationCapReached { max };
            return self.fail(thread_id, current, NodeId::Draft, "Drafter", err).await;
        }

        let request = DraftRequest::from_blackboard(board);
        let revision = request.is_revision();
        debug!(iteration = board.iteration_count + 1, revision, "invoking drafter");

        let draft = match self.call_drafter(request).await {
            Ok(draft) => draft,
            Err(err) => return self.fail(thread_id, current, NodeId::Draft, "Drafter", err).await,
        };

        let note = if revision {
            "Revised draft based on feedback."
        } else {
            "Created initial draft."
        };
        let delta = Delta {
            current_draft: Some(draft.clone()),
            draft_history: vec![draft],
            iteration_count: Some(board.iteration_count + 1),
            status: Some(Status::ReviewPending),
            ..Delta::default()
        }
        .with_note("Drafter", note);

        let pending = NodeId::FAN_OUT.to_vec();
        let checkpoint = self.commit(thread_id, current, delta, pending.clone()).await?;
        Ok(StepOutcome::committed(
            vec![NodeId::Draft],
            checkpoint,
            Next::Nodes(pending),
        ))
    }

    async fn call_drafter(&self, request: DraftRequest) -> EngineResult<Draft> {
        let timeout = self.config.node_timeout;
        let draft = tokio::time::timeout(timeout, self.drafter.draft(request))
            .await
            .map_err(|_| EngineError::Generation(format!("timed out after {:?}", timeout)))?
            .map_err(|e| EngineError::Generation(format!("{:#}", e)))?;
        draft.validate().map_err(EngineError::Generation)?;
        Ok(draft)
    }

    /// Fan out to both reviewers over one shared snapshot and AND-join.
    async fn run_reviews(
        &self,
        thread_id: &str,
        current: &Checkpoint,
    ) -> EngineResult<StepOutcome> {
        let ran = NodeId::FAN_OUT.to_vec();
        let Some(draft) = current.snapshot.current_draft.clone() else {
            let err = EngineError::Review {
                axis: ReviewAxis::Safety,
                message: "no draft to review".into(),
            };
            return self.fail(thread_id, current, NodeId::Guardian, "SafetyGuardian", err).await;
        };
        let draft = Arc::new(draft);

        let mut set = JoinSet::new();
        for axis in ReviewAxis::ALL {
            let reviewer = self.reviewer.clone();
            let draft = draft.clone();
            let timeout = self.config.node_timeout;
            let threshold = self.policy.threshold(axis);
            debug!(%axis, "invoking reviewer");
            set.spawn(async move {
                let result = AssertUnwindSafe(review_node(reviewer, axis, draft, timeout, threshold))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(EngineError::Review {
                            axis,
                            message: "reviewer panicked".into(),
                        })
                    });
                (axis, result)
            });
        }

        let mut deltas: Vec<(ReviewAxis, Delta)> = Vec::with_capacity(2);
        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok((axis, Ok(delta))) => {
                    deltas.push((axis, delta));
                    continue;
                }
                Ok((_, Err(err))) => err,
                Err(join_err) => EngineError::Review {
                    axis: uncollected(&deltas),
                    message: format!("review task aborted: {}", join_err),
                },
            };
            set.abort_all();
            let axis = match &failure {
                EngineError::Review { axis, .. } => *axis,
                _ => uncollected(&deltas),
            };
            let (node, agent) = match axis {
                ReviewAxis::Safety => (NodeId::Guardian, "SafetyGuardian"),
                ReviewAxis::Empathy => (NodeId::Critic, "ClinicalCritic"),
            };
            warn!(%axis, error = %failure, "review failed; abandoning join");
            let mut outcome = self.fail(thread_id, current, node, agent, failure).await?;
            outcome.ran = ran;
            return Ok(outcome);
        }

        // Canonical sibling order, whatever order they finished in.
        deltas.sort_by_key(|(axis, _)| *axis);
        let mut joined = Delta::new();
        for (_, delta) in deltas {
            joined = joined.join(delta)?;
        }

        let pending = vec![NodeId::Supervisor];
        let checkpoint = self.commit(thread_id, current, joined, pending.clone()).await?;
        Ok(StepOutcome::committed(ran, checkpoint, Next::Nodes(pending)))
    }

    async fn run_supervisor(
        &self,
        thread_id: &str,
        current: &Checkpoint,
        halt_at_gate: bool,
    ) -> EngineResult<StepOutcome> {
        let board = &current.snapshot;
        let decision =
            self.policy
                .decide(board.iteration_count, board.safety_score, board.empathy_score);
        let route = self.routes.route(NodeId::Supervisor, decision.status)?;
        info!(status = %decision.status, ?route, reason = %decision.reason, "supervisor decided");

        let (pending, next) = match route {
            Route::Node(NodeId::HumanGate) if halt_at_gate => (
                vec![NodeId::HumanGate],
                Next::Interrupted(NodeId::HumanGate),
            ),
            Route::Node(node) => (vec![node], Next::Nodes(vec![node])),
            Route::Terminal if decision.status == Status::Failed => {
                (Vec::new(), Next::Failed(decision.reason.clone()))
            }
            Route::Terminal => (Vec::new(), Next::Finished),
            Route::Await => {
                return Err(EngineError::UnroutableStatus {
                    node: NodeId::Supervisor,
                    status: decision.status,
                });
            }
        };

        let delta = Delta::new()
            .with_status(decision.status)
            .with_note("Supervisor", decision.reason);
        let checkpoint = self.commit(thread_id, current, delta, pending).await?;
        Ok(StepOutcome::committed(
            vec![NodeId::Supervisor],
            checkpoint,
            next,
        ))
    }

    /// Pause at the gate, or let an autonomous run through it.
    async fn pass_gate(
        &self,
        thread_id: &str,
        current: Checkpoint,
        halt_at_gate: bool,
    ) -> EngineResult<StepOutcome> {
        let status = current.snapshot.status;
        match self.routes.route(NodeId::HumanGate, status)? {
            Route::Await if halt_at_gate => Ok(StepOutcome {
                ran: Vec::new(),
                checkpoint: current,
                next: Next::Interrupted(NodeId::HumanGate),
            }),
            Route::Await => {
                let delta = Delta::new().with_note(
                    "Human",
                    "Autonomous run; human gate passed without review.",
                );
                let checkpoint = self.commit(thread_id, &current, delta, Vec::new()).await?;
                Ok(StepOutcome::committed(
                    vec![NodeId::HumanGate],
                    checkpoint,
                    Next::Finished,
                ))
            }
            _ => Err(EngineError::UnroutableStatus {
                node: NodeId::HumanGate,
                status,
            }),
        }
    }

    /// Commit a node failure as `status=failed` with a diagnostic note.
    async fn fail(
        &self,
        thread_id: &str,
        current: &Checkpoint,
        node: NodeId,
        agent: &str,
        err: EngineError,
    ) -> EngineResult<StepOutcome> {
        let message = err.to_string();
        warn!(%node, error = %message, "node failed");
        let delta = Delta::new()
            .with_status(Status::Failed)
            .with_note(agent, format!("Error: {}", message));
        let checkpoint = self.commit(thread_id, current, delta, Vec::new()).await?;
        Ok(StepOutcome::committed(
            vec![node],
            checkpoint,
            Next::Failed(message),
        ))
    }

    async fn commit(
        &self,
        thread_id: &str,
        current: &Checkpoint,
        delta: Delta,
        pending: Vec<NodeId>,
    ) -> EngineResult<Checkpoint> {
        commit(
            self.store.as_ref(),
            self.history.as_ref(),
            thread_id,
            current,
            delta,
            pending,
        )
        .await
    }
}

/// First axis with no delta yet.
fn uncollected(deltas: &[(ReviewAxis, Delta)]) -> ReviewAxis {
    ReviewAxis::ALL
        .into_iter()
        .find(|axis| deltas.iter().all(|(done, _)| done != axis))
        .unwrap_or(ReviewAxis::Safety)
}

async fn review_node(
    reviewer: Arc<dyn ReviewService>,
    axis: ReviewAxis,
    draft: Arc<Draft>,
    timeout: Duration,
    threshold: u8,
) -> EngineResult<Delta> {
    let review = tokio::time::timeout(timeout, reviewer.review(axis, &draft))
        .await
        .map_err(|_| EngineError::Review {
            axis,
            message: format!("timed out after {:?}", timeout),
        })?
        .map_err(|e| EngineError::Review {
            axis,
            message: format!("{:#}", e),
        })?;
    review
        .check_contract(threshold)
        .map_err(|message| EngineError::Review { axis, message })?;

    let mut delta = Delta::new();
    let feedback = (review.score < threshold)
        .then(|| format!("{}: {}", axis.feedback_label(), review.issues.join("; ")));
    let note = match axis {
        ReviewAxis::Safety => {
            delta.safety_score = Some(review.score);
            delta.safety_feedback.extend(feedback);
            format!("Safety check complete. Score: {}", review.score)
        }
        ReviewAxis::Empathy => {
            delta.empathy_score = Some(review.score);
            delta.critique_feedback.extend(feedback);
            format!("Clinical review complete. Empathy: {}", review.score)
        }
    };
    Ok(delta.with_note(axis.agent_name(), note))
}
