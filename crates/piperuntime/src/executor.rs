use crate::graph::{ComponentSlot, ExecutionGraph, NodeStatus};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use pipecore::{
    ComponentError, EventBus, GraphError, NodeId, PipelineError, PipelineEvent, RunContext, RunId,
    ERROR_KEY,
};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Runs compiled graphs: one spawned task per dispatched edge, joined per run
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    max_parallel: usize,
    max_steps: usize,
    deadline: Option<Duration>,
}

impl PipelineExecutor {
    pub fn new(max_parallel: usize, max_steps: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            max_steps: max_steps.max(1),
            deadline: None,
        }
    }

    /// Cancel the run's token and fail with `Cancelled` once `deadline` elapses
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Execute `graph` from its root and wait for every spawned branch
    pub async fn execute(
        &self,
        graph: Arc<ExecutionGraph>,
        ctx: RunContext,
        event_bus: &EventBus,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = RunId::new_v4();
        let start_time = Instant::now();

        event_bus.emit(PipelineEvent::RunStarted {
            run_id,
            pipeline_id: graph.pipeline_id.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(%run_id, pipeline = %graph.pipeline_id, "Starting pipeline run");

        let run = Arc::new(RunState::new(run_id, graph, ctx, event_bus.clone(), self));
        let cancellation = run.ctx.cancellation().clone();

        run.spawn_execute(run.graph.root.clone());
        run.tracker.close();

        let deadline = self.deadline;
        let cancelled = tokio::select! {
            biased;
            _ = run.tracker.wait() => false,
            _ = cancellation.cancelled() => true,
            _ = sleep_or_pending(deadline) => {
                tracing::warn!(%run_id, "Run deadline elapsed");
                cancellation.cancel();
                true
            }
        };
        // A node may trip the token and finish before the select polls again
        let cancelled = cancelled || run.ctx.is_cancelled();

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let failure = run.take_failure();
        let ended_early = run.ended.load(Ordering::Acquire);
        let success = failure.is_none() && !cancelled;

        event_bus.emit(PipelineEvent::RunCompleted {
            run_id,
            success,
            ended_early,
            duration_ms,
            timestamp: Utc::now(),
        });

        if let Some(err) = failure {
            tracing::error!(%run_id, "Pipeline run failed after {}ms: {}", duration_ms, err);
            return Err(err);
        }
        if cancelled {
            run.halted.store(true, Ordering::Release);
            run.ctx.set_if_absent(ERROR_KEY, PipelineError::Cancelled.to_string());
            tracing::warn!(%run_id, "Pipeline run cancelled after {}ms", duration_ms);
            return Err(PipelineError::Cancelled);
        }

        tracing::info!(%run_id, "Pipeline run completed in {}ms", duration_ms);
        Ok(RunOutcome {
            run_id,
            statuses: run.statuses(),
            executed: run.executed(),
            ended_early,
            duration_ms,
            context: run.ctx.clone(),
        })
    }
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new(10, 500)
    }
}

async fn sleep_or_pending(deadline: Option<Duration>) {
    match deadline {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    /// Final status of every node in the graph
    pub statuses: HashMap<NodeId, NodeStatus>,
    /// Node ids in completion order
    pub executed: Vec<NodeId>,
    /// A component set the `end` key
    pub ended_early: bool,
    pub duration_ms: u64,
    pub context: RunContext,
}

impl RunOutcome {
    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.statuses.get(node_id).copied()
    }

    pub fn times_executed(&self, node_id: &str) -> usize {
        self.executed.iter().filter(|id| *id == node_id).count()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            executed: self.executed.clone(),
            ended_early: self.ended_early,
            duration_ms: self.duration_ms,
            context: self
                .context
                .snapshot()
                .into_iter()
                .map(|(k, v)| (k, v.to_json()))
                .collect(),
        }
    }
}

/// Serializable view of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub executed: Vec<NodeId>,
    pub ended_early: bool,
    pub duration_ms: u64,
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Join bookkeeping for one node.
///
/// `remaining` starts at the inbound edge count. Each arrival decrements it
/// under the lock; the arrival that reaches zero owns the node's execution.
/// An arrival at an exhausted node (a loop via `nextOverride`) re-arms it.
struct JoinGate {
    upstream: usize,
    remaining: usize,
    live: usize,
}

enum Arrival {
    Waiting,
    Fire,
    Skip,
}

impl JoinGate {
    fn new(upstream: usize) -> Self {
        Self {
            upstream,
            remaining: upstream,
            live: 0,
        }
    }

    fn arrive(&mut self, live: bool) -> Arrival {
        if self.remaining == 0 {
            self.remaining = self.upstream.max(1);
            self.live = 0;
        }
        self.remaining -= 1;
        if live {
            self.live += 1;
        }
        if self.remaining > 0 {
            return Arrival::Waiting;
        }
        if self.live > 0 {
            Arrival::Fire
        } else {
            Arrival::Skip
        }
    }
}

struct NodeState {
    gate: Mutex<JoinGate>,
    status: AtomicU8,
}

impl NodeState {
    fn status(&self) -> NodeStatus {
        NodeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: NodeStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Pending becomes Blocked; any later status is left as is
    fn mark_blocked(&self) {
        let _ = self.status.compare_exchange(
            NodeStatus::Pending as u8,
            NodeStatus::Blocked as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Everything one run shares between its tasks
struct RunState {
    run_id: RunId,
    graph: Arc<ExecutionGraph>,
    ctx: RunContext,
    event_bus: EventBus,
    nodes: HashMap<NodeId, NodeState>,
    tracker: TaskTracker,
    semaphore: Semaphore,
    max_steps: usize,
    steps: AtomicUsize,
    /// No further dispatch: set on the first failure, on `end` and on cancellation
    halted: AtomicBool,
    ended: AtomicBool,
    failure: Mutex<Option<PipelineError>>,
    executed: Mutex<Vec<NodeId>>,
}

impl RunState {
    fn new(
        run_id: RunId,
        graph: Arc<ExecutionGraph>,
        ctx: RunContext,
        event_bus: EventBus,
        executor: &PipelineExecutor,
    ) -> Self {
        let nodes = graph
            .nodes
            .values()
            .map(|node| {
                let state = NodeState {
                    gate: Mutex::new(JoinGate::new(node.upstream_count())),
                    status: AtomicU8::new(NodeStatus::Pending as u8),
                };
                (node.id.clone(), state)
            })
            .collect();

        Self {
            run_id,
            graph,
            ctx,
            event_bus,
            nodes,
            tracker: TaskTracker::new(),
            semaphore: Semaphore::new(executor.max_parallel),
            max_steps: executor.max_steps,
            steps: AtomicUsize::new(0),
            halted: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            failure: Mutex::new(None),
            executed: Mutex::new(Vec::new()),
        }
    }

    fn should_stop(&self) -> bool {
        self.halted.load(Ordering::Acquire) || self.ctx.is_cancelled()
    }

    fn spawn_execute(self: &Arc<Self>, node_id: NodeId) {
        self.tracker.spawn(Arc::clone(self).execute_node(node_id));
    }

    fn spawn_arrival(self: &Arc<Self>, from: NodeId, edge: usize, live: bool) {
        self.tracker.spawn(Arc::clone(self).arrive(from, edge, live));
    }

    /// Handle one edge `from -> downstream[edge]` reaching its target.
    ///
    /// `live` is false when the source was skipped; such arrivals never
    /// evaluate the edge condition and can only count toward a skip.
    fn arrive(self: Arc<Self>, from: NodeId, edge: usize, live: bool) -> BoxFuture<'static, ()> {
        async move {
            if self.should_stop() {
                return;
            }
            let Some(out) = self.graph.node(&from).and_then(|n| n.downstream.get(edge)) else {
                return;
            };
            let to = out.to.clone();

            let live = match (&out.condition, live) {
                (_, false) => false,
                (None, true) => true,
                (Some(condition), true) => match condition.evaluate(&self.ctx) {
                    Ok(passed) => {
                        if !passed {
                            tracing::debug!(run_id = %self.run_id, %from, %to, condition = condition.source(), "Edge condition is false");
                        }
                        passed
                    }
                    Err(e) => {
                        self.fail(
                            &to,
                            PipelineError::ConditionEval {
                                from: from.clone(),
                                to: to.clone(),
                                message: e.to_string(),
                            },
                        );
                        return;
                    }
                },
            };

            let Some(state) = self.nodes.get(&to) else {
                return;
            };
            let arrival = state
                .gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .arrive(live);

            match arrival {
                Arrival::Waiting => state.mark_blocked(),
                Arrival::Fire => Arc::clone(&self).execute_node(to).await,
                Arrival::Skip => self.skip(&to),
            }
        }
        .boxed()
    }

    /// Mark `node_id` skipped and forward dead arrivals so joins below it resolve.
    fn skip(self: &Arc<Self>, node_id: &str) {
        let Some(node) = self.graph.node(node_id) else {
            return;
        };
        if let Some(state) = self.nodes.get(node_id) {
            state.set_status(NodeStatus::Skipped);
        }
        tracing::debug!(run_id = %self.run_id, %node_id, "Node skipped");
        self.event_bus.emit(PipelineEvent::NodeSkipped {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
        });

        for edge in 0..node.downstream.len() {
            self.spawn_arrival(node_id.to_string(), edge, false);
        }
    }

    fn execute_node(self: Arc<Self>, node_id: NodeId) -> BoxFuture<'static, ()> {
        async move {
            if self.should_stop() {
                return;
            }

            let Some(node) = self.graph.node(&node_id) else {
                self.fail(&node_id, GraphError::NodeNotFound(node_id.clone()).into());
                return;
            };
            let component = match &node.component {
                ComponentSlot::Ready(component) => Arc::clone(component),
                ComponentSlot::Unusable(reason) => {
                    self.fail(
                        &node_id,
                        PipelineError::MissingComponent {
                            node_id: node_id.clone(),
                            reason: reason.clone(),
                        },
                    );
                    return;
                }
            };

            let step = self.steps.fetch_add(1, Ordering::AcqRel) + 1;
            if step > self.max_steps {
                self.fail(&node_id, PipelineError::StepLimitExceeded(self.max_steps));
                return;
            }

            let permit = tokio::select! {
                permit = self.semaphore.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = self.ctx.cancellation().cancelled() => return,
            };
            if self.should_stop() {
                return;
            }

            if let Some(state) = self.nodes.get(&node_id) {
                state.set_status(NodeStatus::Running);
            }
            self.event_bus.emit(PipelineEvent::NodeStarted {
                run_id: self.run_id,
                node_id: node_id.clone(),
                component: node.component_id.clone(),
                timestamp: Utc::now(),
            });
            tracing::debug!(run_id = %self.run_id, %node_id, component = %node.component_id, "Executing node");

            let start = Instant::now();
            let result = AssertUnwindSafe(component.execute(&self.ctx))
                .catch_unwind()
                .await;
            let duration_ms = start.elapsed().as_millis() as u64;
            drop(permit);

            if self.ctx.is_cancelled() {
                tracing::debug!(run_id = %self.run_id, %node_id, "Discarding result of cancelled run");
                self.abandon(&node_id);
                return;
            }

            let outcome = match result {
                Ok(Ok(())) => match self.ctx.error() {
                    Some(reported) if !self.has_failed() => Err(ComponentError::ExecutionFailed(
                        reported
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| reported.to_json().to_string()),
                    )),
                    _ => Ok(()),
                },
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ComponentError::ExecutionFailed("component panicked".to_string())),
            };
            if let Err(source) = outcome {
                self.fail(
                    &node_id,
                    PipelineError::ComponentExecution {
                        node_id: node_id.clone(),
                        source,
                    },
                );
                return;
            }

            if let Some(state) = self.nodes.get(&node_id) {
                state.set_status(NodeStatus::Done);
            }
            self.executed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(node_id.clone());
            self.event_bus.emit(PipelineEvent::NodeCompleted {
                run_id: self.run_id,
                node_id: node_id.clone(),
                duration_ms,
                timestamp: Utc::now(),
            });
            tracing::debug!(run_id = %self.run_id, %node_id, "Node completed in {}ms", duration_ms);

            if self.ctx.end_requested() {
                tracing::info!(run_id = %self.run_id, %node_id, "End requested, stopping dispatch");
                self.ended.store(true, Ordering::Release);
                self.halted.store(true, Ordering::Release);
                return;
            }
            if self.should_stop() {
                return;
            }

            if let Some(next) = self.ctx.take_next_override() {
                tracing::debug!(run_id = %self.run_id, from = %node_id, to = %next, "Following next override");
                self.spawn_execute(next);
                return;
            }

            for edge in 0..node.downstream.len() {
                self.spawn_arrival(node_id.clone(), edge, true);
            }
        }
        .boxed()
    }

    fn has_failed(&self) -> bool {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Close out a node whose result was dropped by cancellation. The run's
    /// own error stays `Cancelled`, so the failure slot is left alone.
    fn abandon(&self, node_id: &str) {
        if let Some(state) = self.nodes.get(node_id) {
            state.set_status(NodeStatus::Failed);
        }
        self.event_bus.emit(PipelineEvent::NodeFailed {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            error: PipelineError::Cancelled.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Record a node failure. The first failure wins; later ones are logged only.
    fn fail(&self, node_id: &str, error: PipelineError) {
        if let Some(state) = self.nodes.get(node_id) {
            state.set_status(NodeStatus::Failed);
        }
        self.event_bus.emit(PipelineEvent::NodeFailed {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_some() {
            tracing::warn!(run_id = %self.run_id, %node_id, "Additional failure after the run already failed: {}", error);
        } else {
            tracing::error!(run_id = %self.run_id, %node_id, "Node failed: {}", error);
            self.ctx.set_if_absent(ERROR_KEY, error.to_string());
            *failure = Some(error);
        }
        self.halted.store(true, Ordering::Release);
    }

    fn take_failure(&self) -> Option<PipelineError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn statuses(&self) -> HashMap<NodeId, NodeStatus> {
        self.nodes
            .iter()
            .map(|(id, state)| (id.clone(), state.status()))
            .collect()
    }

    fn executed(&self) -> Vec<NodeId> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_gate_fires_on_last_arrival() {
        let mut gate = JoinGate::new(3);
        assert!(matches!(gate.arrive(true), Arrival::Waiting));
        assert!(matches!(gate.arrive(false), Arrival::Waiting));
        assert!(matches!(gate.arrive(true), Arrival::Fire));
    }

    #[test]
    fn test_join_gate_skips_when_every_arrival_is_dead() {
        let mut gate = JoinGate::new(2);
        assert!(matches!(gate.arrive(false), Arrival::Waiting));
        assert!(matches!(gate.arrive(false), Arrival::Skip));
    }

    #[test]
    fn test_join_gate_rearms_after_firing() {
        let mut gate = JoinGate::new(1);
        assert!(matches!(gate.arrive(true), Arrival::Fire));
        assert!(matches!(gate.arrive(true), Arrival::Fire));

        // A root-like node with no inbound edges still fires on a jump
        let mut root = JoinGate::new(0);
        assert!(matches!(root.arrive(true), Arrival::Fire));
    }

    #[test]
    fn test_waiting_arrival_never_overwrites_running() {
        let state = NodeState {
            gate: Mutex::new(JoinGate::new(2)),
            status: AtomicU8::new(NodeStatus::Pending as u8),
        };
        state.mark_blocked();
        assert_eq!(state.status(), NodeStatus::Blocked);

        state.set_status(NodeStatus::Running);
        state.mark_blocked();
        assert_eq!(state.status(), NodeStatus::Running);
    }
}
