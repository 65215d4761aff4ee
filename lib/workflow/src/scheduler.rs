//! Execution scheduler.
//!
//! Runs a validated graph to a terminal status:
//!
//! 1. Every node starts with a count of its incoming edges (guarded edges
//!    included). The ready queue starts with the trigger, whose input is the
//!    run input.
//! 2. A popped node classifies its incoming edges: an edge is active when its
//!    source succeeded, the source emitted on the edge's port, and the edge's
//!    guard holds. With no active edge the node is skipped and its outgoing
//!    edges become inactive; otherwise the active inputs are merged and the
//!    node is dispatched.
//! 3. Results are committed in dispatch order. Each commit records the
//!    output, decrements the successors' counts and enqueues those reaching
//!    zero; new nodes are only dispatched right after a commit, so the ledger
//!    is the same for the same graph and input however the tasks interleave.
//! 4. A failure either halts dispatching (in-flight nodes still finish) or,
//!    under [`FailurePolicy::Continue`], only deactivates the failed node's
//!    outgoing edges.
//! 5. The run ends when nothing is in flight, when its wall-clock budget
//!    runs out, or when it is cancelled.
//!
//! The scheduler loop is the only writer of run state; node tasks receive a
//! read-only snapshot of committed outputs.

use crate::definition::FailurePolicy;
use crate::edge::Edge;
use crate::error::{ErrorCause, NodeExecutionError};
use crate::execution::{NodeStatus, RunError, RunExecutionRecord, RunMetrics, RunStatus};
use crate::expression::{Expression, Scope};
use crate::graph::{EdgeView, WorkflowGraph};
use crate::ledger::{LogLevel, RunLedger};
use crate::node::NodeId;
use crate::registry::{NodeContext, NodeExecutorRegistry, NodeOutcome};
use petgraph::graph::NodeIndex;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id as TaskId, JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Scheduler limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for a whole run.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Maximum number of nodes executing at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_run_timeout_secs() -> u64 {
    300
}

fn default_max_concurrency() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// A finished node task.
struct Completion {
    seq: u64,
    index: NodeIndex,
    duration_ms: u64,
    result: Result<NodeOutcome, NodeExecutionError>,
}

impl Completion {
    /// A node whose wrapper task died before reporting back.
    fn lost(seq: u64, index: NodeIndex, node_id: NodeId, err: JoinError) -> Self {
        Self {
            seq,
            index,
            duration_ms: 0,
            result: Err(NodeExecutionError::new(
                node_id,
                panic_message(err),
                ErrorCause::Panicked,
            )),
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "node task was cancelled".to_string();
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("node task panicked: {detail}")
}

/// How the dispatch loop ended.
enum Ending {
    Drained,
    TimedOut,
    Cancelled,
}

/// Executes runs against a node executor registry.
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    registry: Arc<NodeExecutorRegistry>,
    config: EngineConfig,
}

impl ExecutionScheduler {
    #[must_use]
    pub fn new(registry: Arc<NodeExecutorRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `graph` to a terminal status and returns the sealed record.
    ///
    /// `record` is the run's pending or running record; its input is the run
    /// input.
    #[tracing::instrument(
        skip_all,
        fields(run_id = %record.run_id, workflow_id = %record.workflow_id)
    )]
    pub async fn execute(
        &self,
        graph: Arc<WorkflowGraph>,
        policy: FailurePolicy,
        record: RunExecutionRecord,
        cancel: CancellationToken,
    ) -> RunExecutionRecord {
        let mut run = RunState::new(&graph, policy, record);
        let deadline = Instant::now() + self.config.run_timeout();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let mut tasks: JoinSet<Completion> = JoinSet::new();
        let mut dispatched: HashMap<TaskId, (u64, NodeIndex)> = HashMap::new();
        let mut buffered: BTreeMap<u64, Completion> = BTreeMap::new();
        let mut next_seq = 0u64;
        let mut committed = 0u64;
        let limit = self.config.max_concurrency.max(1) as u64;

        let ending = if cancel.is_cancelled() {
            Ending::Cancelled
        } else {
            loop {
                // Dispatch only at deterministic points: at start and after
                // each commit.
                while !run.halted && next_seq - committed < limit {
                    let Some(index) = run.ready.pop_front() else {
                        break;
                    };
                    if let Some(input) = run.prepare(index) {
                        let task = self.spawn_node(&mut tasks, &run, index, input, next_seq);
                        dispatched.insert(task, (next_seq, index));
                        next_seq += 1;
                    }
                }

                if next_seq == committed {
                    break Ending::Drained;
                }

                if let Some(completion) = buffered.remove(&committed) {
                    run.commit(completion);
                    committed += 1;
                    continue;
                }

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break Ending::Cancelled,
                    () = &mut sleep => break Ending::TimedOut,
                    joined = tasks.join_next_with_id() => match joined {
                        Some(Ok((task, completion))) => {
                            dispatched.remove(&task);
                            buffered.insert(completion.seq, completion);
                        }
                        Some(Err(e)) => match dispatched.remove(&e.id()) {
                            Some((seq, index)) => {
                                tracing::error!(error = %e, "node wrapper task failed");
                                let node_id = run.node_id(index).clone();
                                buffered.insert(seq, Completion::lost(seq, index, node_id, e));
                            }
                            None => {
                                tracing::error!(error = %e, "unknown node task failed");
                            }
                        },
                        None => {
                            tracing::error!(
                                dispatched = next_seq,
                                committed,
                                "node tasks vanished before completing"
                            );
                            break Ending::Drained;
                        }
                    },
                }
            }
        };

        if !matches!(ending, Ending::Drained) {
            tasks.abort_all();
        }
        run.finish(ending, self.config.run_timeout_secs)
    }

    fn spawn_node(
        &self,
        tasks: &mut JoinSet<Completion>,
        run: &RunState<'_>,
        index: NodeIndex,
        input: JsonValue,
        seq: u64,
    ) -> TaskId {
        let node = run.graph.node(index).clone();
        let ctx = NodeContext {
            run_id: run.record.run_id,
            run_input: Arc::clone(&run.run_input),
            outputs: Arc::clone(&run.outputs),
        };
        let registry = Arc::clone(&self.registry);

        let handle = tasks.spawn(async move {
            let started = Instant::now();
            let node_id = node.id.clone();
            // The inner task isolates panics so the completion still knows
            // which node it belongs to.
            let mut inner = AbortOnDrop(tokio::spawn(async move {
                registry.execute(&node, input, &ctx).await
            }));
            let result = match (&mut inner.0).await {
                Ok(result) => result,
                Err(e) => Err(NodeExecutionError::new(
                    node_id,
                    panic_message(e),
                    ErrorCause::Panicked,
                )),
            };
            Completion {
                seq,
                index,
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                result,
            }
        });
        handle.id()
    }
}

/// Mutable state of one run, owned by the scheduler loop.
struct RunState<'g> {
    graph: &'g WorkflowGraph,
    policy: FailurePolicy,
    record: RunExecutionRecord,
    ledger: RunLedger,
    run_input: Arc<JsonValue>,
    outputs: Arc<HashMap<NodeId, JsonValue>>,
    /// Unresolved incoming edges per node.
    remaining: Vec<usize>,
    /// Per edge: did the source emit on this edge's port.
    edge_active: Vec<bool>,
    ready: VecDeque<NodeIndex>,
    first_error: Option<NodeExecutionError>,
    halted: bool,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g WorkflowGraph, policy: FailurePolicy, mut record: RunExecutionRecord) -> Self {
        record.start();
        record.nodes = graph
            .nodes()
            .map(|n| crate::execution::NodeExecutionRecord::new(n.id.clone()))
            .collect();

        let mut ledger = RunLedger::new(record.run_id);
        ledger.append(
            None,
            LogLevel::Info,
            "run started",
            Some(json!({
                "workflow_id": record.workflow_id.to_string(),
                "workflow_version": record.workflow_version,
                "nodes": graph.node_count(),
            })),
        );

        let remaining = graph.node_indices().map(|i| graph.in_degree(i)).collect();
        let run_input = Arc::new(record.input.clone());

        Self {
            graph,
            policy,
            record,
            ledger,
            run_input,
            outputs: Arc::new(HashMap::new()),
            remaining,
            edge_active: vec![false; graph.edge_count()],
            ready: VecDeque::from([graph.trigger()]),
            first_error: None,
            halted: false,
        }
    }

    fn node_id(&self, index: NodeIndex) -> &'g NodeId {
        &self.graph.node(index).id
    }

    /// Resolves a popped node: returns its input, or skips it.
    fn prepare(&mut self, index: NodeIndex) -> Option<JsonValue> {
        let node_id = self.node_id(index);
        let input = if index == self.graph.trigger() {
            self.record.input.clone()
        } else {
            self.resolve_input(index)?
        };

        self.record.nodes[index.index()].start(input.clone());
        self.ledger.append(
            Some(node_id),
            LogLevel::Info,
            "node started",
            Some(json!({ "kind": self.graph.node(index).kind() })),
        );
        Some(input)
    }

    /// Merged input from the active incoming edges; skips the node when
    /// there are none.
    fn resolve_input(&mut self, index: NodeIndex) -> Option<JsonValue> {
        let mut active: Vec<EdgeView<'g>> = Vec::new();
        for view in self.graph.incoming(index) {
            if self.record.nodes[view.peer.index()].status != NodeStatus::Success
                || !self.edge_active[view.index.index()]
            {
                continue;
            }
            if let Some(guard) = &view.edge.guard {
                if !self.guard_holds(view.edge, guard) {
                    continue;
                }
            }
            active.push(view);
        }

        if active.is_empty() {
            self.skip(index, "no active incoming edge");
            return None;
        }
        Some(self.merge_inputs(&active))
    }

    fn guard_holds(&mut self, edge: &Edge, guard: &str) -> bool {
        let expression = match Expression::parse(guard) {
            Ok(expression) => expression,
            Err(e) => {
                self.ledger.node(
                    &edge.target,
                    LogLevel::Warn,
                    format!("guard on edge {} treated as false: {e}", edge.describe()),
                );
                return false;
            }
        };
        let current = self.outputs.get(&edge.source).unwrap_or(&JsonValue::Null);
        let scope = Scope {
            current,
            run: &self.run_input,
            nodes: &self.outputs,
        };
        let holds = expression.evaluate_bool(&scope);
        if !holds {
            self.ledger.node(
                &edge.target,
                LogLevel::Debug,
                format!("guard `{guard}` on edge {} is false", edge.describe()),
            );
        }
        holds
    }

    /// Builds a node's input from its active incoming edges, in edge order.
    fn merge_inputs(&self, active: &[EdgeView<'_>]) -> JsonValue {
        let output_of = |view: &EdgeView<'_>| {
            self.outputs
                .get(&view.edge.source)
                .cloned()
                .unwrap_or(JsonValue::Null)
        };

        if let [view] = active {
            if view.edge.target_port.is_none() {
                return output_of(view);
            }
        }

        let mut merged = Map::new();
        for view in active {
            match (&view.edge.target_port, output_of(view)) {
                (Some(port), value) => {
                    merged.insert(port.clone(), value);
                }
                (None, JsonValue::Object(fields)) => merged.extend(fields),
                (None, value) => {
                    merged.insert(view.edge.source.to_string(), value);
                }
            }
        }
        JsonValue::Object(merged)
    }

    fn skip(&mut self, index: NodeIndex, reason: &str) {
        let node_id = self.node_id(index);
        if self.record.nodes[index.index()].skip(reason) {
            self.ledger.node(node_id, LogLevel::Info, format!("node skipped: {reason}"));
        }
        self.propagate(index, |_| false);
    }

    /// Resolves `index`'s outgoing edges and enqueues successors that have
    /// nothing left to wait for.
    fn propagate(&mut self, index: NodeIndex, is_active: impl Fn(&Edge) -> bool) {
        for view in self.graph.outgoing(index) {
            self.edge_active[view.index.index()] = is_active(view.edge);
            let remaining = &mut self.remaining[view.peer.index()];
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.ready.push_back(view.peer);
            }
        }
    }

    fn commit(&mut self, completion: Completion) {
        let index = completion.index;
        let node_id = self.node_id(index);

        match completion.result {
            Ok(mut outcome) => {
                for log in outcome.logs.drain(..) {
                    self.ledger.node_log(node_id, log);
                }
                outcome.metrics.duration_ms = completion.duration_ms;
                Arc::make_mut(&mut self.outputs).insert(node_id.clone(), outcome.output.clone());
                self.record.nodes[index.index()]
                    .succeed(outcome.output.clone(), outcome.metrics.clone());
                self.ledger.append(
                    Some(node_id),
                    LogLevel::Info,
                    "node succeeded",
                    Some(json!({ "duration_ms": completion.duration_ms })),
                );
                self.propagate(index, |edge| {
                    edge.source_port
                        .as_deref()
                        .is_none_or(|port| outcome.is_port_active(port))
                });
            }
            Err(error) => {
                self.ledger.append(
                    Some(node_id),
                    LogLevel::Error,
                    format!("node failed: {}", error.message),
                    serde_json::to_value(&error.cause).ok(),
                );
                self.record.nodes[index.index()].fail(error.clone(), completion.duration_ms);
                if self.first_error.is_none() {
                    self.first_error = Some(error);
                }
                match self.policy {
                    FailurePolicy::Halt => {
                        if !self.halted {
                            self.halted = true;
                            self.ledger.run(
                                LogLevel::Warn,
                                format!("halting run after node {node_id} failed"),
                            );
                        }
                    }
                    FailurePolicy::Continue => self.propagate(index, |_| false),
                }
            }
        }
    }

    /// Output of the succeeded sink nodes.
    fn run_output(&self) -> JsonValue {
        let sinks: Vec<(&NodeId, &JsonValue)> = self
            .graph
            .node_indices()
            .filter(|&i| self.graph.is_sink(i))
            .filter_map(|i| {
                let id = self.node_id(i);
                self.outputs.get(id).map(|output| (id, output))
            })
            .collect();
        match sinks.as_slice() {
            [] => JsonValue::Null,
            [(_, output)] => (*output).clone(),
            many => JsonValue::Object(
                many.iter()
                    .map(|(id, output)| (id.to_string(), (*output).clone()))
                    .collect(),
            ),
        }
    }

    fn finish(mut self, ending: Ending, budget_secs: u64) -> RunExecutionRecord {
        let skip_reason = match ending {
            Ending::Drained if self.halted => "run halted after a node failure",
            Ending::Drained => "not reached",
            Ending::TimedOut => "run timed out",
            Ending::Cancelled => "run cancelled",
        };
        for index in self.graph.node_indices() {
            if self.record.nodes[index.index()].status == NodeStatus::Pending {
                let node_id = self.node_id(index);
                self.record.nodes[index.index()].skip(skip_reason);
                self.ledger
                    .node(node_id, LogLevel::Info, format!("node skipped: {skip_reason}"));
            }
        }

        match ending {
            Ending::Drained => match &self.first_error {
                Some(error) => {
                    self.record.fail(RunStatus::Error, RunError::from(error));
                }
                None => {
                    let output = self.run_output();
                    self.record.succeed(output);
                }
            },
            Ending::TimedOut => {
                self.record.fail(
                    RunStatus::Timeout,
                    RunError::run(format!("run exceeded its {budget_secs}s budget")),
                );
            }
            Ending::Cancelled => {
                self.record
                    .fail(RunStatus::Cancelled, RunError::run("run cancelled"));
            }
        }

        let status = self.record.status;
        let level = if status == RunStatus::Success {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        self.ledger.append(
            None,
            level,
            format!("run finished with status {status}"),
            self.record
                .error
                .as_ref()
                .map(|e| json!({ "message": e.message })),
        );
        self.ledger.seal();

        let mut metrics = RunMetrics {
            duration_ms: self.record.metrics.duration_ms,
            ..RunMetrics::default()
        };
        for node in &self.record.nodes {
            if matches!(node.status, NodeStatus::Success | NodeStatus::Error) {
                if let Some(tokens) = node.metrics.tokens {
                    metrics.total_tokens += u64::from(tokens.total());
                }
                metrics
                    .node_metrics
                    .insert(node.node_id.clone(), node.metrics.clone());
            }
        }
        self.record.metrics = metrics;
        self.record.logs = self.ledger.into_entries();
        self.record
    }
}
