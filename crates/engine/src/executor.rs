//! Flow execution engine.
//!
//! `FlowExecutor` is the central orchestrator:
//! 1. Builds the dependency graph, dropping malformed edges.
//! 2. Asks the scheduler for the next ready batch and runs it concurrently,
//!    waiting for the whole batch before computing the next one.
//! 3. Dispatches each node through the `NodeRegistry` inside the retry layer.
//! 4. Writes each node's outcome once into the run's result store.
//! 5. Skips nodes whose dependencies failed, unless their processor
//!    tolerates missing inputs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use nodes::{
    Dispatch, ExecutionContext, NodeDefinition, NodeOutput, NodeRegistry, NodeRole, ResolvedInputs,
};

use crate::config::ExecutorConfig;
use crate::context::RunContext;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::graph::DependencyGraph;
use crate::models::{
    Edge, FailureKind, FailureRecord, Flow, NodeOutcome, NodeTrace, RunOutcome, RunStatus,
};
use crate::retry::{AttemptFailure, Attempted, RetryLayer};
use crate::scheduler::{Scheduler, Step};
use crate::EngineError;

// ---------------------------------------------------------------------------
// FlowExecutor
// ---------------------------------------------------------------------------

/// Runs flows against a processor registry.
///
/// Holds no per-run state: construct one per process (or per test) and call
/// [`FlowExecutor::run_flow`] as often as needed. Each run gets a fresh
/// result store.
pub struct FlowExecutor {
    registry: Arc<NodeRegistry>,
    config: ExecutorConfig,
    notifier: Arc<dyn ExecutionNotifier>,
    credentials: Arc<HashMap<String, String>>,
}

impl FlowExecutor {
    pub fn new(registry: NodeRegistry, config: ExecutorConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            notifier: Arc::new(NoopNotifier),
            credentials: Arc::new(HashMap::new()),
        }
    }

    /// Publish status transitions and results to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Credentials handed to every processor through its context.
    pub fn with_credentials(mut self, credentials: HashMap<String, String>) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a saved flow.
    pub async fn run(
        &self,
        flow: &Flow,
        runtime_inputs: HashMap<String, Value>,
    ) -> Result<RunOutcome, EngineError> {
        self.run_flow(&flow.nodes, &flow.edges, runtime_inputs).await
    }

    /// Run `nodes`/`edges` to completion.
    ///
    /// `runtime_inputs` supplies values for entry nodes by node ID. Values
    /// addressed to any other node are logged and ignored.
    ///
    /// # Errors
    /// Only structural problems that make the node set itself invalid
    /// (empty or duplicate IDs). Node failures and cycles are reported in
    /// the returned [`RunOutcome`].
    pub async fn run_flow(
        &self,
        nodes: &[NodeDefinition],
        edges: &[Edge],
        runtime_inputs: HashMap<String, Value>,
    ) -> Result<RunOutcome, EngineError> {
        self.run_flow_with_cancel(nodes, edges, runtime_inputs, CancellationToken::new())
            .await
    }

    /// Like [`run_flow`](Self::run_flow), stopping between batches once
    /// `cancel` fires. In-flight nodes finish; undispatched nodes are
    /// recorded as skipped.
    #[instrument(
        name = "run_flow",
        skip_all,
        fields(run_id = tracing::field::Empty, nodes = nodes.len(), edges = edges.len())
    )]
    pub async fn run_flow_with_cancel(
        &self,
        nodes: &[NodeDefinition],
        edges: &[Edge],
        runtime_inputs: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        // ------------------------------------------------------------------
        // Build the dependency graph; runtime inputs go to entry nodes only.
        // ------------------------------------------------------------------
        let graph = DependencyGraph::build(nodes, edges, &self.registry)?;

        let node_map: HashMap<String, Arc<NodeDefinition>> = nodes
            .iter()
            .map(|n| (n.id.clone(), Arc::new(n.clone())))
            .collect();

        let mut runtime_inputs: Vec<(String, Value)> = runtime_inputs.into_iter().collect();
        runtime_inputs.sort_by(|a, b| a.0.cmp(&b.0));
        let runtime_inputs: HashMap<String, Value> = runtime_inputs
            .into_iter()
            .filter(|(node_id, _)| match node_map.get(node_id) {
                None => {
                    warn!(node_id = %node_id, "ignoring runtime input for unknown node");
                    false
                }
                Some(node) if self.registry.role_of(&node.node_type) != NodeRole::Entry => {
                    warn!(
                        node_id = %node_id,
                        node_type = %node.node_type,
                        "ignoring runtime input for non-entry node"
                    );
                    false
                }
                Some(_) => true,
            })
            .collect();

        let ctx = Arc::new(RunContext::new(
            run_id,
            graph.node_ids(),
            Arc::clone(&self.notifier),
        ));
        ctx.notify(ExecutionEvent::RunStarted {
            run_id,
            node_count: graph.len(),
        });
        info!(nodes = graph.len(), "run started");

        let retry = RetryLayer::from_config(&self.config);

        let mut scheduler = Scheduler::new(&graph);
        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut stalled_nodes: Vec<String> = Vec::new();
        let mut cancelled = false;

        // ------------------------------------------------------------------
        // Batch loop
        // ------------------------------------------------------------------
        loop {
            if cancel.is_cancelled() {
                let remaining = scheduler.unresolved();
                warn!(remaining = remaining.len(), "run cancelled between batches");
                skip_remaining(
                    &mut scheduler,
                    &ctx,
                    &node_map,
                    &remaining,
                    FailureKind::Cancelled,
                    "run cancelled before node was dispatched",
                );
                cancelled = true;
                break;
            }

            let batch = match scheduler.next_step(&graph, &ctx) {
                Step::Finished => break,
                Step::Batch(batch) => batch,
                Step::Stalled(remaining) => {
                    error!(nodes = ?remaining, "run stalled: nodes can never become ready");
                    skip_remaining(
                        &mut scheduler,
                        &ctx,
                        &node_map,
                        &remaining,
                        FailureKind::Unreachable,
                        "never reached: node is part of, or depends on, a dependency cycle",
                    );
                    stalled_nodes = remaining;
                    break;
                }
                Step::Wait => {
                    // Every batch is awaited in full, so nothing can still be in flight.
                    let remaining = scheduler.unresolved();
                    error!(nodes = ?remaining, "scheduler reported in-flight nodes after the batch barrier");
                    skip_remaining(
                        &mut scheduler,
                        &ctx,
                        &node_map,
                        &remaining,
                        FailureKind::Unreachable,
                        "never reached: scheduler lost track of the node",
                    );
                    stalled_nodes = remaining;
                    break;
                }
            };

            let batch_index = batches.len();
            info!(batch = batch_index, nodes = ?batch, "dispatching batch");

            let mut spawned = Vec::with_capacity(batch.len());
            for id in &batch {
                scheduler.mark_running(id);
                let node = Arc::clone(&node_map[id]);

                let failed_deps: Vec<&str> = graph
                    .dependencies_of(id)
                    .iter()
                    .filter(|dep| ctx.is_failed(dep))
                    .map(String::as_str)
                    .collect();
                if !failed_deps.is_empty()
                    && !self.registry.tolerates_missing_inputs(&node.node_type)
                {
                    let seq = ctx.next_seq();
                    record_skip(
                        &ctx,
                        &node,
                        FailureKind::UpstreamFailed,
                        format!("skipped: upstream dependency failed ({})", failed_deps.join(", ")),
                    );
                    ctx.record_trace(
                        id,
                        NodeTrace {
                            batch: batch_index,
                            started_seq: seq,
                            resolved_seq: seq,
                            attempts: 0,
                        },
                    );
                    continue;
                }

                let task = NodeTask {
                    inputs: resolve_inputs(&graph, &ctx, id),
                    exec_ctx: ExecutionContext {
                        run_id,
                        credentials: (*self.credentials).clone(),
                        runtime_input: runtime_inputs.get(id).cloned(),
                        previous_node_metadata: upstream_metadata(&graph, &ctx, &node_map, id),
                    },
                    node,
                    batch: batch_index,
                    registry: Arc::clone(&self.registry),
                    retry: retry.clone(),
                    ctx: Arc::clone(&ctx),
                };
                spawned.push((id.clone(), tokio::spawn(task.run())));
            }

            // Barrier: the whole batch settles before the next one is computed.
            let (spawned_ids, handles): (Vec<String>, Vec<_>) = spawned.into_iter().unzip();
            let joined = join_all(handles).await;

            for (id, result) in spawned_ids.iter().zip(joined) {
                if let Err(join_error) = result {
                    error!(node_id = %id, error = %join_error, "node task panicked");
                    if !ctx.is_resolved(id) {
                        let failure = FailureRecord::new(
                            &node_map[id],
                            FailureKind::Panicked,
                            format!("processor panicked: {join_error}"),
                            1,
                        );
                        if let Err(err) = ctx.record(id, NodeOutcome::Failed(failure)) {
                            error!(node_id = %id, error = %err, "could not record panic");
                        }
                    }
                }
            }

            for id in &batch {
                scheduler.mark_resolved(id);
            }
            batches.push(batch);
        }

        // ------------------------------------------------------------------
        // Assemble the outcome
        // ------------------------------------------------------------------
        let status = if !stalled_nodes.is_empty() {
            RunStatus::Stalled
        } else if cancelled {
            RunStatus::Cancelled
        } else if ctx.has_failures() {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };

        let outcome = RunOutcome {
            run_id,
            status,
            results: ctx.results(),
            batches,
            dropped_edges: graph.dropped_edges().to_vec(),
            stalled_nodes,
            traces: ctx.traces(),
            started_at,
            finished_at: Utc::now(),
        };

        ctx.notify(ExecutionEvent::RunFinished { run_id, status });
        info!(
            ?status,
            resolved = ctx.resolved_count(),
            failed = outcome.failed_nodes().len(),
            batches = outcome.batches.len(),
            "run finished"
        );

        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Per-node execution
// ---------------------------------------------------------------------------

/// Everything one spawned node execution owns.
struct NodeTask {
    node: Arc<NodeDefinition>,
    inputs: ResolvedInputs,
    exec_ctx: ExecutionContext,
    batch: usize,
    registry: Arc<NodeRegistry>,
    retry: RetryLayer,
    ctx: Arc<RunContext>,
}

impl NodeTask {
    async fn run(self) {
        let node = self.node.as_ref();
        let ctx = self.ctx.as_ref();

        ctx.mark_processing(&node.id);
        let started_seq = ctx.next_seq();

        let (outcome, attempts) = match self.registry.dispatch(&node.node_type) {
            Dispatch::Unknown => {
                warn!(
                    node_id = %node.id,
                    node_type = %node.node_type,
                    "no processor registered for node type, treating as no-op"
                );
                (NodeOutcome::Completed(NodeOutput::Empty), 0)
            }
            Dispatch::Registered(processor) => {
                let processor = processor.as_ref();
                let inputs = &self.inputs;
                let exec_ctx = &self.exec_ctx;

                let result = self
                    .retry
                    .run(
                        &node.id,
                        move |_attempt| processor.execute(node, inputs, exec_ctx),
                        |notice| {
                            ctx.notify_retry(&node.id, notice.attempt, notice.delay, notice.error)
                        },
                    )
                    .await;

                match result {
                    Ok(Attempted { value, attempts }) => {
                        info!(node_id = %node.id, attempts, "node completed");
                        (NodeOutcome::Completed(value), attempts)
                    }
                    Err(AttemptFailure { error, attempts }) => {
                        error!(node_id = %node.id, attempts, error = %error, "node failed");
                        let failure = FailureRecord::attempted(node, &error, attempts);
                        (NodeOutcome::Failed(failure), attempts)
                    }
                }
            }
        };

        let resolved_seq = ctx.next_seq();
        ctx.record_trace(
            &node.id,
            NodeTrace {
                batch: self.batch,
                started_seq,
                resolved_seq,
                attempts,
            },
        );
        if let Err(err) = ctx.record(&node.id, outcome) {
            error!(node_id = %node.id, error = %err, "discarding duplicate result");
        }
    }
}

/// Finished results of `node_id`'s dependencies; failed ones leave a hole.
fn resolve_inputs(graph: &DependencyGraph, ctx: &RunContext, node_id: &str) -> ResolvedInputs {
    let mut inputs = ResolvedInputs::new();
    for dep in graph.dependencies_of(node_id) {
        match ctx.outcome(dep) {
            Some(NodeOutcome::Completed(output)) => inputs.insert(dep.clone(), output),
            Some(NodeOutcome::Failed(_)) | None => inputs.mark_failed(dep.clone()),
        }
    }
    inputs
}

fn upstream_metadata(
    graph: &DependencyGraph,
    ctx: &RunContext,
    node_map: &HashMap<String, Arc<NodeDefinition>>,
    node_id: &str,
) -> HashMap<String, Value> {
    graph
        .dependencies_of(node_id)
        .iter()
        .map(|dep| {
            let node_type = node_map.get(dep).map(|n| n.node_type.as_str());
            let status = ctx.status(dep);
            (dep.clone(), json!({ "nodeType": node_type, "status": status }))
        })
        .collect()
}

/// Skip every node in `ids` that has no result yet and retire it from the
/// scheduler.
fn skip_remaining(
    scheduler: &mut Scheduler,
    ctx: &RunContext,
    node_map: &HashMap<String, Arc<NodeDefinition>>,
    ids: &[String],
    kind: FailureKind,
    reason: &str,
) {
    for id in ids {
        if !ctx.is_resolved(id) {
            record_skip(ctx, &node_map[id], kind, reason.to_string());
        }
        scheduler.mark_resolved(id);
    }
}

fn record_skip(ctx: &RunContext, node: &NodeDefinition, kind: FailureKind, reason: String) {
    warn!(node_id = %node.id, ?kind, reason = %reason, "skipping node");
    let failure = FailureRecord::skipped(node, kind, reason);
    if let Err(err) = ctx.record(&node.id, NodeOutcome::Failed(failure)) {
        error!(node_id = %node.id, error = %err, "could not record skipped node");
    }
}
