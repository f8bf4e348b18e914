//! Graph traversal.
//!
//! Starting from the start node, the traverser descends the directed graph
//! depth-first in declared edge order, dispatching each node to its
//! handler and feeding condition results back into edge selection.
//! Siblings run sequentially; there is no parallelism inside a run.
//!
//! Cycles are legal but bounded: recursion depth and total node
//! executions have hard caps, and a single node visited suspiciously
//! often earns a warning before the caps bite.

use futures_util::future::BoxFuture;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::event_bus::{EventHub, ExecutionEvent};
use crate::graph::WorkflowGraph;
use crate::handlers::NodeExecutor;

/// Maximum recursion depth per run.
pub const MAX_NODE_DEPTH: usize = 100;
/// Maximum total node executions per run.
pub const MAX_NODE_VISITS: usize = 500;
/// Per-node visit count above which a loop warning is logged.
const NOISY_NODE_VISITS: u32 = 10;

/// Fatal traversal failures. Handler errors never surface here; only the
/// loop-protection bounds do.
#[derive(Debug, Error, Diagnostic)]
pub enum TraversalError {
    #[error(
        "maximum node depth ({MAX_NODE_DEPTH}) exceeded; this may indicate a circular connection in the workflow"
    )]
    #[diagnostic(
        code(tradeweave::traversal::depth),
        help("Break the cycle or route it through a conditional that eventually goes false.")
    )]
    DepthExceeded,

    #[error(
        "maximum node visits ({MAX_NODE_VISITS}) exceeded; this may indicate an infinite loop in the workflow"
    )]
    #[diagnostic(code(tradeweave::traversal::visits))]
    VisitsExceeded,
}

#[derive(Default)]
struct VisitTracker {
    per_node: FxHashMap<String, u32>,
    total: usize,
}

/// Walks one workflow graph for one execution.
pub struct Traverser<'a> {
    graph: &'a WorkflowGraph,
    hub: &'a EventHub,
    workflow_id: i64,
}

impl<'a> Traverser<'a> {
    #[must_use]
    pub fn new(graph: &'a WorkflowGraph, hub: &'a EventHub, workflow_id: i64) -> Self {
        Self {
            graph,
            hub,
            workflow_id,
        }
    }

    /// Execute the graph from `start_id` until every reachable branch
    /// terminates or a loop bound trips.
    #[instrument(skip(self, executor), fields(workflow_id = self.workflow_id), err)]
    pub async fn run(
        &self,
        executor: &mut NodeExecutor,
        start_id: &str,
    ) -> Result<(), TraversalError> {
        let mut visits = VisitTracker::default();
        self.chain(executor, start_id, &mut visits, 0).await
    }

    fn chain<'b>(
        &'b self,
        executor: &'b mut NodeExecutor,
        node_id: &'b str,
        visits: &'b mut VisitTracker,
        depth: usize,
    ) -> BoxFuture<'b, Result<(), TraversalError>> {
        Box::pin(async move {
            if depth > MAX_NODE_DEPTH {
                return Err(TraversalError::DepthExceeded);
            }
            if visits.total >= MAX_NODE_VISITS {
                return Err(TraversalError::VisitsExceeded);
            }

            let count = visits.per_node.entry(node_id.to_string()).or_insert(0);
            *count += 1;
            visits.total += 1;
            if *count > NOISY_NODE_VISITS {
                let count = *count;
                executor.log_warning(format!(
                    "Node {node_id} has been visited {count} times. Check for unintended loops."
                ));
            }

            // Dangling references terminate the branch quietly; the graph
            // validator normally prevents them.
            let Some(node) = self.graph.node(node_id) else {
                return Ok(());
            };

            // Gates consume upstream condition results, looked up by the
            // incoming edges' source ids. Sources that produced no
            // condition are skipped, not defaulted.
            let gate_inputs: Vec<bool> = if node.kind.is_gate() {
                self.graph
                    .incoming(node_id)
                    .filter_map(|edge| executor.context.condition_result(&edge.source))
                    .collect()
            } else {
                Vec::new()
            };

            let report = executor.dispatch(node, &gate_inputs).await;

            if !node.kind.is_start() {
                self.hub.emit(ExecutionEvent::node_executed(
                    self.workflow_id,
                    node.label(),
                    report.as_ref().is_none_or(|r| r.ok()),
                ));
            }

            let mut edges: Vec<_> = self.graph.outgoing(node_id).collect();
            if let Some(condition) = report.as_ref().and_then(|r| r.condition) {
                executor.context.set_condition_result(node_id, condition);
                edges.retain(|edge| edge.matches_condition(condition));
            }

            for edge in edges {
                self.chain(executor, &edge.target, visits, depth + 1).await?;
            }
            Ok(())
        })
    }
}
