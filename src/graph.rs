//! Workflow graph model.
//!
//! A workflow is a directed graph of [`NodeRecord`]s joined by
//! [`EdgeRecord`]s. The editor persists both as free-form JSON blobs; this
//! module decodes them into an indexed structure the traverser can walk:
//! `outgoing` and `incoming` adjacency lists in declared edge order, plus an
//! id → node index.
//!
//! Graphs may contain cycles — the traverser bounds them — but every edge
//! endpoint must reference an existing node id, and node ids must be unique.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::NodeKind;

/// A single node as persisted by the graph editor: `{id, type, data}`.
///
/// `data` is an untyped property bag whose recognized keys depend on the
/// node kind; unknown keys are ignored by handlers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl NodeRecord {
    /// Display label for progress events: the editor-supplied `label` if
    /// present, otherwise the kind tag.
    #[must_use]
    pub fn label(&self) -> &str {
        self.data
            .get("label")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.kind.encode())
    }
}

/// A directed edge `{source, target, sourceHandle?}`.
///
/// The `sourceHandle` label encodes conditional branches: `"yes"` edges are
/// followed when the source's condition held, `"no"` edges when it did not,
/// and unlabeled edges always.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    #[serde(
        rename = "sourceHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,
}

impl EdgeRecord {
    /// Whether this edge should be followed given the source node's
    /// condition outcome. Edges labeled neither `"yes"` nor `"no"` are
    /// default edges and always follow.
    #[must_use]
    pub fn matches_condition(&self, condition: bool) -> bool {
        match self.source_handle.as_deref() {
            Some("yes") => condition,
            Some("no") => !condition,
            _ => true,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("invalid graph JSON: {0}")]
    #[diagnostic(
        code(tradeweave::graph::decode),
        help("Check that nodes/edges match the editor's {{id, type, data}} / {{source, target}} shape.")
    )]
    Decode(#[from] serde_json::Error),

    #[error("duplicate node id: {id}")]
    #[diagnostic(code(tradeweave::graph::duplicate_node))]
    DuplicateNode { id: String },

    #[error("edge references missing node: {id}")]
    #[diagnostic(
        code(tradeweave::graph::dangling_edge),
        help("Every edge source/target must be the id of a node in the same graph.")
    )]
    DanglingEdge { id: String },
}

/// Indexed form of a workflow graph, ready for traversal.
#[derive(Clone, Debug, Default)]
pub struct WorkflowGraph {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
    by_id: FxHashMap<String, usize>,
    outgoing: FxHashMap<String, Vec<usize>>,
    incoming: FxHashMap<String, Vec<usize>>,
}

impl WorkflowGraph {
    /// Build an indexed graph, validating node-id uniqueness and edge
    /// endpoint integrity. Edge order is preserved as declared.
    pub fn new(nodes: Vec<NodeRecord>, edges: Vec<EdgeRecord>) -> Result<Self, GraphError> {
        let mut by_id = FxHashMap::default();
        for (idx, node) in nodes.iter().enumerate() {
            if by_id.insert(node.id.clone(), idx).is_some() {
                return Err(GraphError::DuplicateNode {
                    id: node.id.clone(),
                });
            }
        }

        let mut outgoing: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        let mut incoming: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (idx, edge) in edges.iter().enumerate() {
            for endpoint in [&edge.source, &edge.target] {
                if !by_id.contains_key(endpoint) {
                    return Err(GraphError::DanglingEdge {
                        id: endpoint.clone(),
                    });
                }
            }
            outgoing.entry(edge.source.clone()).or_default().push(idx);
            incoming.entry(edge.target.clone()).or_default().push(idx);
        }

        Ok(Self {
            nodes,
            edges,
            by_id,
            outgoing,
            incoming,
        })
    }

    /// Decode the persisted JSON blobs (`nodes`, `edges` arrays) into an
    /// indexed graph.
    pub fn from_json(nodes: &Value, edges: &Value) -> Result<Self, GraphError> {
        let nodes: Vec<NodeRecord> = serde_json::from_value(nodes.clone())?;
        let edges: Vec<EdgeRecord> = serde_json::from_value(edges.clone())?;
        Self::new(nodes, edges)
    }

    /// The unique `start` node, if the graph has one.
    #[must_use]
    pub fn start_node(&self) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.kind.is_start())
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.by_id.get(id).map(|&idx| &self.nodes[idx])
    }

    /// Outgoing edges of `id` in declared order.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &EdgeRecord> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    /// Incoming edges of `id` in declared order. Logic gates read their
    /// upstream condition results through these.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &EdgeRecord> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &[EdgeRecord] {
        &self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_json() -> (Value, Value) {
        (
            json!([
                {"id": "1", "type": "start", "data": {"label": "Start"}},
                {"id": "2", "type": "priceCondition", "data": {"symbol": "NIFTY"}},
                {"id": "3", "type": "log", "data": {"message": "hi"}},
            ]),
            json!([
                {"source": "1", "target": "2"},
                {"source": "2", "target": "3", "sourceHandle": "yes"},
            ]),
        )
    }

    #[test]
    fn decodes_and_indexes() {
        let (nodes, edges) = graph_json();
        let graph = WorkflowGraph::from_json(&nodes, &edges).unwrap();
        assert_eq!(graph.start_node().unwrap().id, "1");
        assert_eq!(graph.node("2").unwrap().kind, NodeKind::PriceCondition);
        let out: Vec<_> = graph.outgoing("2").collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_handle.as_deref(), Some("yes"));
        assert_eq!(graph.incoming("3").count(), 1);
    }

    #[test]
    fn rejects_dangling_edges() {
        let (nodes, _) = graph_json();
        let edges = json!([{"source": "1", "target": "404"}]);
        assert!(matches!(
            WorkflowGraph::from_json(&nodes, &edges),
            Err(GraphError::DanglingEdge { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let nodes = json!([
            {"id": "1", "type": "start", "data": {}},
            {"id": "1", "type": "log", "data": {}},
        ]);
        let edges = json!([]);
        assert!(matches!(
            WorkflowGraph::from_json(&nodes, &edges),
            Err(GraphError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn unknown_keys_in_data_are_kept() {
        let nodes = json!([
            {"id": "1", "type": "start", "data": {"scheduleType": "daily", "mystery": 42}},
        ]);
        let graph = WorkflowGraph::from_json(&nodes, &json!([])).unwrap();
        assert_eq!(graph.node("1").unwrap().data["mystery"], json!(42));
    }

    #[test]
    fn edge_condition_matching() {
        let yes = EdgeRecord {
            source: "a".into(),
            target: "b".into(),
            source_handle: Some("yes".into()),
        };
        let no = EdgeRecord {
            source: "a".into(),
            target: "c".into(),
            source_handle: Some("no".into()),
        };
        let plain = EdgeRecord {
            source: "a".into(),
            target: "d".into(),
            source_handle: None,
        };
        assert!(yes.matches_condition(true));
        assert!(!yes.matches_condition(false));
        assert!(no.matches_condition(false));
        assert!(!no.matches_condition(true));
        assert!(plain.matches_condition(true) && plain.matches_condition(false));
    }
}
