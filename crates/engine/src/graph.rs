//! Dependency graph builder. Run this before scheduling a flow.
//!
//! Rules enforced:
//! 1. Node IDs must be non-empty and unique (hard error).
//! 2. Edges whose `source` or `target` is not a known node are dropped.
//! 3. Self-referencing edges are dropped.
//! 4. Edges into entry-role nodes or out of exit-role nodes are dropped.
//!
//! Dropped edges are recorded and logged; they never abort the build, so one
//! bad edge does not stop the rest of a large flow from running.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use nodes::{NodeDefinition, NodeRegistry, NodeRole};

use crate::{models::Edge, EngineError};

static NO_NODES: BTreeSet<String> = BTreeSet::new();

/// Why an edge did not make it into the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    UnknownSource,
    UnknownTarget,
    SelfLoop,
    IntoEntryNode,
    OutOfExitNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedEdge {
    pub edge_id: String,
    pub source: String,
    pub target: String,
    pub reason: DropReason,
}

impl DroppedEdge {
    fn new(edge: &Edge, reason: DropReason) -> Self {
        Self {
            edge_id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
            reason,
        }
    }
}

/// Per-node upstream and downstream sets derived from the surviving edges.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Node IDs in declaration order.
    order: Vec<String>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
    edges: Vec<Edge>,
    dropped: Vec<DroppedEdge>,
}

impl DependencyGraph {
    /// Build the graph, taking node roles from the processor registry.
    ///
    /// # Errors
    /// - [`EngineError::EmptyNodeId`] if a node has an empty ID.
    /// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
    pub fn build(
        nodes: &[NodeDefinition],
        edges: &[Edge],
        registry: &NodeRegistry,
    ) -> Result<Self, EngineError> {
        Self::build_with_roles(nodes, edges, |node_type| registry.role_of(node_type))
    }

    /// Build the graph with an explicit role lookup.
    pub fn build_with_roles(
        nodes: &[NodeDefinition],
        edges: &[Edge],
        role_of: impl Fn(&str) -> NodeRole,
    ) -> Result<Self, EngineError> {
        // -------------------------------------------------------------------
        // 1. Index nodes, rejecting empty and duplicate IDs
        // -------------------------------------------------------------------
        let mut roles: HashMap<&str, NodeRole> = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(EngineError::EmptyNodeId(position));
            }
            if roles.insert(node.id.as_str(), role_of(&node.node_type)).is_some() {
                return Err(EngineError::DuplicateNodeId(node.id.clone()));
            }
        }

        let mut graph = Self {
            order: nodes.iter().map(|n| n.id.clone()).collect(),
            dependencies: nodes.iter().map(|n| (n.id.clone(), BTreeSet::new())).collect(),
            dependents: nodes.iter().map(|n| (n.id.clone(), BTreeSet::new())).collect(),
            edges: Vec::with_capacity(edges.len()),
            dropped: Vec::new(),
        };

        // -------------------------------------------------------------------
        // 2-4. Filter edges
        // -------------------------------------------------------------------
        for edge in edges {
            let reason = match (roles.get(edge.source.as_str()), roles.get(edge.target.as_str())) {
                (None, _) => Some(DropReason::UnknownSource),
                (_, None) => Some(DropReason::UnknownTarget),
                _ if edge.source == edge.target => Some(DropReason::SelfLoop),
                (_, Some(NodeRole::Entry)) => Some(DropReason::IntoEntryNode),
                (Some(NodeRole::Exit), _) => Some(DropReason::OutOfExitNode),
                _ => None,
            };

            match reason {
                Some(reason) => {
                    warn!(
                        edge_id = %edge.id,
                        source = %edge.source,
                        target = %edge.target,
                        ?reason,
                        "dropping edge"
                    );
                    graph.dropped.push(DroppedEdge::new(edge, reason));
                }
                None => graph.accept(edge),
            }
        }

        debug!(
            nodes = graph.order.len(),
            edges = graph.edges.len(),
            dropped = graph.dropped.len(),
            "dependency graph built"
        );
        Ok(graph)
    }

    fn accept(&mut self, edge: &Edge) {
        if let Some(deps) = self.dependencies.get_mut(&edge.target) {
            deps.insert(edge.source.clone());
        }
        if let Some(downstream) = self.dependents.get_mut(&edge.source) {
            downstream.insert(edge.target.clone());
        }
        self.edges.push(edge.clone());
    }

    /// Node IDs in declaration order.
    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Direct upstream node IDs of `node_id`.
    pub fn dependencies_of(&self, node_id: &str) -> &BTreeSet<String> {
        self.dependencies.get(node_id).unwrap_or(&NO_NODES)
    }

    /// Direct downstream node IDs of `node_id`.
    pub fn dependents_of(&self, node_id: &str) -> &BTreeSet<String> {
        self.dependents.get(node_id).unwrap_or(&NO_NODES)
    }

    /// Edges that survived the build.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn dropped_edges(&self) -> &[DroppedEdge] {
        &self.dropped
    }

    /// Static batch plan: each batch holds the nodes whose dependencies all
    /// sit in earlier batches (Kahn's algorithm, one layer at a time).
    ///
    /// # Errors
    /// [`EngineError::CycleDetected`] listing the nodes that never become ready.
    pub fn topological_batches(&self) -> Result<Vec<Vec<String>>, EngineError> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.dependencies_of(id).len()))
            .collect();

        let mut batches = Vec::new();
        let mut placed: HashSet<&str> = HashSet::with_capacity(self.order.len());

        loop {
            let batch: Vec<&str> = self
                .order
                .iter()
                .map(String::as_str)
                .filter(|id| !placed.contains(id) && in_degree[id] == 0)
                .collect();
            if batch.is_empty() {
                break;
            }

            for &id in &batch {
                placed.insert(id);
                for neighbour in self.dependents_of(id) {
                    if let Some(deg) = in_degree.get_mut(neighbour.as_str()) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
            batches.push(batch.into_iter().map(str::to_owned).collect());
        }

        // If we didn't place every node the graph contains a cycle.
        if placed.len() != self.order.len() {
            let nodes = self
                .order
                .iter()
                .filter(|id| !placed.contains(id.as_str()))
                .cloned()
                .collect();
            return Err(EngineError::CycleDetected { nodes });
        }

        Ok(batches)
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn make_node(id: &str, node_type: &str) -> NodeDefinition {
        NodeDefinition::new(id, node_type, Value::Null)
    }

    fn roles(node_type: &str) -> NodeRole {
        match node_type {
            "input" => NodeRole::Entry,
            "output" => NodeRole::Exit,
            _ => NodeRole::Intermediate,
        }
    }

    fn build(nodes: &[NodeDefinition], edges: &[Edge]) -> DependencyGraph {
        DependencyGraph::build_with_roles(nodes, edges, roles).expect("graph should build")
    }

    #[test]
    fn linear_graph_records_dependencies() {
        // i1 → m1 → o1
        let graph = build(
            &[make_node("i1", "input"), make_node("m1", "ai_model"), make_node("o1", "output")],
            &[Edge::new("i1", "m1"), Edge::new("m1", "o1")],
        );

        assert!(graph.dependencies_of("i1").is_empty());
        assert!(graph.dependencies_of("m1").contains("i1"));
        assert!(graph.dependents_of("m1").contains("o1"));
        assert_eq!(
            graph.topological_batches().unwrap(),
            vec![vec!["i1"], vec!["m1"], vec!["o1"]]
        );
    }

    #[test]
    fn diamond_graph_batches_siblings_together() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let graph = build(
            &[make_node("a", "x"), make_node("b", "x"), make_node("c", "x"), make_node("d", "x")],
            &[
                Edge::new("a", "b"),
                Edge::new("a", "c"),
                Edge::new("b", "d"),
                Edge::new("c", "d"),
            ],
        );

        assert_eq!(
            graph.topological_batches().unwrap(),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let result = DependencyGraph::build_with_roles(
            &[make_node("a", "x"), make_node("a", "x")], // duplicate!
            &[],
            roles,
        );
        assert!(matches!(result, Err(EngineError::DuplicateNodeId(id)) if id == "a"));
    }

    #[test]
    fn empty_node_id_is_rejected() {
        let result = DependencyGraph::build_with_roles(&[make_node("", "x")], &[], roles);
        assert_eq!(result.unwrap_err(), EngineError::EmptyNodeId(0));
    }

    #[test]
    fn dangling_edges_are_dropped_not_fatal() {
        let graph = build(
            &[make_node("a", "x"), make_node("b", "x")],
            &[
                Edge::new("a", "ghost"), // ghost doesn't exist
                Edge::new("phantom", "b"),
                Edge::new("a", "b"),
            ],
        );

        let reasons: Vec<DropReason> = graph.dropped_edges().iter().map(|d| d.reason).collect();
        assert_eq!(reasons, vec![DropReason::UnknownTarget, DropReason::UnknownSource]);
        assert_eq!(graph.edges().len(), 1);
        assert!(graph.dependencies_of("b").contains("a"));
    }

    #[test]
    fn self_loop_is_dropped() {
        let graph = build(&[make_node("x", "x")], &[Edge::new("x", "x")]);
        assert!(graph.dependencies_of("x").is_empty());
        assert_eq!(graph.dropped_edges()[0].reason, DropReason::SelfLoop);
        assert_eq!(graph.topological_batches().unwrap(), vec![vec!["x"]]);
    }

    #[test]
    fn edges_into_entry_and_out_of_exit_are_normalised() {
        let graph = build(
            &[make_node("i1", "input"), make_node("m1", "ai_model"), make_node("o1", "output")],
            &[
                Edge::new("m1", "i1"), // into entry
                Edge::new("o1", "m1"), // out of exit
                Edge::new("i1", "m1"),
            ],
        );

        let reasons: Vec<DropReason> = graph.dropped_edges().iter().map(|d| d.reason).collect();
        assert_eq!(reasons, vec![DropReason::IntoEntryNode, DropReason::OutOfExitNode]);
        assert!(graph.dependencies_of("i1").is_empty());
        assert_eq!(graph.dependencies_of("m1").len(), 1);
    }

    #[test]
    fn duplicate_edges_collapse_into_one_dependency() {
        let graph = build(
            &[make_node("a", "x"), make_node("b", "x")],
            &[Edge::new("a", "b"), Edge::new("a", "b")],
        );
        assert_eq!(graph.dependencies_of("b").len(), 1);
    }

    #[test]
    fn cycle_is_reported_with_its_members() {
        // A → B → A, C independent, D downstream of the cycle
        let graph = build(
            &[make_node("a", "x"), make_node("b", "x"), make_node("c", "x"), make_node("d", "x")],
            &[Edge::new("a", "b"), Edge::new("b", "a"), Edge::new("b", "d")],
        );

        assert_eq!(
            graph.topological_batches().unwrap_err(),
            EngineError::CycleDetected { nodes: vec!["a".into(), "b".into(), "d".into()] }
        );
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let nodes = [make_node("a", "x"), make_node("b", "x")];
        let edges = [Edge::new("a", "b"), Edge::new("b", "b")];
        let first = build(&nodes, &edges);
        let second = build(&nodes, &edges);
        assert_eq!(first.edges(), second.edges());
        assert_eq!(first.dropped_edges(), second.dropped_edges());
    }
}
