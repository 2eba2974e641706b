//! The `ExecutableNode` trait: the contract every processor must fulfil.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use serde_json::Value;

use crate::{NodeDefinition, NodeError, NodeOutput, NodeRole};

/// Shared context passed to every processor during execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// ID of the current run.
    pub run_id: uuid::Uuid,
    /// Credential references available to processors, by name.
    pub credentials: HashMap<String, String>,
    /// Value supplied by the caller for this node, bypassing its upstream edges.
    pub runtime_input: Option<Value>,
    /// Metadata of the upstream nodes' results (type, attempts), by node ID.
    pub previous_node_metadata: HashMap<String, Value>,
}

/// Finished results of a node's direct dependencies.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    values: BTreeMap<String, NodeOutput>,
    failed: BTreeSet<String>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node_id: impl Into<String>, output: NodeOutput) {
        self.values.insert(node_id.into(), output);
    }

    /// Record an upstream dependency that failed and left a hole.
    pub fn mark_failed(&mut self, node_id: impl Into<String>) {
        self.failed.insert(node_id.into());
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeOutput> {
        self.values.get(node_id)
    }

    /// Iterate results in node-ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeOutput)> {
        self.values.iter()
    }

    /// IDs of upstream nodes whose results are missing because they failed.
    pub fn failed(&self) -> &BTreeSet<String> {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The core processor trait.
///
/// A processor validates what it was given, does its work (network calls
/// included) and returns a typed result.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute `node` against the results of its dependencies.
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &ResolvedInputs,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError>;

    /// Structural role of nodes handled by this processor.
    fn role(&self) -> NodeRole {
        NodeRole::Intermediate
    }

    /// Whether the processor should still be attempted when an upstream
    /// dependency failed. Most processors need every input.
    fn tolerates_missing_inputs(&self) -> bool {
        false
    }
}
