//! Processor registry: node type tag → processor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::builtin::{AiModelNode, InputNode, OutputNode, TextGenerator};
use crate::{ExecutableNode, NodeRole};

/// Outcome of looking up a node type.
pub enum Dispatch<'a> {
    Registered(&'a Arc<dyn ExecutableNode>),
    /// No processor for this type; the engine treats the node as a no-op.
    Unknown,
}

/// Maps `node_type` strings to shared `ExecutableNode` implementations.
///
/// Constructed explicitly and handed to the executor; there is no process-wide
/// registry.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    processors: HashMap<String, Arc<dyn ExecutableNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `input`, `ai_model` and `output` processors.
    pub fn with_builtins(generator: Arc<dyn TextGenerator>) -> Self {
        let mut registry = Self::new();
        registry.register(InputNode::TYPE, Arc::new(InputNode));
        registry.register(AiModelNode::TYPE, Arc::new(AiModelNode::new(generator)));
        registry.register(OutputNode::TYPE, Arc::new(OutputNode));
        registry
    }

    /// Register (or replace) the processor for `node_type`.
    pub fn register(&mut self, node_type: impl Into<String>, processor: Arc<dyn ExecutableNode>) {
        let node_type = node_type.into();
        if self.processors.insert(node_type.clone(), processor).is_some() {
            tracing::debug!(node_type = %node_type, "replaced registered processor");
        }
    }

    pub fn dispatch(&self, node_type: &str) -> Dispatch<'_> {
        match self.processors.get(node_type) {
            Some(processor) => Dispatch::Registered(processor),
            None => Dispatch::Unknown,
        }
    }

    /// Role declared by the processor; unknown types are intermediate.
    pub fn role_of(&self, node_type: &str) -> NodeRole {
        self.processors
            .get(node_type)
            .map(|p| p.role())
            .unwrap_or_default()
    }

    /// Whether a node of this type may run with failed upstream dependencies.
    pub fn tolerates_missing_inputs(&self, node_type: &str) -> bool {
        self.processors
            .get(node_type)
            .is_some_and(|p| p.tolerates_missing_inputs())
    }

    /// Registered type tags, sorted.
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}
