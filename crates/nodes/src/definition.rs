//! The node descriptor handed to processors.
//!
//! Defined here (in the nodes crate) so both the engine and individual node
//! implementations can import it without a circular dependency.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single unit of configured work in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within the flow (referenced by edges).
    pub id: String,
    /// Selects the processor in the [`NodeRegistry`](crate::NodeRegistry).
    #[serde(rename = "type")]
    pub node_type: String,
    /// Free-form configuration; opaque to the engine.
    #[serde(default)]
    pub data: Value,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data,
        }
    }

    /// String field of `data`, if present.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// Structural contract of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Takes no incoming edges (user inputs).
    Entry,
    /// Takes no outgoing edges (terminal outputs).
    Exit,
    #[default]
    Intermediate,
}
