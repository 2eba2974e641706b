//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Transient`: the attempt is retried with exponential back-off.
/// - everything else is a validation failure and is never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Network or service failure; another attempt may succeed.
    #[error("transient node error: {0}")]
    Transient(String),

    /// Bad or inconsistent configuration/input; retrying cannot help.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required upstream input is absent.
    #[error("node '{node_id}' is missing required input: {input}")]
    MissingInput { node_id: String, input: String },

    /// A required field of the node's `data` bag is absent or has the wrong type.
    #[error("node '{node_id}' is missing required config field '{field}'")]
    MissingConfig { node_id: String, field: String },
}

/// Coarse classification used by the retry layer and failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Validation,
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Transient(_) => ErrorKind::Transient,
            NodeError::Validation(_)
            | NodeError::MissingInput { .. }
            | NodeError::MissingConfig { .. } => ErrorKind::Validation,
        }
    }

    /// `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn missing_input(node_id: impl Into<String>, input: impl Into<String>) -> Self {
        NodeError::MissingInput {
            node_id: node_id.into(),
            input: input.into(),
        }
    }

    pub fn missing_config(node_id: impl Into<String>, field: impl Into<String>) -> Self {
        NodeError::MissingConfig {
            node_id: node_id.into(),
            field: field.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(NodeError::Transient("timeout".into()).is_retryable());
        assert!(!NodeError::Validation("bad".into()).is_retryable());
        assert!(!NodeError::missing_input("m1", "prompt").is_retryable());
        assert!(!NodeError::missing_config("m1", "model").is_retryable());
    }

    #[test]
    fn messages_name_the_missing_field() {
        let err = NodeError::missing_config("m1", "model");
        assert_eq!(err.to_string(), "node 'm1' is missing required config field 'model'");
    }
}
