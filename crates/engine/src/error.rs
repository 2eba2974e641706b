//! Engine-level error types.

use thiserror::Error;

/// Errors that reject a run (or a static validation) as a whole.
///
/// Node failures are not errors at this level: they are recorded in the
/// run's result map and the run carries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A node was declared with an empty ID.
    #[error("node at position {0} has an empty ID")]
    EmptyNodeId(usize),

    /// Static ordering found nodes that can never become ready.
    #[error("flow graph contains a cycle through: {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    /// A second write to a node's result slot within one run.
    #[error("result for node '{0}' was already recorded in this run")]
    ResultAlreadyRecorded(String),
}
