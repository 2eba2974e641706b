//! `MockNode`: a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real processor is either
//! unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{ExecutionContext, ResolvedInputs};
use crate::{ExecutableNode, NodeDefinition, NodeError, NodeOutput, NodeRole};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Succeed with a `Structured` result holding this value.
    ReturnValue(Value),
    /// Fail every attempt with a `Transient` error.
    FailTransient(String),
    /// Fail every attempt with a `Validation` error.
    FailValidation(String),
    /// Fail transiently for the first `failures` calls, then succeed.
    FlakyThenReturn { failures: usize, value: Value },
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<ResolvedInputs>>>,
    delay: Option<Duration>,
    role: NodeRole,
    tolerates_missing_inputs: bool,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            role: NodeRole::Intermediate,
            tolerates_missing_inputs: false,
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Transient` error.
    pub fn failing_transient(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailTransient(msg.into()))
    }

    /// Create a mock that always fails with a `Validation` error.
    pub fn failing_validation(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailValidation(msg.into()))
    }

    /// Create a mock that fails transiently `failures` times, then succeeds.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::FlakyThenReturn { failures, value })
    }

    /// Sleep for `delay` (tokio time) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn tolerating_missing_inputs(mut self) -> Self {
        self.tolerates_missing_inputs = true;
        self
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &ResolvedInputs,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(inputs.clone());
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let succeed = |value: &Value| -> Result<NodeOutput, NodeError> {
            // Tag the output with the node so tests can trace data flow.
            let mut data = serde_json::json!({ "node": node.id, "mock": self.name });
            if let (Some(out), Some(extra)) = (data.as_object_mut(), value.as_object()) {
                for (k, v) in extra {
                    out.insert(k.clone(), v.clone());
                }
            }
            Ok(NodeOutput::Structured { data })
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => succeed(v),
            MockBehaviour::FailTransient(msg) => Err(NodeError::Transient(msg.clone())),
            MockBehaviour::FailValidation(msg) => Err(NodeError::Validation(msg.clone())),
            MockBehaviour::FlakyThenReturn { failures, value } => {
                if call_index <= *failures {
                    Err(NodeError::Transient(format!(
                        "{} flaked on call {call_index}",
                        self.name
                    )))
                } else {
                    succeed(value)
                }
            }
        }
    }

    fn role(&self) -> NodeRole {
        self.role
    }

    fn tolerates_missing_inputs(&self) -> bool {
        self.tolerates_missing_inputs
    }
}
