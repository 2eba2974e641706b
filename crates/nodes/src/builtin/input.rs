//! `input`: entry node carrying a user-supplied value into the flow.

use async_trait::async_trait;

use crate::traits::{ExecutionContext, ResolvedInputs};
use crate::{ExecutableNode, NodeDefinition, NodeError, NodeOutput, NodeRole};

/// Forwards the run's runtime input for this node, or the `data.value`
/// fallback configured in the editor.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputNode;

impl InputNode {
    pub const TYPE: &'static str = "input";
}

#[async_trait]
impl ExecutableNode for InputNode {
    async fn execute(
        &self,
        node: &NodeDefinition,
        _inputs: &ResolvedInputs,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let value = ctx
            .runtime_input
            .clone()
            .or_else(|| node.data.get("value").filter(|v| !v.is_null()).cloned())
            .ok_or_else(|| NodeError::missing_input(&node.id, "runtime input"))?;

        Ok(NodeOutput::Passthrough { input: value })
    }

    fn role(&self) -> NodeRole {
        NodeRole::Entry
    }
}
