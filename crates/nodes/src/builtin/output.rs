//! `output`: terminal node presenting upstream results.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::traits::{ExecutionContext, ResolvedInputs};
use crate::{ExecutableNode, NodeDefinition, NodeError, NodeOutput, NodeRole};

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputNode;

impl OutputNode {
    pub const TYPE: &'static str = "output";
}

#[async_trait]
impl ExecutableNode for OutputNode {
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &ResolvedInputs,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        if inputs.is_empty() {
            return Err(NodeError::missing_input(&node.id, "upstream result"));
        }

        let display_content = inputs
            .iter()
            .map(|(_, output)| output.display_content())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        // One upstream result is shown as-is; several are keyed by source node.
        let full_data = if inputs.len() == 1 {
            inputs
                .iter()
                .next()
                .map(|(_, output)| output.full_data())
                .unwrap_or(Value::Null)
        } else {
            Value::Object(
                inputs
                    .iter()
                    .map(|(id, output)| (id.clone(), output.full_data()))
                    .collect::<Map<_, _>>(),
            )
        };

        Ok(NodeOutput::Display {
            display_content,
            full_data,
        })
    }

    fn role(&self) -> NodeRole {
        NodeRole::Exit
    }
}
