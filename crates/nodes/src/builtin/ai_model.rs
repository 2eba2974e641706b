//! `ai_model`: sends upstream text to a language model.
//!
//! The model call itself goes through [`TextGenerator`], injected at
//! registry construction, so provider clients live outside this crate.

use std::sync::Arc;

use async_trait::async_trait;

use crate::traits::{ExecutionContext, ResolvedInputs};
use crate::{ExecutableNode, NodeDefinition, NodeError, NodeOutput};

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub instructions: Option<String>,
    pub prompt: String,
    /// Resolved credential value, when the node names one.
    pub credential: Option<String>,
}

/// Provider client used by [`AiModelNode`].
///
/// Implementations report network and provider failures as
/// [`NodeError::Transient`] so the engine retries them.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, NodeError>;
}

/// Offline generator that answers with the prompt itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGenerator;

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, NodeError> {
        Ok(request.prompt.clone())
    }
}

/// Expected data: `{ "model": "...", "instructions"?: "...", "credential"?: "<name>" }`.
#[derive(Clone)]
pub struct AiModelNode {
    generator: Arc<dyn TextGenerator>,
}

impl AiModelNode {
    pub const TYPE: &'static str = "ai_model";

    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn build_request(
        node: &NodeDefinition,
        inputs: &ResolvedInputs,
        ctx: &ExecutionContext,
    ) -> Result<GenerationRequest, NodeError> {
        let model = node
            .data_str("model")
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| NodeError::missing_config(&node.id, "model"))?;

        let credential = match node.data_str("credential") {
            Some(name) => Some(
                ctx.credentials
                    .get(name)
                    .cloned()
                    .ok_or_else(|| NodeError::missing_config(&node.id, format!("credential '{name}'")))?,
            ),
            None => None,
        };

        let prompt = inputs
            .iter()
            .map(|(_, output)| output.display_content())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if prompt.is_empty() {
            return Err(NodeError::missing_input(&node.id, "upstream text"));
        }

        Ok(GenerationRequest {
            model: model.to_owned(),
            instructions: node.data_str("instructions").map(str::to_owned),
            prompt,
            credential,
        })
    }
}

#[async_trait]
impl ExecutableNode for AiModelNode {
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &ResolvedInputs,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let request = Self::build_request(node, inputs, ctx)?;
        tracing::debug!(node_id = %node.id, model = %request.model, "requesting completion");

        let content = self.generator.generate(&request).await?;
        Ok(NodeOutput::Text {
            content,
            model: Some(request.model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_inputs(id: &str, text: &str) -> ResolvedInputs {
        let mut inputs = ResolvedInputs::new();
        inputs.insert(id, NodeOutput::Passthrough { input: json!(text) });
        inputs
    }

    #[tokio::test]
    async fn echoes_upstream_text_with_model_tag() {
        let node = AiModelNode::new(Arc::new(EchoGenerator));
        let def = NodeDefinition::new("m1", "ai_model", json!({ "model": "gpt-4o" }));
        let out = node
            .execute(&def, &text_inputs("i1", "hello"), &ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(
            out,
            NodeOutput::Text { content: "hello".into(), model: Some("gpt-4o".into()) }
        );
    }

    #[tokio::test]
    async fn missing_model_fails_validation() {
        let node = AiModelNode::new(Arc::new(EchoGenerator));
        let def = NodeDefinition::new("m1", "ai_model", json!({}));
        let err = node
            .execute(&def, &text_inputs("i1", "hello"), &ExecutionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::missing_config("m1", "model"));
    }

    #[tokio::test]
    async fn no_upstream_text_fails_validation() {
        let node = AiModelNode::new(Arc::new(EchoGenerator));
        let def = NodeDefinition::new("m1", "ai_model", json!({ "model": "gpt-4o" }));
        let err = node
            .execute(&def, &ResolvedInputs::new(), &ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MissingInput { .. }));
    }

    #[tokio::test]
    async fn named_credential_must_be_present() {
        let node = AiModelNode::new(Arc::new(EchoGenerator));
        let def = NodeDefinition::new(
            "m1",
            "ai_model",
            json!({ "model": "gpt-4o", "credential": "openai" }),
        );
        let err = node
            .execute(&def, &text_inputs("i1", "hi"), &ExecutionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::missing_config("m1", "credential 'openai'"));

        let mut ctx = ExecutionContext::default();
        ctx.credentials.insert("openai".into(), "sk-test".into());
        assert!(node.execute(&def, &text_inputs("i1", "hi"), &ctx).await.is_ok());
    }
}
