//! Typed node results.
//!
//! Every processor returns a [`NodeOutput`]. The variant says which category
//! of node produced it, so consumers such as the `output` node match on the
//! discriminant instead of probing for fields.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Object keys checked, in order, when pulling readable text out of structured data.
const TEXT_FIELDS: [&str; 4] = ["text", "content", "message", "result"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeOutput {
    /// Model-generated text.
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// Machine-readable data from an API or action node.
    Structured { data: Value },
    /// A runtime input forwarded unchanged.
    Passthrough { input: Value },
    /// Result of a terminal output node.
    Display {
        display_content: String,
        full_data: Value,
    },
    /// Produced by no-op processing (unknown node types).
    Empty,
}

impl NodeOutput {
    pub fn text(content: impl Into<String>) -> Self {
        NodeOutput::Text {
            content: content.into(),
            model: None,
        }
    }

    /// Human-readable rendering of this result.
    pub fn display_content(&self) -> String {
        match self {
            NodeOutput::Text { content, .. } => content.clone(),
            NodeOutput::Passthrough { input } => render_value(input),
            NodeOutput::Structured { data } => data
                .as_object()
                .and_then(|obj| {
                    TEXT_FIELDS
                        .iter()
                        .find_map(|key| obj.get(*key).and_then(Value::as_str))
                })
                .map(str::to_owned)
                .unwrap_or_else(|| render_value(data)),
            NodeOutput::Display {
                display_content, ..
            } => display_content.clone(),
            NodeOutput::Empty => String::new(),
        }
    }

    /// Machine-readable payload of this result.
    pub fn full_data(&self) -> Value {
        match self {
            NodeOutput::Text { content, model } => match model {
                Some(model) => json!({ "content": content, "model": model }),
                None => json!({ "content": content }),
            },
            NodeOutput::Structured { data } => data.clone(),
            NodeOutput::Passthrough { input } => input.clone(),
            NodeOutput::Display { full_data, .. } => full_data.clone(),
            NodeOutput::Empty => Value::Null,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NodeOutput::Empty)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_string_renders_verbatim() {
        let out = NodeOutput::Passthrough { input: json!("hello") };
        assert_eq!(out.display_content(), "hello");
    }

    #[test]
    fn structured_prefers_text_like_fields() {
        let out = NodeOutput::Structured {
            data: json!({ "status": 200, "message": "call queued" }),
        };
        assert_eq!(out.display_content(), "call queued");
    }

    #[test]
    fn structured_without_text_field_renders_json() {
        let out = NodeOutput::Structured { data: json!({ "id": 7 }) };
        assert!(out.display_content().contains("\"id\": 7"));
    }

    #[test]
    fn empty_has_no_display_content() {
        assert_eq!(NodeOutput::Empty.display_content(), "");
        assert_eq!(NodeOutput::Empty.full_data(), Value::Null);
    }

    #[test]
    fn serialises_with_kind_discriminant() {
        let value = serde_json::to_value(NodeOutput::text("hi")).unwrap();
        assert_eq!(value, json!({ "kind": "text", "content": "hi" }));
    }
}
