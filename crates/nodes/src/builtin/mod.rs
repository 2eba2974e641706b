//! Built-in processors.

pub mod ai_model;
pub mod input;
pub mod output;

pub use ai_model::{AiModelNode, EchoGenerator, GenerationRequest, TextGenerator};
pub use input::InputNode;
pub use output::OutputNode;
