//! `nodes` crate: node descriptors, the `ExecutableNode` trait, the processor
//! registry and built-in processors.
//!
//! Every processor must implement [`ExecutableNode`]. The engine crate
//! dispatches execution through [`NodeRegistry`].

pub mod builtin;
pub mod definition;
pub mod error;
pub mod mock;
pub mod output;
pub mod registry;
pub mod traits;

pub use definition::{NodeDefinition, NodeRole};
pub use error::{ErrorKind, NodeError};
pub use output::NodeOutput;
pub use registry::{Dispatch, NodeRegistry};
pub use traits::{ExecutableNode, ExecutionContext, ResolvedInputs};
