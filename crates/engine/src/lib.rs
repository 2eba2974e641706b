//! `engine` crate: flow models, dependency graph, batch scheduler, retry
//! layer and the flow executor.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod models;
pub mod retry;
pub mod scheduler;

pub use config::{ExecutorConfig, RetryPolicy};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::FlowExecutor;
pub use graph::{DependencyGraph, DropReason, DroppedEdge};
pub use models::{
    Edge, ExecutionStatus, FailureKind, FailureRecord, Flow, NodeOutcome, NodeTrace, RunOutcome,
    RunStatus,
};
pub use nodes::NodeDefinition;
pub use tokio_util::sync::CancellationToken;
