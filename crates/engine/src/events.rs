//! Execution events and notifiers for observability.
//!
//! Events are emitted during a run so the editor can show per-node status
//! live. Notifiers must not block: the engine never waits on a consumer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use nodes::NodeOutput;

use crate::models::{ExecutionStatus, FailureRecord, RunStatus};

/// Events emitted during flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        node_count: usize,
    },

    /// A node's UI-visible status moved forward.
    NodeStatusChanged {
        run_id: Uuid,
        node_id: String,
        status: ExecutionStatus,
    },

    /// A transient failure will be retried after `delay`.
    NodeRetrying {
        run_id: Uuid,
        node_id: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },

    NodeCompleted {
        run_id: Uuid,
        node_id: String,
        output: NodeOutput,
    },

    NodeFailed {
        run_id: Uuid,
        node_id: String,
        failure: FailureRecord,
    },

    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them (broadcast, persist, ignore).
pub trait ExecutionNotifier: Send + Sync {
    fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
    fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never holds up the run; event volume is a
/// handful per node.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { sender }
    }

    /// Notifier plus the receiving half of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl ExecutionNotifier for ChannelNotifier {
    fn notify(&self, event: ExecutionEvent) {
        // Receiver may have been dropped
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_delivers_events() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        let run_id = Uuid::new_v4();
        notifier.notify(ExecutionEvent::RunStarted { run_id, node_count: 2 });

        assert_eq!(rx.try_recv().unwrap(), ExecutionEvent::RunStarted { run_id, node_count: 2 });
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (notifier, rx) = ChannelNotifier::channel();
        drop(rx);
        notifier.notify(ExecutionEvent::RunFinished {
            run_id: Uuid::new_v4(),
            status: RunStatus::Completed,
        });
    }
}
