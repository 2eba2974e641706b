//! Per-run execution context and result store.
//!
//! The result map is the single source of truth for scheduling. Each key is
//! written once, by the execution path that owns that node; readers only
//! ever see finished entries. Status changes are mirrored to the notifier
//! for display and never consulted for scheduling.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use nodes::NodeError;

use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::models::{ExecutionStatus, NodeOutcome, NodeTrace};
use crate::EngineError;

pub struct RunContext {
    run_id: Uuid,
    results: DashMap<String, NodeOutcome>,
    statuses: DashMap<String, ExecutionStatus>,
    traces: DashMap<String, NodeTrace>,
    sequence: AtomicU64,
    notifier: Arc<dyn ExecutionNotifier>,
}

impl RunContext {
    /// Fresh context with every node reset to `waiting`.
    pub fn new<'a>(
        run_id: Uuid,
        node_ids: impl IntoIterator<Item = &'a String>,
        notifier: Arc<dyn ExecutionNotifier>,
    ) -> Self {
        let ctx = Self {
            run_id,
            results: DashMap::new(),
            statuses: DashMap::new(),
            traces: DashMap::new(),
            sequence: AtomicU64::new(0),
            notifier,
        };
        for id in node_ids {
            ctx.statuses.insert(id.clone(), ExecutionStatus::Idle);
            ctx.advance_status(id, ExecutionStatus::Waiting);
        }
        ctx
    }

    /// Next value of the run-local monotonic sequence.
    pub fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub fn notify(&self, event: ExecutionEvent) {
        self.notifier.notify(event);
    }

    /// Mark a node as dispatched.
    pub fn mark_processing(&self, node_id: &str) {
        self.advance_status(node_id, ExecutionStatus::Processing);
    }

    pub fn notify_retry(&self, node_id: &str, attempt: u32, delay: Duration, error: &NodeError) {
        self.notify(ExecutionEvent::NodeRetrying {
            run_id: self.run_id,
            node_id: node_id.to_owned(),
            attempt,
            delay,
            error: error.to_string(),
        });
    }

    /// Write a node's final outcome.
    ///
    /// # Errors
    /// [`EngineError::ResultAlreadyRecorded`] if the node already has an entry;
    /// the existing entry is left untouched.
    pub fn record(&self, node_id: &str, outcome: NodeOutcome) -> Result<(), EngineError> {
        let event = match &outcome {
            NodeOutcome::Completed(output) => ExecutionEvent::NodeCompleted {
                run_id: self.run_id,
                node_id: node_id.to_owned(),
                output: output.clone(),
            },
            NodeOutcome::Failed(failure) => ExecutionEvent::NodeFailed {
                run_id: self.run_id,
                node_id: node_id.to_owned(),
                failure: failure.clone(),
            },
        };
        let status = if outcome.is_failed() {
            ExecutionStatus::Error
        } else {
            ExecutionStatus::Completed
        };

        match self.results.entry(node_id.to_owned()) {
            Entry::Occupied(_) => {
                return Err(EngineError::ResultAlreadyRecorded(node_id.to_owned()));
            }
            Entry::Vacant(slot) => {
                slot.insert(outcome);
            }
        }

        self.advance_status(node_id, status);
        self.notify(event);
        Ok(())
    }

    pub fn record_trace(&self, node_id: &str, trace: NodeTrace) {
        self.traces.insert(node_id.to_owned(), trace);
    }

    /// `true` once the node has a finished entry (success or failure).
    pub fn is_resolved(&self, node_id: &str) -> bool {
        self.results.contains_key(node_id)
    }

    pub fn is_failed(&self, node_id: &str) -> bool {
        self.results
            .get(node_id)
            .is_some_and(|outcome| outcome.is_failed())
    }

    pub fn outcome(&self, node_id: &str) -> Option<NodeOutcome> {
        self.results.get(node_id).map(|entry| entry.value().clone())
    }

    pub fn status(&self, node_id: &str) -> Option<ExecutionStatus> {
        self.statuses.get(node_id).map(|entry| *entry.value())
    }

    pub fn resolved_count(&self) -> usize {
        self.results.len()
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|entry| entry.value().is_failed())
    }

    /// Snapshot of the result map, ordered by node ID.
    pub fn results(&self) -> BTreeMap<String, NodeOutcome> {
        self.results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn traces(&self) -> BTreeMap<String, NodeTrace> {
        self.traces
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    fn advance_status(&self, node_id: &str, next: ExecutionStatus) {
        let Some(mut status) = self.statuses.get_mut(node_id) else {
            warn!(node_id, "status change for unknown node ignored");
            return;
        };
        let current = *status;
        if !current.can_advance_to(next) {
            warn!(node_id, from = ?current, to = ?next, "refusing backward status transition");
            return;
        }
        *status = next;
        // Release the shard lock before calling out.
        drop(status);

        debug!(node_id, status = ?next, "node status changed");
        self.notify(ExecutionEvent::NodeStatusChanged {
            run_id: self.run_id,
            node_id: node_id.to_owned(),
            status: next,
        });
    }
}
