//! Batch scheduler state machine.
//!
//! Each node moves `Pending → Ready → Running → Resolved`. A node becomes
//! ready once every dependency has a finished entry in the result map,
//! whether that entry is a success or a failure. When unresolved nodes
//! remain but none can become ready the run has stalled.

use std::collections::HashMap;

use crate::context::RunContext;
use crate::graph::DependencyGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Resolved,
}

/// What the executor should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Dispatch these nodes together.
    Batch(Vec<String>),
    /// Nothing new is ready but nodes from an earlier batch are still in flight.
    Wait,
    /// Every node is resolved.
    Finished,
    /// These nodes can never become ready.
    Stalled(Vec<String>),
}

#[derive(Debug)]
pub struct Scheduler {
    order: Vec<String>,
    states: HashMap<String, NodeState>,
}

impl Scheduler {
    pub fn new(graph: &DependencyGraph) -> Self {
        Self {
            order: graph.node_ids().to_vec(),
            states: graph
                .node_ids()
                .iter()
                .map(|id| (id.clone(), NodeState::Pending))
                .collect(),
        }
    }

    pub fn state(&self, node_id: &str) -> Option<NodeState> {
        self.states.get(node_id).copied()
    }

    /// Compute the next ready set from the result map and mark it `Ready`.
    ///
    /// Nodes come back in declaration order; nothing is promised about
    /// order within a batch.
    pub fn next_step(&mut self, graph: &DependencyGraph, ctx: &RunContext) -> Step {
        let mut ready = Vec::new();
        let mut waiting = Vec::new();
        let mut in_flight = false;

        for id in &self.order {
            match self.states[id] {
                NodeState::Resolved => {}
                NodeState::Ready | NodeState::Running => in_flight = true,
                NodeState::Pending => {
                    if graph
                        .dependencies_of(id)
                        .iter()
                        .all(|dep| ctx.is_resolved(dep))
                    {
                        ready.push(id.clone());
                    } else {
                        waiting.push(id.clone());
                    }
                }
            }
        }

        if !ready.is_empty() {
            for id in &ready {
                self.transition(id, NodeState::Ready);
            }
            return Step::Batch(ready);
        }

        if in_flight {
            Step::Wait
        } else if waiting.is_empty() {
            Step::Finished
        } else {
            Step::Stalled(waiting)
        }
    }

    pub fn mark_running(&mut self, node_id: &str) {
        self.transition(node_id, NodeState::Running);
    }

    pub fn mark_resolved(&mut self, node_id: &str) {
        self.transition(node_id, NodeState::Resolved);
    }

    /// Unresolved node IDs in declaration order.
    pub fn unresolved(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.states[*id] != NodeState::Resolved)
            .cloned()
            .collect()
    }

    fn transition(&mut self, node_id: &str, next: NodeState) {
        if let Some(state) = self.states.get_mut(node_id) {
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopNotifier;
    use crate::models::{Edge, NodeOutcome};
    use nodes::{NodeDefinition, NodeOutput, NodeRole};
    use serde_json::Value;
    use std::sync::Arc;
    use uuid::Uuid;

    fn setup(ids: &[&str], edges: &[Edge]) -> (DependencyGraph, RunContext, Scheduler) {
        let nodes: Vec<NodeDefinition> = ids
            .iter()
            .map(|id| NodeDefinition::new(*id, "mock", Value::Null))
            .collect();
        let graph =
            DependencyGraph::build_with_roles(&nodes, edges, |_| NodeRole::Intermediate).unwrap();
        let ctx = RunContext::new(Uuid::new_v4(), graph.node_ids(), Arc::new(NoopNotifier));
        let scheduler = Scheduler::new(&graph);
        (graph, ctx, scheduler)
    }

    fn resolve(ctx: &RunContext, scheduler: &mut Scheduler, id: &str) {
        ctx.record(id, NodeOutcome::Completed(NodeOutput::Empty)).unwrap();
        scheduler.mark_resolved(id);
    }

    #[test]
    fn roots_form_the_first_batch() {
        let (graph, ctx, mut scheduler) =
            setup(&["a", "b", "c"], &[Edge::new("a", "c"), Edge::new("b", "c")]);

        assert_eq!(scheduler.next_step(&graph, &ctx), Step::Batch(vec!["a".into(), "b".into()]));
        assert_eq!(scheduler.state("a"), Some(NodeState::Ready));
        assert_eq!(scheduler.state("c"), Some(NodeState::Pending));
    }

    #[test]
    fn dependents_wait_for_every_dependency() {
        let (graph, ctx, mut scheduler) =
            setup(&["a", "b", "c"], &[Edge::new("a", "c"), Edge::new("b", "c")]);
        scheduler.next_step(&graph, &ctx);

        resolve(&ctx, &mut scheduler, "a");
        // b has not finished: nothing new is ready, but b is still in flight
        assert_eq!(scheduler.next_step(&graph, &ctx), Step::Wait);

        resolve(&ctx, &mut scheduler, "b");
        assert_eq!(scheduler.next_step(&graph, &ctx), Step::Batch(vec!["c".into()]));
        resolve(&ctx, &mut scheduler, "c");
        assert_eq!(scheduler.next_step(&graph, &ctx), Step::Finished);
    }

    #[test]
    fn failed_dependency_still_unblocks() {
        let (graph, ctx, mut scheduler) = setup(&["a", "b"], &[Edge::new("a", "b")]);
        scheduler.next_step(&graph, &ctx);

        let failed = nodes::NodeDefinition::new("a", "mock", Value::Null);
        ctx.record(
            "a",
            NodeOutcome::Failed(crate::models::FailureRecord::attempted(
                &failed,
                &nodes::NodeError::Transient("down".into()),
                4,
            )),
        )
        .unwrap();
        scheduler.mark_resolved("a");

        assert_eq!(scheduler.next_step(&graph, &ctx), Step::Batch(vec!["b".into()]));
    }

    #[test]
    fn cycle_stalls_after_independent_nodes_finish() {
        let (graph, ctx, mut scheduler) = setup(
            &["a", "b", "c"],
            &[Edge::new("a", "b"), Edge::new("b", "a")],
        );

        assert_eq!(scheduler.next_step(&graph, &ctx), Step::Batch(vec!["c".into()]));
        resolve(&ctx, &mut scheduler, "c");
        assert_eq!(
            scheduler.next_step(&graph, &ctx),
            Step::Stalled(vec!["a".into(), "b".into()])
        );
        assert_eq!(scheduler.unresolved(), vec!["a", "b"]);
    }
}
