// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! Node health tracking with atomic compare-and-transition semantics.

use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};

use rackwise_core::{NodeHealth, NodeId};

/// Errors from the health state machine.
#[derive(Debug, Error)]
pub enum HealthError {
    /// Node is not tracked.
    #[error("node {0} is not tracked")]
    UnknownNode(NodeId),

    /// The requested transition does not match the node's current state.
    #[error("invalid transition for {node}: expected {expected}, found {actual}")]
    InvalidTransition {
        /// The node whose transition was rejected.
        node: NodeId,
        /// The state the caller expected.
        expected: NodeHealth,
        /// The node's actual current state.
        actual: NodeHealth,
    },

    /// The requested state change is not part of the lifecycle.
    #[error("unsupported transition {from} -> {to}")]
    UnsupportedTransition {
        /// The state the caller expected.
        from: NodeHealth,
        /// The requested target state.
        to: NodeHealth,
    },
}

/// Tracks per-node health and enforces the decommission lifecycle.
///
/// Permitted transitions:
/// - `Active -> Decommissioning` (decommission requested)
/// - `Decommissioning -> Decommissioned` (drain complete, granted by the
///   decommission coordinator after verification)
/// - `Decommissioning -> Active` (abort)
/// - any state `-> Dead`
///
/// Any other pair is rejected as unsupported.
///
/// Transitions are compare-and-set: the caller states the expected current
/// state and the swap happens atomically under the entry lock.
#[derive(Debug, Default)]
pub struct NodeHealthTracker {
    states: DashMap<NodeId, NodeHealth>,
}

impl NodeHealthTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a node as `Active`.
    ///
    /// Re-registering an already-tracked node is a no-op; liveness feeds
    /// may deliver duplicate registrations.
    pub fn register(&self, node: NodeId) {
        self.states.entry(node).or_insert(NodeHealth::Active);
    }

    /// Stops tracking a node. Used after the node is removed from the
    /// topology.
    pub fn forget(&self, node: &NodeId) {
        self.states.remove(node);
    }

    /// Returns the node's current health, if tracked.
    #[must_use]
    pub fn health_of(&self, node: &NodeId) -> Option<NodeHealth> {
        self.states.get(node).map(|state| *state)
    }

    /// Returns true if the node is tracked and `Active`.
    #[must_use]
    pub fn is_active(&self, node: &NodeId) -> bool {
        matches!(self.health_of(node), Some(NodeHealth::Active))
    }

    /// Atomically transitions a node from `expected` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HealthError::UnsupportedTransition`] if the pair is not
    /// one of the permitted lifecycle transitions,
    /// [`HealthError::InvalidTransition`] if the node's current state is
    /// not `expected`, or [`HealthError::UnknownNode`] if the node is not
    /// tracked.
    pub fn transition(
        &self,
        node: &NodeId,
        expected: NodeHealth,
        target: NodeHealth,
    ) -> Result<(), HealthError> {
        if !Self::permitted(expected, target) {
            return Err(HealthError::UnsupportedTransition { from: expected, to: target });
        }
        let mut entry = self
            .states
            .get_mut(node)
            .ok_or_else(|| HealthError::UnknownNode(node.clone()))?;
        if *entry != expected {
            warn!(
                node = %node,
                expected = %expected,
                actual = %*entry,
                "Rejected health transition"
            );
            return Err(HealthError::InvalidTransition {
                node: node.clone(),
                expected,
                actual: *entry,
            });
        }
        *entry = target;
        info!(node = %node, from = %expected, to = %target, "Health transition");
        Ok(())
    }

    /// Marks a node dead regardless of its current state.
    ///
    /// Untracked nodes are ignored.
    pub fn mark_dead(&self, node: &NodeId) {
        if let Some(mut entry) = self.states.get_mut(node) {
            let from = *entry;
            *entry = NodeHealth::Dead;
            warn!(node = %node, from = %from, "Node marked dead");
        }
    }

    /// Returns the number of tracked nodes.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }

    const fn permitted(from: NodeHealth, to: NodeHealth) -> bool {
        matches!(
            (from, to),
            (NodeHealth::Active, NodeHealth::Decommissioning)
                | (NodeHealth::Decommissioning, NodeHealth::Decommissioned)
                | (NodeHealth::Decommissioning, NodeHealth::Active)
                | (_, NodeHealth::Dead)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeId {
        NodeId::from(name)
    }

    #[test]
    fn test_register_is_idempotent() {
        let tracker = NodeHealthTracker::new();
        tracker.register(node("n1"));
        tracker
            .transition(&node("n1"), NodeHealth::Active, NodeHealth::Decommissioning)
            .unwrap();

        // Duplicate registration must not reset the state.
        tracker.register(node("n1"));
        assert_eq!(tracker.health_of(&node("n1")), Some(NodeHealth::Decommissioning));
    }

    #[test]
    fn test_decommission_lifecycle() {
        let tracker = NodeHealthTracker::new();
        tracker.register(node("n1"));
        assert!(tracker.is_active(&node("n1")));

        tracker
            .transition(&node("n1"), NodeHealth::Active, NodeHealth::Decommissioning)
            .unwrap();
        tracker
            .transition(&node("n1"), NodeHealth::Decommissioning, NodeHealth::Decommissioned)
            .unwrap();
        assert_eq!(tracker.health_of(&node("n1")), Some(NodeHealth::Decommissioned));
    }

    #[test]
    fn test_abort_returns_to_active() {
        let tracker = NodeHealthTracker::new();
        tracker.register(node("n1"));
        tracker
            .transition(&node("n1"), NodeHealth::Active, NodeHealth::Decommissioning)
            .unwrap();
        tracker
            .transition(&node("n1"), NodeHealth::Decommissioning, NodeHealth::Active)
            .unwrap();
        assert!(tracker.is_active(&node("n1")));
    }

    #[test]
    fn test_invalid_transition() {
        let tracker = NodeHealthTracker::new();
        tracker.register(node("n1"));

        let result =
            tracker.transition(&node("n1"), NodeHealth::Decommissioning, NodeHealth::Decommissioned);
        match result {
            Err(HealthError::InvalidTransition { actual, .. }) => {
                assert_eq!(actual, NodeHealth::Active);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_undefined_transitions_rejected() {
        let tracker = NodeHealthTracker::new();
        tracker.register(node("n1"));

        // Skipping the draining phase is not part of the lifecycle.
        let result =
            tracker.transition(&node("n1"), NodeHealth::Active, NodeHealth::Decommissioned);
        assert!(matches!(result, Err(HealthError::UnsupportedTransition { .. })));
        assert!(tracker.is_active(&node("n1")));

        // Dead nodes stay dead.
        tracker.mark_dead(&node("n1"));
        let result = tracker.transition(&node("n1"), NodeHealth::Dead, NodeHealth::Active);
        assert!(matches!(result, Err(HealthError::UnsupportedTransition { .. })));
        assert_eq!(tracker.health_of(&node("n1")), Some(NodeHealth::Dead));
    }

    #[test]
    fn test_unknown_node() {
        let tracker = NodeHealthTracker::new();
        let result = tracker.transition(&node("ghost"), NodeHealth::Active, NodeHealth::Dead);
        assert!(matches!(result, Err(HealthError::UnknownNode(_))));
        assert!(tracker.health_of(&node("ghost")).is_none());
    }

    #[test]
    fn test_mark_dead_from_any_state() {
        let tracker = NodeHealthTracker::new();
        tracker.register(node("n1"));
        tracker.register(node("n2"));
        tracker
            .transition(&node("n2"), NodeHealth::Active, NodeHealth::Decommissioning)
            .unwrap();

        tracker.mark_dead(&node("n1"));
        tracker.mark_dead(&node("n2"));

        assert_eq!(tracker.health_of(&node("n1")), Some(NodeHealth::Dead));
        assert_eq!(tracker.health_of(&node("n2")), Some(NodeHealth::Dead));
    }

    #[test]
    fn test_forget() {
        let tracker = NodeHealthTracker::new();
        tracker.register(node("n1"));
        assert_eq!(tracker.tracked_count(), 1);
        tracker.forget(&node("n1"));
        assert_eq!(tracker.tracked_count(), 0);
    }
}
