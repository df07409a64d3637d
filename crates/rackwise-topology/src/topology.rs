// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! The cluster topology: node-to-rack membership and rack queries.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use rackwise_core::{NodeHealth, NodeId, NodeInfo, RackId};

use crate::health::NodeHealthTracker;

/// Errors that can occur when querying or mutating the topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Node is already registered.
    #[error("node {0} is already registered")]
    DuplicateNode(NodeId),

    /// Node not found.
    #[error("node {0} not found")]
    UnknownNode(NodeId),

    /// Rack not found.
    #[error("rack {0} not found")]
    UnknownRack(RackId),
}

#[derive(Debug, Default)]
struct TopologyInner {
    nodes: HashMap<NodeId, NodeEntry>,
    racks: HashMap<RackId, HashSet<NodeId>>,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    rack: RackId,
    capacity: f64,
}

/// The authoritative, mutable view of nodes grouped into racks.
///
/// A node belongs to exactly one rack. All reads see the most recently
/// completed mutation; a single reader/writer lock guards the whole map.
#[derive(Debug, Default)]
pub struct ClusterTopology {
    inner: RwLock<TopologyInner>,
}

impl ClusterTopology {
    /// Creates an empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node in the given rack.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::DuplicateNode`] if the node already exists.
    pub fn register_node(
        &self,
        node: NodeId,
        rack: RackId,
        capacity: f64,
    ) -> Result<(), TopologyError> {
        let mut inner = self.inner.write();
        if inner.nodes.contains_key(&node) {
            return Err(TopologyError::DuplicateNode(node));
        }
        inner
            .nodes
            .insert(node.clone(), NodeEntry { rack: rack.clone(), capacity });
        inner.racks.entry(rack.clone()).or_default().insert(node.clone());
        info!(node = %node, rack = %rack, capacity, "Registered node");
        Ok(())
    }

    /// Removes a node from the topology.
    ///
    /// The caller is responsible for ensuring the node is decommissioned
    /// and no block references it; the topology itself only maintains
    /// membership.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownNode`] if the node does not exist.
    pub fn remove_node(&self, node: &NodeId) -> Result<(), TopologyError> {
        let mut inner = self.inner.write();
        let entry = inner
            .nodes
            .remove(node)
            .ok_or_else(|| TopologyError::UnknownNode(node.clone()))?;
        if let Some(members) = inner.racks.get_mut(&entry.rack) {
            members.remove(node);
            if members.is_empty() {
                inner.racks.remove(&entry.rack);
            }
        }
        info!(node = %node, rack = %entry.rack, "Removed node");
        Ok(())
    }

    /// Moves a node to a different rack.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownNode`] if the node does not exist.
    pub fn reassign_rack(&self, node: &NodeId, rack: RackId) -> Result<(), TopologyError> {
        let mut inner = self.inner.write();
        let old_rack = match inner.nodes.get_mut(node) {
            Some(entry) => std::mem::replace(&mut entry.rack, rack.clone()),
            None => return Err(TopologyError::UnknownNode(node.clone())),
        };
        if let Some(members) = inner.racks.get_mut(&old_rack) {
            members.remove(node);
            if members.is_empty() {
                inner.racks.remove(&old_rack);
            }
        }
        inner.racks.entry(rack.clone()).or_default().insert(node.clone());
        debug!(node = %node, from = %old_rack, to = %rack, "Reassigned node rack");
        Ok(())
    }

    /// Updates a node's remaining capacity.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownNode`] if the node does not exist.
    pub fn set_capacity(&self, node: &NodeId, capacity: f64) -> Result<(), TopologyError> {
        let mut inner = self.inner.write();
        match inner.nodes.get_mut(node) {
            Some(entry) => {
                entry.capacity = capacity;
                Ok(())
            }
            None => Err(TopologyError::UnknownNode(node.clone())),
        }
    }

    /// Returns the rack of the given node.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownNode`] if the node does not exist.
    pub fn rack_of(&self, node: &NodeId) -> Result<RackId, TopologyError> {
        let inner = self.inner.read();
        inner
            .nodes
            .get(node)
            .map(|entry| entry.rack.clone())
            .ok_or_else(|| TopologyError::UnknownNode(node.clone()))
    }

    /// Returns a node's remaining capacity.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownNode`] if the node does not exist.
    pub fn capacity_of(&self, node: &NodeId) -> Result<f64, TopologyError> {
        let inner = self.inner.read();
        inner
            .nodes
            .get(node)
            .map(|entry| entry.capacity)
            .ok_or_else(|| TopologyError::UnknownNode(node.clone()))
    }

    /// Returns the nodes in the given rack.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownRack`] if the rack has no members.
    pub fn nodes_in_rack(&self, rack: &RackId) -> Result<HashSet<NodeId>, TopologyError> {
        let inner = self.inner.read();
        inner
            .racks
            .get(rack)
            .cloned()
            .ok_or_else(|| TopologyError::UnknownRack(rack.clone()))
    }

    /// Returns all racks with at least one member.
    #[must_use]
    pub fn racks(&self) -> Vec<RackId> {
        let inner = self.inner.read();
        inner.racks.keys().cloned().collect()
    }

    /// Returns the number of racks with at least one member.
    #[must_use]
    pub fn rack_count(&self) -> usize {
        self.inner.read().racks.len()
    }

    /// Returns the total number of registered nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Returns the number of racks with at least one node that is neither
    /// decommissioned nor dead.
    #[must_use]
    pub fn active_rack_count(&self, health: &NodeHealthTracker) -> usize {
        let inner = self.inner.read();
        inner
            .racks
            .values()
            .filter(|members| {
                members.iter().any(|node| {
                    !matches!(
                        health.health_of(node),
                        Some(NodeHealth::Decommissioned) | Some(NodeHealth::Dead)
                    )
                })
            })
            .count()
    }

    /// Returns the number of racks with at least one `Active` node.
    ///
    /// This is the denominator for rack-diversity targets: a rack whose
    /// every node is draining can no longer receive placements, so it must
    /// not inflate the requirement.
    #[must_use]
    pub fn placement_rack_count(&self, health: &NodeHealthTracker) -> usize {
        let inner = self.inner.read();
        inner
            .racks
            .values()
            .filter(|members| members.iter().any(|node| health.is_active(node)))
            .count()
    }

    /// Returns an immutable snapshot of the topology for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> TopologySnapshot {
        let inner = self.inner.read();
        let mut nodes: Vec<NodeInfo> = inner
            .nodes
            .iter()
            .map(|(id, entry)| NodeInfo {
                id: id.clone(),
                rack: entry.rack.clone(),
                capacity: entry.capacity,
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        TopologySnapshot { rack_count: inner.racks.len(), nodes }
    }
}

/// An immutable point-in-time view of the topology.
///
/// Returned by [`ClusterTopology::snapshot`]; never exposes internal
/// handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySnapshot {
    /// Number of non-empty racks.
    pub rack_count: usize,
    /// All registered nodes, sorted by id.
    pub nodes: Vec<NodeInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rack(i: usize) -> RackId {
        RackId::new(format!("/rack{i}"))
    }

    fn node(i: usize) -> NodeId {
        NodeId::new(format!("host{i:02}"))
    }

    fn create_test_topology() -> ClusterTopology {
        let topology = ClusterTopology::new();
        // 3 racks, 2 nodes each
        for i in 0..6 {
            topology.register_node(node(i), rack(i / 2), 1.0).unwrap();
        }
        topology
    }

    #[test]
    fn test_register_and_query() {
        let topology = create_test_topology();

        assert_eq!(topology.node_count(), 6);
        assert_eq!(topology.rack_count(), 3);
        assert_eq!(topology.rack_of(&node(3)).unwrap(), rack(1));

        let members = topology.nodes_in_rack(&rack(0)).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&node(0)));
        assert!(members.contains(&node(1)));
    }

    #[test]
    fn test_duplicate_node() {
        let topology = create_test_topology();
        let result = topology.register_node(node(0), rack(2), 1.0);
        assert!(matches!(result, Err(TopologyError::DuplicateNode(_))));
        // Original membership unchanged.
        assert_eq!(topology.rack_of(&node(0)).unwrap(), rack(0));
    }

    #[test]
    fn test_remove_node() {
        let topology = create_test_topology();
        topology.remove_node(&node(0)).unwrap();
        topology.remove_node(&node(1)).unwrap();

        // Rack 0 is now empty and no longer counted.
        assert_eq!(topology.rack_count(), 2);
        assert!(topology.nodes_in_rack(&rack(0)).is_err());
        assert!(matches!(topology.remove_node(&node(0)), Err(TopologyError::UnknownNode(_))));
    }

    #[test]
    fn test_reassign_rack() {
        let topology = create_test_topology();
        topology.reassign_rack(&node(0), rack(2)).unwrap();

        assert_eq!(topology.rack_of(&node(0)).unwrap(), rack(2));
        assert_eq!(topology.nodes_in_rack(&rack(2)).unwrap().len(), 3);
        assert_eq!(topology.nodes_in_rack(&rack(0)).unwrap().len(), 1);
    }

    #[test]
    fn test_set_capacity() {
        let topology = create_test_topology();
        topology.set_capacity(&node(0), 42.0).unwrap();
        assert!((topology.capacity_of(&node(0)).unwrap() - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot() {
        let topology = create_test_topology();
        let snapshot = topology.snapshot();

        assert_eq!(snapshot.rack_count, 3);
        assert_eq!(snapshot.nodes.len(), 6);
        // Sorted by id.
        assert_eq!(snapshot.nodes[0].id, node(0));
        assert_eq!(snapshot.nodes[5].id, node(5));
    }

    #[test]
    fn test_active_rack_count() {
        let topology = create_test_topology();
        let health = NodeHealthTracker::new();
        for i in 0..6 {
            health.register(node(i));
        }

        assert_eq!(topology.active_rack_count(&health), 3);

        // Drain both nodes of rack 0.
        health
            .transition(&node(0), NodeHealth::Active, NodeHealth::Decommissioning)
            .unwrap();
        health
            .transition(&node(0), NodeHealth::Decommissioning, NodeHealth::Decommissioned)
            .unwrap();
        health.mark_dead(&node(1));

        assert_eq!(topology.active_rack_count(&health), 2);

        // Decommissioning nodes still count as non-decommissioned.
        health
            .transition(&node(2), NodeHealth::Active, NodeHealth::Decommissioning)
            .unwrap();
        assert_eq!(topology.active_rack_count(&health), 2);
    }

    #[test]
    fn test_placement_rack_count_excludes_draining() {
        let topology = create_test_topology();
        let health = NodeHealthTracker::new();
        for i in 0..6 {
            health.register(node(i));
        }

        assert_eq!(topology.placement_rack_count(&health), 3);

        // Rack 1 keeps one active node; still placeable.
        health
            .transition(&node(2), NodeHealth::Active, NodeHealth::Decommissioning)
            .unwrap();
        assert_eq!(topology.placement_rack_count(&health), 3);

        // Draining the second node removes rack 1 from the placement set,
        // while active_rack_count still counts it.
        health
            .transition(&node(3), NodeHealth::Active, NodeHealth::Decommissioning)
            .unwrap();
        assert_eq!(topology.placement_rack_count(&health), 2);
        assert_eq!(topology.active_rack_count(&health), 3);
    }
}
