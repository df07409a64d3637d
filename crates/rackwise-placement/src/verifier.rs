//! Verification of existing replica placements.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rackwise_core::{Block, BlockReplication, NodeId, RackId};
use rackwise_topology::{ClusterTopology, NodeHealthTracker};

/// Why a placement fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationReason {
    /// Two replica slots share one node.
    DuplicateNode(NodeId),
    /// A replica location is not in the topology.
    UnknownNode(NodeId),
    /// Per-rack replica counts differ by more than one.
    UnbalancedRacks {
        /// Highest per-rack count.
        max: usize,
        /// Lowest per-rack count among occupied racks.
        min: usize,
    },
    /// Fewer distinct racks than the replication requires.
    InsufficientRackDiversity {
        /// Distinct racks hosting a replica.
        achieved: usize,
        /// Racks required (capped by racks available).
        required: usize,
    },
}

impl std::fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateNode(node) => write!(f, "node {node} holds more than one replica"),
            Self::UnknownNode(node) => write!(f, "node {node} is not in the topology"),
            Self::UnbalancedRacks { max, min } => {
                write!(f, "rack counts unbalanced: max {max}, min {min}")
            }
            Self::InsufficientRackDiversity { achieved, required } => {
                write!(f, "only {achieved} racks used, {required} required")
            }
        }
    }
}

/// Outcome of verifying a block's placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementStatus {
    /// The placement satisfies the active policy.
    Satisfied,
    /// The placement violates the policy for the given reason.
    Violated(ViolationReason),
}

impl PlacementStatus {
    /// Returns true for [`PlacementStatus::Satisfied`].
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Checks whether an existing replica set satisfies the placement policy.
///
/// Used for ad-hoc audits and as the gate before a node's decommission is
/// finalized. Verification recomputes per-rack counts from the *current*
/// replica set; it never caches.
pub struct PlacementVerifier {
    topology: Arc<ClusterTopology>,
    health: Arc<NodeHealthTracker>,
}

impl PlacementVerifier {
    /// Creates a verifier over the given cluster views.
    #[must_use]
    pub fn new(topology: Arc<ClusterTopology>, health: Arc<NodeHealthTracker>) -> Self {
        Self { topology, health }
    }

    /// Verifies a replica location set against its replication descriptor.
    ///
    /// Checks, in order: distinct nodes, known nodes, the rack-balance law
    /// (max - min <= 1 across occupied racks), and rack diversity of at
    /// least `min(active racks, replica slots)` (for erasure-coded blocks
    /// the slot target is the scheme's total shard count).
    #[must_use]
    pub fn verify(
        &self,
        locations: &[NodeId],
        replication: &BlockReplication,
    ) -> PlacementStatus {
        let mut seen: HashSet<&NodeId> = HashSet::with_capacity(locations.len());
        for node in locations {
            if !seen.insert(node) {
                return PlacementStatus::Violated(ViolationReason::DuplicateNode(node.clone()));
            }
        }

        let mut rack_counts: HashMap<RackId, usize> = HashMap::new();
        for node in locations {
            match self.topology.rack_of(node) {
                Ok(rack) => *rack_counts.entry(rack).or_default() += 1,
                Err(_) => {
                    return PlacementStatus::Violated(ViolationReason::UnknownNode(node.clone()))
                }
            }
        }

        if let (Some(max), Some(min)) =
            (rack_counts.values().copied().max(), rack_counts.values().copied().min())
        {
            if max - min > 1 {
                return PlacementStatus::Violated(ViolationReason::UnbalancedRacks { max, min });
            }
        }

        let available = self.topology.placement_rack_count(&self.health);
        let required = replication.slot_count().min(available);
        let achieved = rack_counts.len();
        if achieved < required {
            return PlacementStatus::Violated(ViolationReason::InsufficientRackDiversity {
                achieved,
                required,
            });
        }

        PlacementStatus::Satisfied
    }

    /// Verifies a block's current locations.
    #[must_use]
    pub fn verify_block(&self, block: &Block) -> PlacementStatus {
        let locations: Vec<NodeId> = block.locations.iter().cloned().collect();
        self.verify(&locations, &block.replication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackwise_core::{BlockId, EcScheme};

    fn build_cluster(racks: &[&str]) -> (Arc<ClusterTopology>, Arc<NodeHealthTracker>) {
        let topology = Arc::new(ClusterTopology::new());
        let health = Arc::new(NodeHealthTracker::new());
        for (i, rack) in racks.iter().enumerate() {
            let node = NodeId::new(format!("host{i}"));
            topology.register_node(node.clone(), RackId::from(*rack), 1.0).unwrap();
            health.register(node);
        }
        (topology, health)
    }

    fn nodes(indices: &[usize]) -> Vec<NodeId> {
        indices.iter().map(|i| NodeId::new(format!("host{i}"))).collect()
    }

    #[test]
    fn test_balanced_placement_satisfied() {
        let (topology, health) = build_cluster(&["/r0", "/r0", "/r1", "/r1", "/r2", "/r2"]);
        let verifier = PlacementVerifier::new(topology, health);

        let status = verifier.verify(
            &nodes(&[0, 2, 4]),
            &BlockReplication::Replicated { replicas: 3 },
        );
        assert!(status.is_satisfied());
    }

    #[test]
    fn test_unbalanced_racks_violated() {
        let (topology, health) = build_cluster(&["/r0", "/r0", "/r0", "/r1", "/r2", "/r2"]);
        let verifier = PlacementVerifier::new(topology, health);

        // 3 in /r0, 1 in /r1: spread of 2.
        let status = verifier.verify(
            &nodes(&[0, 1, 2, 3]),
            &BlockReplication::Replicated { replicas: 4 },
        );
        assert_eq!(
            status,
            PlacementStatus::Violated(ViolationReason::UnbalancedRacks { max: 3, min: 1 })
        );
    }

    #[test]
    fn test_duplicate_node_violated() {
        let (topology, health) = build_cluster(&["/r0", "/r1"]);
        let verifier = PlacementVerifier::new(topology, health);

        let status = verifier.verify(
            &nodes(&[0, 0]),
            &BlockReplication::Replicated { replicas: 2 },
        );
        assert!(matches!(
            status,
            PlacementStatus::Violated(ViolationReason::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_unknown_node_violated() {
        let (topology, health) = build_cluster(&["/r0", "/r1"]);
        let verifier = PlacementVerifier::new(topology, health);

        let status = verifier.verify(
            &[NodeId::from("host0"), NodeId::from("ghost")],
            &BlockReplication::Replicated { replicas: 2 },
        );
        assert!(matches!(
            status,
            PlacementStatus::Violated(ViolationReason::UnknownNode(_))
        ));
    }

    #[test]
    fn test_insufficient_diversity_violated() {
        let (topology, health) = build_cluster(&["/r0", "/r0", "/r1", "/r1", "/r2", "/r2"]);
        let verifier = PlacementVerifier::new(topology, health);

        // Two replicas crammed into one rack while three racks exist.
        let status = verifier.verify(
            &nodes(&[0, 1]),
            &BlockReplication::Replicated { replicas: 2 },
        );
        assert_eq!(
            status,
            PlacementStatus::Violated(ViolationReason::InsufficientRackDiversity {
                achieved: 1,
                required: 2,
            })
        );
    }

    #[test]
    fn test_diversity_capped_by_cluster() {
        // Single rack: even 3 replicas on it are acceptable.
        let (topology, health) = build_cluster(&["/r0", "/r0", "/r0"]);
        let verifier = PlacementVerifier::new(topology, health);

        let status = verifier.verify(
            &nodes(&[0, 1, 2]),
            &BlockReplication::Replicated { replicas: 3 },
        );
        assert!(status.is_satisfied());
    }

    #[test]
    fn test_ec_block_diversity_target() {
        let (topology, health) = build_cluster(&[
            "/r0", "/r1", "/r2", "/r3", "/r4", "/r5", "/r6",
        ]);
        let verifier = PlacementVerifier::new(topology, health);

        // RS(3,2) wants 5 racks; these 5 shards sit on 5 distinct racks.
        let status = verifier.verify(
            &nodes(&[0, 1, 2, 3, 4]),
            &BlockReplication::Erasure(EcScheme::rs_3_2()),
        );
        assert!(status.is_satisfied());

        // Same shards squeezed onto 4 racks fail.
        let mut block = Block::new(BlockId(1), BlockReplication::Erasure(EcScheme::rs_3_2()));
        block.locations = nodes(&[0, 1, 2, 3]).into_iter().collect();
        let status = verifier.verify_block(&block);
        assert_eq!(
            status,
            PlacementStatus::Violated(ViolationReason::InsufficientRackDiversity {
                achieved: 4,
                required: 5,
            })
        );
    }
}
