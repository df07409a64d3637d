// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end placement tests over a 10-rack, 20-node cluster.

use std::collections::HashMap;
use std::sync::Arc;

use rackwise::{
    BlockId, BlockReplication, ClusterTopology, NodeHealthTracker, NodeId, PlacementConfig,
    PlacementError, PlacementPolicy, PlacementRequest, PlacementVerifier, RackId,
    ReservationTracker,
};

const RACKS: usize = 10;
const HOSTS_PER_RACK: usize = 2;

struct Cluster {
    topology: Arc<ClusterTopology>,
    health: Arc<NodeHealthTracker>,
    policy: PlacementPolicy,
    verifier: PlacementVerifier,
}

fn build_cluster() -> Cluster {
    let topology = Arc::new(ClusterTopology::new());
    let health = Arc::new(NodeHealthTracker::new());
    for rack in 0..RACKS {
        for host in 0..HOSTS_PER_RACK {
            let node = NodeId::new(format!("host{}", rack * HOSTS_PER_RACK + host));
            topology
                .register_node(node.clone(), RackId::new(format!("/rack{rack}")), 1.0)
                .unwrap();
            health.register(node);
        }
    }
    let policy = PlacementPolicy::new(
        Arc::clone(&topology),
        Arc::clone(&health),
        Arc::new(ReservationTracker::new()),
        PlacementConfig::default(),
    );
    let verifier = PlacementVerifier::new(Arc::clone(&topology), Arc::clone(&health));
    Cluster { topology, health, policy, verifier }
}

fn rack_counts(topology: &ClusterTopology, nodes: &[NodeId]) -> HashMap<RackId, usize> {
    let mut counts = HashMap::new();
    for node in nodes {
        *counts.entry(topology.rack_of(node).unwrap()).or_insert(0usize) += 1;
    }
    counts
}

/// Asserts the rack-balance law over the combined replica set: per-rack
/// counts differ by at most one, no node repeats, and the set reaches
/// `min(total racks, replica count)` distinct racks.
fn assert_balanced(cluster: &Cluster, nodes: &[NodeId]) {
    let mut seen = std::collections::HashSet::new();
    for node in nodes {
        assert!(seen.insert(node.clone()), "node {node} selected twice");
    }

    let counts = rack_counts(&cluster.topology, nodes);
    let max = counts.values().copied().max().unwrap_or(0);
    let min = counts.values().copied().min().unwrap_or(0);
    assert!(
        max - min <= 1,
        "unbalanced racks for {} replicas: max {max}, min {min}",
        nodes.len()
    );
    assert_eq!(counts.len(), nodes.len().min(RACKS), "wrong rack spread");
}

#[test]
fn test_initial_then_additional_replicas_stay_balanced() {
    // Each pair is (initial replicas, additional replicas). The balance
    // law must hold after the initial choose and again after topping up
    // with the first set passed back as existing.
    let matrix =
        [(3, 2), (3, 7), (3, 8), (3, 10), (9, 1), (10, 1), (10, 6), (11, 6), (11, 9)];

    for (block, (initial, additional)) in matrix.into_iter().enumerate() {
        let cluster = build_cluster();
        let block = BlockId(block as u64 + 1);

        let first = cluster
            .policy
            .choose(&PlacementRequest::new(block, initial))
            .unwrap();
        assert_eq!(first.targets.len(), initial as usize);
        assert_balanced(&cluster, &first.targets);

        let second = cluster
            .policy
            .choose(
                &PlacementRequest::new(block, additional).with_existing(first.targets.clone()),
            )
            .unwrap();
        assert_eq!(second.targets.len(), additional as usize);

        let mut combined = first.targets;
        combined.extend(second.targets);
        assert_balanced(&cluster, &combined);
    }
}

#[test]
fn test_rebalance_from_partial_subsets() {
    // Take every prefix of a chosen set as the surviving replicas and ask
    // the policy to restore the rest. The combined set must always come
    // out balanced, whatever shape the survivors left the rack counts in.
    let cluster = build_cluster();
    let full = cluster
        .policy
        .choose(&PlacementRequest::new(BlockId(100), 5))
        .unwrap()
        .targets;

    for keep in 1..full.len() {
        let existing: Vec<NodeId> = full[..keep].to_vec();
        let refill = cluster
            .policy
            .choose(
                &PlacementRequest::new(BlockId(100), (full.len() - keep) as i64)
                    .with_existing(existing.clone()),
            )
            .unwrap();

        let mut combined = existing;
        combined.extend(refill.targets);
        assert_balanced(&cluster, &combined);
    }
}

#[test]
fn test_existing_replicas_never_reselected() {
    let cluster = build_cluster();

    let mut holders: Vec<NodeId> = Vec::new();
    // Grow the replica set one at a time up to the full cluster.
    for _ in 0..RACKS * HOSTS_PER_RACK {
        let next = cluster
            .policy
            .choose(&PlacementRequest::new(BlockId(200), 1).with_existing(holders.clone()))
            .unwrap();
        let target = next.targets.into_iter().next().unwrap();
        assert!(!holders.contains(&target), "reselected {target}");
        holders.push(target);
    }
    assert_balanced(&cluster, &holders);
}

#[test]
fn test_fresh_choice_passes_verification() {
    let cluster = build_cluster();

    for replicas in [1i64, 2, 3, 5, 10, 15, 20] {
        let outcome = cluster
            .policy
            .choose(&PlacementRequest::new(BlockId(300 + replicas as u64), replicas))
            .unwrap();
        let status = cluster.verifier.verify(
            &outcome.targets,
            &BlockReplication::Replicated { replicas: replicas as usize },
        );
        assert!(status.is_satisfied(), "{replicas} replicas: {status:?}");
    }
}

#[test]
fn test_request_rejections() {
    let cluster = build_cluster();

    assert!(matches!(
        cluster.policy.choose(&PlacementRequest::new(BlockId(400), 0)),
        Err(PlacementError::InvalidRequest(_))
    ));
    assert!(matches!(
        cluster.policy.choose(&PlacementRequest::new(BlockId(400), -3)),
        Err(PlacementError::InvalidRequest(_))
    ));
    assert!(matches!(
        cluster.policy.choose(&PlacementRequest::new(BlockId(401), 21)),
        Err(PlacementError::InsufficientEligibleNodes { needed: 21, eligible: 20 })
    ));
}

#[test]
fn test_draining_nodes_are_not_targets() {
    let cluster = build_cluster();

    // Drain one whole rack; a full-cluster placement must skip it.
    for host in ["host0", "host1"] {
        cluster
            .health
            .transition(
                &NodeId::from(host),
                rackwise::NodeHealth::Active,
                rackwise::NodeHealth::Decommissioning,
            )
            .unwrap();
    }

    let outcome = cluster
        .policy
        .choose(&PlacementRequest::new(BlockId(500), 18))
        .unwrap();
    assert!(!outcome.targets.contains(&NodeId::from("host0")));
    assert!(!outcome.targets.contains(&NodeId::from("host1")));

    let counts = rack_counts(&cluster.topology, &outcome.targets);
    assert_eq!(counts.len(), RACKS - 1);
    assert!(!counts.contains_key(&RackId::from("/rack0")));
}
