// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! Rack-fault-tolerant block placement for distributed block storage.
//!
//! Rackwise decides which storage nodes hold a block's replicas (or
//! erasure-coded shards) so that losing any single rack costs at most a
//! bounded share of the block: over every rack hosting at least one
//! replica, the per-rack counts differ by at most one.
//!
//! This crate re-exports the public surface of the workspace:
//!
//! - [`ClusterTopology`] and [`NodeHealthTracker`]: node-to-rack
//!   membership and atomic health transitions (`rackwise-topology`)
//! - [`PlacementPolicy`] and [`PlacementVerifier`]: target selection and
//!   post-hoc placement audits (`rackwise-placement`)
//! - [`DecommissionCoordinator`]: the background sweep that drains nodes
//!   by re-placing their replicas (`rackwise-cluster`)
//! - The shared data model: identifiers, health states, replication
//!   descriptors, and configuration (`rackwise-core`)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rackwise::{
//!     BlockId, ClusterTopology, NodeHealthTracker, PlacementConfig,
//!     PlacementPolicy, PlacementRequest, ReservationTracker,
//! };
//!
//! let topology = Arc::new(ClusterTopology::new());
//! let health = Arc::new(NodeHealthTracker::new());
//! for i in 0..6 {
//!     topology
//!         .register_node(format!("host{i}").into(), format!("/rack{}", i / 2).into(), 1.0)
//!         .unwrap();
//!     health.register(format!("host{i}").into());
//! }
//!
//! let policy = PlacementPolicy::new(
//!     topology,
//!     health,
//!     Arc::new(ReservationTracker::new()),
//!     PlacementConfig::default(),
//! );
//! let outcome = policy.choose(&PlacementRequest::new(BlockId(7), 3)).unwrap();
//! assert_eq!(outcome.targets.len(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use rackwise_core::{
    Block, BlockId, BlockReplication, Config, EcScheme, Error, NodeHealth, NodeId, NodeInfo,
    PlacementConfig, RackId, Result,
};

pub use rackwise_topology::{
    ClusterTopology, HealthError, NodeHealthTracker, TopologyError, TopologySnapshot,
};

pub use rackwise_placement::{
    PlacementError, PlacementOutcome, PlacementPolicy, PlacementRequest, PlacementStatus,
    PlacementVerifier, ReservationGuard, ReservationTracker, ViolationReason,
};

pub use rackwise_cluster::{
    BlockIndex, DecommissionConfig, DecommissionCoordinator, DecommissionError, DecommissionEvent,
    DecommissionProgress, InMemoryBlockStore, NoOpBlockIndex, NoOpReplicaCommitter, PassSummary,
    ReplicaCommitter,
};
