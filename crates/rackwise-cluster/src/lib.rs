// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! Decommission coordination for Rackwise.
//!
//! This crate provides:
//! - [`DecommissionCoordinator`]: admits nodes into decommissioning,
//!   re-places their replicas via the placement policy, and promotes them
//!   to decommissioned once verification passes
//! - [`BlockIndex`] / [`ReplicaCommitter`]: the collaborator traits
//!   through which the metadata layer exposes block-to-location records
//! - Event emission over a broadcast channel for operator observation
//!
//! # Architecture
//!
//! Decommission runs as a background sweep:
//! 1. An operator calls `request_decommission(node)`; the node moves to
//!    `Decommissioning` and stops receiving new placements.
//! 2. Each sweep pass enumerates blocks referencing the node, chooses a
//!    replacement target with the node excluded, commits it, verifies the
//!    post-repair placement, and evicts the old replica along with any
//!    surplus left behind by earlier failed passes.
//! 3. Blocks that cannot be satisfied are flagged and retried on the next
//!    pass; they never block the rest of the drain.
//! 4. The node is promoted to `Decommissioned` only when a pass finds no
//!    referencing blocks and nothing remains flagged.
//!
//! The sweep is cancellable between passes, never mid-commit, and new
//! blocks created while the drain is in flight are picked up by later
//! passes.
//!
//! # Example
//!
//! ```ignore
//! use rackwise_cluster::{DecommissionConfig, DecommissionCoordinator};
//!
//! let mut coordinator = DecommissionCoordinator::new(
//!     DecommissionConfig::default(), topology, health, policy, verifier,
//! );
//! let mut events = coordinator.subscribe();
//!
//! coordinator.request_decommission(&node)?;
//! coordinator.start(index, committer);
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod decommission;

pub use decommission::{
    BlockIndex, DecommissionConfig, DecommissionCoordinator, DecommissionError,
    DecommissionEvent, DecommissionProgress, InMemoryBlockStore, NoOpBlockIndex,
    NoOpReplicaCommitter, PassSummary, ReplicaCommitter,
};
