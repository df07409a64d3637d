// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! Cluster topology and node health tracking for Rackwise.
//!
//! This crate provides:
//! - [`ClusterTopology`]: the authoritative node-to-rack membership map
//! - [`NodeHealthTracker`]: atomic compare-and-transition health states
//!
//! Both are read-mostly structures. Topology queries and health reads take
//! shared access; admin mutations (node join/leave, rack reassignment) and
//! health transitions take exclusive access, so readers never observe a
//! torn update.
//!
//! Neither structure is reached through global state: callers receive an
//! `Arc` handle at construction time and pass it to the placement policy
//! and decommission coordinator explicitly.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod health;
pub mod topology;

pub use health::{HealthError, NodeHealthTracker};
pub use topology::{ClusterTopology, TopologyError, TopologySnapshot};
