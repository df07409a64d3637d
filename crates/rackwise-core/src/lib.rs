// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! Core types and configuration for Rackwise.
//!
//! This crate holds the data model shared by every other Rackwise crate:
//! node, rack, and block identifiers, node health states, replication
//! descriptors (plain replica counts and erasure-coding schemes), and the
//! placement configuration.
//!
//! Nothing in this crate performs placement itself; see
//! `rackwise-placement` for the algorithm and `rackwise-cluster` for the
//! decommission coordinator.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, PlacementConfig};
pub use error::{Error, Result};
pub use types::{
    Block, BlockId, BlockReplication, EcScheme, NodeHealth, NodeId, NodeInfo, RackId,
};
