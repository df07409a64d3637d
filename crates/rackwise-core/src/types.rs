// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! Common types used throughout Rackwise.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier for a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new node identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier for a rack (failure domain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RackId(String);

impl RackId {
    /// Creates a new rack identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u64);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "blk_{}", self.0)
    }
}

/// Health state of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeHealth {
    /// Node is in service and may receive new replicas.
    Active,
    /// Node is being drained; no new replicas are placed on it.
    Decommissioning,
    /// Node has been fully drained and holds no referenced replicas.
    Decommissioned,
    /// Node is considered dead.
    Dead,
}

impl std::fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Decommissioning => "decommissioning",
            Self::Decommissioned => "decommissioned",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// Descriptive information about a registered node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identifier.
    pub id: NodeId,
    /// Rack the node belongs to.
    pub rack: RackId,
    /// Remaining capacity, used only as a placement tiebreak weight.
    pub capacity: f64,
}

/// An erasure-coding scheme: data plus parity shard counts.
///
/// The scheme determines how many distinct racks a block's shards should
/// span. Every shard should ideally land in its own rack; when the cluster
/// has fewer racks than shards the placement degrades gracefully (see
/// `rackwise-placement`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcScheme {
    data_shards: usize,
    parity_shards: usize,
}

impl EcScheme {
    /// Creates a new erasure scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if either count is zero or the total exceeds 256.
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(Error::InvalidScheme("data_shards must be at least 1".to_string()));
        }
        if parity_shards == 0 {
            return Err(Error::InvalidScheme("parity_shards must be at least 1".to_string()));
        }
        if data_shards + parity_shards > 256 {
            return Err(Error::InvalidScheme("total shards cannot exceed 256".to_string()));
        }
        Ok(Self { data_shards, parity_shards })
    }

    /// Returns the number of data shards.
    #[must_use]
    pub const fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Returns the number of parity shards.
    #[must_use]
    pub const fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Returns the total number of shards (data + parity).
    #[must_use]
    pub const fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Returns the rack-diversity target for this scheme.
    ///
    /// Full fault tolerance requires every shard on its own rack, so the
    /// target equals the total shard count. The cluster may cap this at
    /// the number of racks actually available.
    #[must_use]
    pub const fn required_rack_diversity(&self) -> usize {
        self.total_shards()
    }

    /// The RS(3,2) scheme: 3 data shards, 2 parity shards.
    #[must_use]
    pub const fn rs_3_2() -> Self {
        Self { data_shards: 3, parity_shards: 2 }
    }

    /// The RS(6,3) scheme: 6 data shards, 3 parity shards.
    #[must_use]
    pub const fn rs_6_3() -> Self {
        Self { data_shards: 6, parity_shards: 3 }
    }
}

/// How a block is made redundant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReplication {
    /// Plain replication with the given replica count.
    Replicated {
        /// Number of replicas.
        replicas: usize,
    },
    /// Erasure coding with the given scheme; one shard per replica slot.
    Erasure(EcScheme),
}

impl BlockReplication {
    /// Returns the number of replica slots (replicas or shards).
    #[must_use]
    pub const fn slot_count(&self) -> usize {
        match self {
            Self::Replicated { replicas } => *replicas,
            Self::Erasure(scheme) => scheme.total_shards(),
        }
    }

    /// Returns the erasure scheme, if this block is erasure coded.
    #[must_use]
    pub const fn ec_scheme(&self) -> Option<EcScheme> {
        match self {
            Self::Replicated { .. } => None,
            Self::Erasure(scheme) => Some(*scheme),
        }
    }
}

/// A block and its current replica locations.
///
/// The location set always contains distinct nodes: no two replicas of one
/// block share a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block identifier.
    pub id: BlockId,
    /// Replication descriptor.
    pub replication: BlockReplication,
    /// Nodes currently holding a replica or shard.
    pub locations: HashSet<NodeId>,
}

impl Block {
    /// Creates a new block with no replica locations yet.
    #[must_use]
    pub fn new(id: BlockId, replication: BlockReplication) -> Self {
        Self { id, replication, locations: HashSet::new() }
    }

    /// Returns true if the given node holds a replica of this block.
    #[must_use]
    pub fn references(&self, node: &NodeId) -> bool {
        self.locations.contains(node)
    }

    /// Returns how many replica slots are still unfilled.
    #[must_use]
    pub fn deficit(&self) -> usize {
        self.replication.slot_count().saturating_sub(self.locations.len())
    }
}
