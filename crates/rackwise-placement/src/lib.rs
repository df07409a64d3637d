//! Rack-fault-tolerant block placement.
//!
//! This crate decides which storage nodes should hold a block's replicas
//! (or erasure-coded shards) so that replica counts stay balanced across
//! racks: over every rack hosting at least one replica, the per-rack
//! counts differ by at most one.
//!
//! # Overview
//!
//! [`PlacementPolicy::choose`] handles both brand-new blocks (empty
//! pre-existing set) and additional-replica requests. It greedily assigns
//! each requested replica to the rack currently holding the fewest
//! replicas of the block, breaking ties by in-flight reservations and then
//! by a pseudo-random pick seeded per request. Within the chosen rack the
//! node is picked by capacity-weighted random selection. When there are
//! fewer eligible racks than remaining replicas the greedy rule simply
//! wraps around, allowing a second (third, ...) replica per rack instead
//! of failing.
//!
//! The policy is stateless and side-effect-free: it never mutates block
//! state, so concurrent calls for different blocks need no locking. Only
//! the caller's *commit* of the chosen locations requires a per-block
//! critical section.
//!
//! [`PlacementVerifier::verify`] re-checks an existing replica set against
//! the same rules and gates decommission completion.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use rackwise_core::{BlockId, PlacementConfig};
//! use rackwise_topology::{ClusterTopology, NodeHealthTracker};
//! use rackwise_placement::{PlacementPolicy, PlacementRequest, ReservationTracker};
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
//! let reservations = Arc::new(ReservationTracker::new());
//! let policy = PlacementPolicy::new(topology, health, reservations, PlacementConfig::default());
//!
//! let outcome = policy.choose(&PlacementRequest::new(BlockId(1), 3)).unwrap();
//! assert_eq!(outcome.targets.len(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod policy;
pub mod reservation;
pub mod verifier;

pub use policy::{PlacementError, PlacementOutcome, PlacementPolicy, PlacementRequest};
pub use reservation::{ReservationGuard, ReservationTracker};
pub use verifier::{PlacementStatus, PlacementVerifier, ViolationReason};
