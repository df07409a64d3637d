//! The rack-fault-tolerant placement policy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use rackwise_core::{BlockId, EcScheme, NodeId, PlacementConfig, RackId};
use rackwise_topology::{ClusterTopology, NodeHealthTracker};

use crate::reservation::ReservationTracker;

/// Errors that can occur during placement.
///
/// Placement is all-or-nothing: on error, no partial target list is
/// returned and no state has been mutated.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The request is malformed (caller bug, not retried).
    #[error("invalid placement request: {0}")]
    InvalidRequest(String),

    /// Fewer eligible nodes exist cluster-wide than requested replicas.
    /// Transient; the caller should retry after cluster state changes.
    #[error("insufficient eligible nodes: need {needed}, have {eligible}")]
    InsufficientEligibleNodes {
        /// Number of replicas requested.
        needed: usize,
        /// Number of eligible nodes available.
        eligible: usize,
    },

    /// The erasure-coding rack-diversity target could not be met and the
    /// policy is configured with `strict_ec_diversity`.
    #[error("rack diversity unmet: achieved {achieved}, required {required}")]
    RackDiversityUnmet {
        /// Distinct racks in the combined replica set.
        achieved: usize,
        /// Distinct racks required by the scheme.
        required: usize,
    },
}

/// A request for additional replica placements.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    /// The block being placed.
    pub block_id: BlockId,
    /// Nodes already holding a replica of this block. Never re-selected.
    pub existing: Vec<NodeId>,
    /// Number of additional replicas to place. Values `<= 0` are rejected
    /// with [`PlacementError::InvalidRequest`].
    pub additional: i64,
    /// Nodes explicitly excluded by the caller (beyond `existing`).
    pub excluded: HashSet<NodeId>,
    /// Rack of the requesting client; a soft locality hint only.
    pub client_rack: Option<RackId>,
    /// Erasure scheme, if the block is erasure coded.
    pub scheme: Option<EcScheme>,
    /// Seed for the pseudo-random tie-break. Defaults to the block id so
    /// identical requests are reproducible.
    pub seed: Option<u64>,
}

impl PlacementRequest {
    /// Creates a request to place `additional` replicas of a new block.
    #[must_use]
    pub fn new(block_id: BlockId, additional: i64) -> Self {
        Self {
            block_id,
            existing: Vec::new(),
            additional,
            excluded: HashSet::new(),
            client_rack: None,
            scheme: None,
            seed: None,
        }
    }

    /// Sets the nodes already holding a replica.
    #[must_use]
    pub fn with_existing(mut self, existing: Vec<NodeId>) -> Self {
        self.existing = existing;
        self
    }

    /// Adds explicitly excluded nodes.
    #[must_use]
    pub fn with_excluded(mut self, excluded: impl IntoIterator<Item = NodeId>) -> Self {
        self.excluded.extend(excluded);
        self
    }

    /// Sets the requesting client's rack as a soft locality hint.
    #[must_use]
    pub fn with_client_rack(mut self, rack: RackId) -> Self {
        self.client_rack = Some(rack);
        self
    }

    /// Marks the block as erasure coded with the given scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: EcScheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    /// Overrides the tie-break seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Result of a successful placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementOutcome {
    /// Chosen nodes, in placement order. Length equals the requested count.
    pub targets: Vec<NodeId>,
    /// Whether the combined replica set meets its rack-diversity target.
    ///
    /// Always inspect this for erasure-coded blocks: a cluster with fewer
    /// racks than shards still succeeds, flagged here as a soft condition.
    pub rack_diversity_met: bool,
}

/// Selects target nodes for block replicas, balancing across racks.
///
/// See the crate docs for the algorithm. The policy holds only shared
/// read handles; it never mutates block or cluster state.
pub struct PlacementPolicy {
    topology: Arc<ClusterTopology>,
    health: Arc<NodeHealthTracker>,
    reservations: Arc<ReservationTracker>,
    config: PlacementConfig,
}

impl PlacementPolicy {
    /// Creates a new policy over the given cluster views.
    #[must_use]
    pub fn new(
        topology: Arc<ClusterTopology>,
        health: Arc<NodeHealthTracker>,
        reservations: Arc<ReservationTracker>,
        config: PlacementConfig,
    ) -> Self {
        Self { topology, health, reservations, config }
    }

    /// Returns the reservation tracker shared with callers.
    #[must_use]
    pub fn reservations(&self) -> &Arc<ReservationTracker> {
        &self.reservations
    }

    /// Returns the placement configuration.
    #[must_use]
    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Chooses target nodes for the requested replicas.
    ///
    /// # Errors
    ///
    /// - [`PlacementError::InvalidRequest`] for `additional <= 0` or when
    ///   the exclusion set covers every otherwise-eligible node.
    /// - [`PlacementError::InsufficientEligibleNodes`] when the cluster
    ///   has fewer eligible nodes than requested replicas.
    /// - [`PlacementError::RackDiversityUnmet`] only in strict EC mode.
    pub fn choose(&self, request: &PlacementRequest) -> Result<PlacementOutcome, PlacementError> {
        if request.additional <= 0 {
            return Err(PlacementError::InvalidRequest(format!(
                "count must be positive, got {}",
                request.additional
            )));
        }
        let count = request.additional as usize;

        let snapshot = self.topology.snapshot();
        let existing: HashSet<&NodeId> = request.existing.iter().collect();

        // Bucket eligible nodes by rack. A node is eligible when it is
        // Active, not already holding a replica, not excluded, and above
        // the capacity floor. Racks holding any active node also feed the
        // diversity target, the same denominator the verifier uses, so a
        // choose that reports the target met also verifies as satisfied.
        let mut eligible_by_rack: HashMap<RackId, Vec<(NodeId, f64)>> = HashMap::new();
        let mut active_racks: HashSet<RackId> = HashSet::new();
        let mut eligible_total = 0usize;
        let mut excluded_only = 0usize;
        for info in &snapshot.nodes {
            if !self.health.is_active(&info.id) {
                continue;
            }
            active_racks.insert(info.rack.clone());
            if existing.contains(&info.id) || info.capacity < self.config.min_capacity {
                continue;
            }
            if request.excluded.contains(&info.id) {
                excluded_only += 1;
                continue;
            }
            eligible_by_rack
                .entry(info.rack.clone())
                .or_default()
                .push((info.id.clone(), info.capacity));
            eligible_total += 1;
        }

        if eligible_total == 0 && excluded_only > 0 {
            return Err(PlacementError::InvalidRequest(
                "exclusion set covers every eligible node".to_string(),
            ));
        }
        if eligible_total < count {
            return Err(PlacementError::InsufficientEligibleNodes {
                needed: count,
                eligible: eligible_total,
            });
        }

        // Per-rack counts of the pre-existing replica set. The balance law
        // applies to the combined set, so placement starts from these.
        let mut rack_counts: HashMap<RackId, usize> = HashMap::new();
        for node in &request.existing {
            if let Ok(rack) = self.topology.rack_of(node) {
                *rack_counts.entry(rack).or_default() += 1;
            }
        }

        let seed = request.seed.unwrap_or(request.block_id.0);
        let mut rng = StdRng::seed_from_u64(seed);

        // Sorted node lists keep the seeded tie-break reproducible; hash
        // map iteration order must not leak into the choice.
        for nodes in eligible_by_rack.values_mut() {
            nodes.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let mut targets: Vec<NodeId> = Vec::with_capacity(count);
        for _ in 0..count {
            let rack = self.pick_rack(&eligible_by_rack, &rack_counts, request, &mut rng);
            let Some(nodes) = eligible_by_rack.get_mut(&rack) else {
                // Unreachable: pick_rack only returns racks present in the
                // candidate map, and eligibility was checked up front.
                return Err(PlacementError::InsufficientEligibleNodes {
                    needed: count,
                    eligible: targets.len(),
                });
            };
            let idx = pick_weighted(nodes, &mut rng);
            let (node, _) = nodes.swap_remove(idx);
            trace!(block = %request.block_id, node = %node, rack = %rack, "Chose target");
            *rack_counts.entry(rack).or_default() += 1;
            targets.push(node);
        }

        let achieved = rack_counts.len();
        let required = match request.scheme {
            Some(scheme) => scheme.required_rack_diversity().min(active_racks.len()),
            None => (request.existing.len() + count).min(active_racks.len()),
        };
        let rack_diversity_met = achieved >= required;

        if !rack_diversity_met && request.scheme.is_some() && self.config.strict_ec_diversity {
            return Err(PlacementError::RackDiversityUnmet { achieved, required });
        }

        debug!(
            block = %request.block_id,
            count,
            racks = achieved,
            diversity_met = rack_diversity_met,
            "Placement chosen"
        );
        Ok(PlacementOutcome { targets, rack_diversity_met })
    }

    /// Picks the rack holding the fewest replicas among racks that still
    /// have an eligible node. Ties break by fewest in-flight reservations,
    /// then the client-rack hint, then a seeded pseudo-random pick.
    fn pick_rack(
        &self,
        eligible_by_rack: &HashMap<RackId, Vec<(NodeId, f64)>>,
        rack_counts: &HashMap<RackId, usize>,
        request: &PlacementRequest,
        rng: &mut StdRng,
    ) -> RackId {
        let mut candidates: Vec<&RackId> = eligible_by_rack
            .iter()
            .filter(|(_, nodes)| !nodes.is_empty())
            .map(|(rack, _)| rack)
            .collect();
        candidates.sort();

        let replica_count = |rack: &RackId| rack_counts.get(rack).copied().unwrap_or(0);
        if let Some(min) = candidates.iter().map(|rack| replica_count(rack)).min() {
            candidates.retain(|rack| replica_count(rack) == min);
        }

        if candidates.len() > 1 {
            if let Some(min) =
                candidates.iter().map(|rack| self.reservations.in_flight(rack)).min()
            {
                candidates.retain(|rack| self.reservations.in_flight(rack) == min);
            }
        }

        if candidates.len() > 1 && self.config.prefer_client_rack {
            if let Some(hint) = &request.client_rack {
                if candidates.contains(&hint) {
                    return hint.clone();
                }
            }
        }

        match candidates.len() {
            0 | 1 => candidates.first().map_or_else(|| RackId::from(""), |rack| (*rack).clone()),
            n => candidates[rng.gen_range(0..n)].clone(),
        }
    }
}

/// Picks an index into `nodes` weighted by remaining capacity. Falls back
/// to a uniform pick when all weights are zero.
fn pick_weighted(nodes: &[(NodeId, f64)], rng: &mut StdRng) -> usize {
    if nodes.len() <= 1 {
        return 0;
    }
    let weights: Vec<f64> = nodes.iter().map(|(_, cap)| cap.max(0.0)).collect();
    match WeightedIndex::new(&weights) {
        Ok(dist) => dist.sample(rng),
        Err(_) => rng.gen_range(0..nodes.len()),
    }
}
