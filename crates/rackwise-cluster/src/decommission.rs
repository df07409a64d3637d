// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! The decommission coordinator and its background repair sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use rackwise_core::{Block, BlockId, NodeHealth, NodeId, RackId};
use rackwise_placement::{PlacementPolicy, PlacementRequest, PlacementStatus, PlacementVerifier};
use rackwise_topology::{ClusterTopology, HealthError, NodeHealthTracker};

/// Configuration for the decommission coordinator.
#[derive(Debug, Clone)]
pub struct DecommissionConfig {
    /// Interval between sweep passes.
    pub sweep_interval: Duration,

    /// Maximum blocks repaired per node per pass. Remaining blocks wait
    /// for the next pass, keeping individual passes bounded.
    pub max_blocks_per_pass: usize,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for DecommissionConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            max_blocks_per_pass: 1024,
            event_capacity: 1024,
        }
    }
}

/// Errors from decommission admission operations.
#[derive(Debug, Error)]
pub enum DecommissionError {
    /// The node cannot enter or leave decommissioning from its current
    /// health state.
    #[error(transparent)]
    Health(#[from] HealthError),
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum DecommissionEvent {
    /// A node was admitted into decommissioning.
    Requested {
        /// The draining node.
        node: NodeId,
    },
    /// A decommission was aborted; the node returned to active service.
    Aborted {
        /// The node returned to service.
        node: NodeId,
    },
    /// A node finished draining and is now decommissioned.
    Completed {
        /// The decommissioned node.
        node: NodeId,
    },
    /// A block's replica was re-placed off the draining node.
    BlockRepaired {
        /// The repaired block.
        block: BlockId,
        /// The draining node the replica left.
        node: NodeId,
        /// The node that received the replacement replica.
        target: NodeId,
    },
    /// A block could not be repaired this pass and will be retried.
    BlockFlagged {
        /// The affected block.
        block: BlockId,
        /// The draining node still referenced by the block.
        node: NodeId,
        /// Why the repair did not complete.
        reason: String,
    },
    /// A sweep pass over one draining node finished.
    PassCompleted {
        /// The draining node.
        node: NodeId,
        /// Blocks repaired during this pass.
        repaired: usize,
        /// Blocks flagged during this pass.
        flagged: usize,
        /// Blocks still referencing the node after this pass.
        remaining: usize,
    },
}

/// Summary of a single sweep pass over one draining node.
#[derive(Debug, Clone)]
pub struct PassSummary {
    /// Blocks repaired during the pass.
    pub repaired: usize,
    /// Blocks flagged during the pass.
    pub flagged: usize,
    /// Blocks still referencing the node after the pass.
    pub remaining: usize,
    /// Whether the node was promoted to `Decommissioned` by this pass.
    pub completed: bool,
}

/// Progress snapshot for a draining node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecommissionProgress {
    /// The draining node.
    pub node: NodeId,
    /// Total blocks repaired since decommission was requested.
    pub repaired_total: usize,
    /// Blocks currently flagged for retry.
    pub flagged: usize,
    /// Sweep passes executed so far.
    pub passes: usize,
}

/// Read access to the durable block-to-location records, owned by the
/// metadata/journal layer.
#[async_trait]
pub trait BlockIndex: Send + Sync {
    /// Returns all blocks with a replica on the given node.
    async fn blocks_on_node(&self, node: &NodeId) -> Result<Vec<Block>, String>;
}

/// Commits placement decisions into the durable block records.
///
/// Implementations must serialize commits per block; the coordinator
/// additionally holds a per-block critical section around each
/// commit-verify-evict sequence.
#[async_trait]
pub trait ReplicaCommitter: Send + Sync {
    /// Records a new replica location for the block.
    async fn commit(&self, block: BlockId, node: &NodeId) -> Result<(), String>;

    /// Removes a replica location from the block.
    async fn evict(&self, block: BlockId, node: &NodeId) -> Result<(), String>;
}

#[derive(Debug, Default)]
struct DrainState {
    repaired_total: usize,
    passes: usize,
}

#[derive(Debug, Clone)]
struct FlaggedBlock {
    node: NodeId,
    reason: String,
    attempts: u32,
}

/// Orchestrates node decommissioning.
///
/// State machine per node: `Active -> Decommissioning -> Decommissioned`,
/// with `Decommissioning -> Active` on abort. Aborting is always safe:
/// a repair removes a replica only after the remaining set has verified
/// as satisfied.
pub struct DecommissionCoordinator {
    config: DecommissionConfig,
    topology: Arc<ClusterTopology>,
    health: Arc<NodeHealthTracker>,
    policy: Arc<PlacementPolicy>,
    verifier: Arc<PlacementVerifier>,
    /// Nodes currently draining, with per-node progress counters.
    draining: Arc<DashMap<NodeId, DrainState>>,
    /// Blocks that failed repair, keyed by block; retried every pass.
    flagged: Arc<DashMap<BlockId, FlaggedBlock>>,
    /// Per-block critical sections around commit/evict.
    block_locks: Arc<DashMap<BlockId, Arc<Mutex<()>>>>,
    event_tx: broadcast::Sender<DecommissionEvent>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl DecommissionCoordinator {
    /// Creates a new coordinator over the given cluster views.
    #[must_use]
    pub fn new(
        config: DecommissionConfig,
        topology: Arc<ClusterTopology>,
        health: Arc<NodeHealthTracker>,
        policy: Arc<PlacementPolicy>,
        verifier: Arc<PlacementVerifier>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            config,
            topology,
            health,
            policy,
            verifier,
            draining: Arc::new(DashMap::new()),
            flagged: Arc::new(DashMap::new()),
            block_locks: Arc::new(DashMap::new()),
            event_tx,
            shutdown_tx: None,
        }
    }

    /// Subscribes to decommission events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DecommissionEvent> {
        self.event_tx.subscribe()
    }

    /// Admits a node into decommissioning.
    ///
    /// # Errors
    ///
    /// Rejected with [`DecommissionError::Health`] if the node is not
    /// currently `Active`.
    pub fn request_decommission(&self, node: &NodeId) -> Result<(), DecommissionError> {
        self.health
            .transition(node, NodeHealth::Active, NodeHealth::Decommissioning)?;
        self.draining.insert(node.clone(), DrainState::default());
        counter!("rackwise_decommission_requested").increment(1);
        gauge!("rackwise_decommission_draining_nodes").set(self.draining.len() as f64);
        let _ = self.event_tx.send(DecommissionEvent::Requested { node: node.clone() });
        info!(node = %node, "Decommission requested");
        Ok(())
    }

    /// Aborts an in-flight decommission, returning the node to service.
    ///
    /// # Errors
    ///
    /// Rejected with [`DecommissionError::Health`] if the node is not
    /// currently `Decommissioning`.
    pub fn abort_decommission(&self, node: &NodeId) -> Result<(), DecommissionError> {
        self.health
            .transition(node, NodeHealth::Decommissioning, NodeHealth::Active)?;
        self.draining.remove(node);
        self.flagged.retain(|_, flag| flag.node != *node);
        counter!("rackwise_decommission_aborted").increment(1);
        gauge!("rackwise_decommission_draining_nodes").set(self.draining.len() as f64);
        let _ = self.event_tx.send(DecommissionEvent::Aborted { node: node.clone() });
        info!(node = %node, "Decommission aborted");
        Ok(())
    }

    /// Returns true once the node has fully drained.
    #[must_use]
    pub fn is_decommissioned(&self, node: &NodeId) -> bool {
        matches!(self.health.health_of(node), Some(NodeHealth::Decommissioned))
    }

    /// Returns a progress snapshot for a draining node, if it is draining.
    #[must_use]
    pub fn progress(&self, node: &NodeId) -> Option<DecommissionProgress> {
        let state = self.draining.get(node)?;
        let flagged = self.flagged.iter().filter(|entry| entry.node == *node).count();
        Some(DecommissionProgress {
            node: node.clone(),
            repaired_total: state.repaired_total,
            flagged,
            passes: state.passes,
        })
    }

    /// Returns the currently flagged blocks and the reasons they failed.
    #[must_use]
    pub fn flagged_blocks(&self) -> Vec<(BlockId, String)> {
        self.flagged
            .iter()
            .map(|entry| (*entry.key(), entry.reason.clone()))
            .collect()
    }

    /// Runs one sweep pass for a single draining node.
    ///
    /// Exposed so callers can drive the drain deterministically; the
    /// background sweep started by [`DecommissionCoordinator::start`]
    /// calls this on every tick.
    ///
    /// # Errors
    ///
    /// Returns an error only when the block index itself fails; repair
    /// failures for individual blocks are flagged, not returned.
    pub async fn run_pass<I, C>(
        &self,
        node: &NodeId,
        index: &I,
        committer: &C,
    ) -> Result<PassSummary, String>
    where
        I: BlockIndex + ?Sized,
        C: ReplicaCommitter + ?Sized,
    {
        let blocks = index.blocks_on_node(node).await?;
        let mut repaired = 0usize;
        let mut flagged = 0usize;

        for block in blocks.iter().take(self.config.max_blocks_per_pass) {
            if self.repair_block(block, node, committer).await {
                repaired += 1;
            } else {
                flagged += 1;
            }
        }

        let remaining = index.blocks_on_node(node).await?.len();
        let node_flagged = self.flagged.iter().filter(|entry| entry.node == *node).count();

        if let Some(mut state) = self.draining.get_mut(node) {
            state.repaired_total += repaired;
            state.passes += 1;
        }

        counter!("rackwise_decommission_blocks_repaired").increment(repaired as u64);
        gauge!("rackwise_decommission_flagged_blocks").set(self.flagged.len() as f64);
        let _ = self.event_tx.send(DecommissionEvent::PassCompleted {
            node: node.clone(),
            repaired,
            flagged,
            remaining,
        });
        debug!(node = %node, repaired, flagged, remaining, "Sweep pass completed");

        // Promote only when nothing references the node and nothing is
        // left flagged. New blocks may still appear; the next pass will
        // catch them, which is why promotion re-checks the index.
        let mut completed = false;
        if remaining == 0 && node_flagged == 0 && self.draining.contains_key(node) {
            match self
                .health
                .transition(node, NodeHealth::Decommissioning, NodeHealth::Decommissioned)
            {
                Ok(()) => {
                    self.draining.remove(node);
                    counter!("rackwise_decommission_completed").increment(1);
                    gauge!("rackwise_decommission_draining_nodes")
                        .set(self.draining.len() as f64);
                    let _ = self
                        .event_tx
                        .send(DecommissionEvent::Completed { node: node.clone() });
                    info!(node = %node, "Decommission completed");
                    completed = true;
                }
                Err(e) => {
                    // Lost a race with an abort; the node is back in
                    // service and the drain entry is already gone.
                    debug!(node = %node, error = %e, "Promotion skipped");
                }
            }
        }

        Ok(PassSummary { repaired, flagged, remaining, completed })
    }

    /// Repairs one block: choose a replacement if one is still needed,
    /// commit, verify, trim any surplus replicas left behind by earlier
    /// failed passes, then evict the draining replica. Returns true when
    /// the block ends the pass satisfied.
    async fn repair_block<C>(&self, block: &Block, node: &NodeId, committer: &C) -> bool
    where
        C: ReplicaCommitter + ?Sized,
    {
        let lock = {
            let entry = self
                .block_locks
                .entry(block.id)
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let _guard = lock.lock().await;

        // Rack counts for the post-repair set must not include the
        // draining replica, so it is dropped from `existing` and barred
        // through the exclusion set instead.
        let survivors: Vec<NodeId> =
            block.locations.iter().filter(|loc| *loc != node).cloned().collect();
        let slots = block.replication.slot_count();

        // A pass that committed a replacement but failed verification
        // leaves that replica in place. When the survivors already satisfy
        // the policy, go straight to eviction instead of committing yet
        // another replica.
        let mut post_repair = survivors;
        let mut new_target = None;
        let mut _reservation = None;
        let survivors_satisfied = post_repair.len() >= slots
            && self.verifier.verify(&post_repair, &block.replication).is_satisfied();
        if !survivors_satisfied {
            let mut request = PlacementRequest::new(block.id, 1)
                .with_existing(post_repair.clone())
                .with_excluded([node.clone()]);
            if let Some(scheme) = block.replication.ec_scheme() {
                request = request.with_scheme(scheme);
            }

            let target = match self.policy.choose(&request) {
                Ok(outcome) => match outcome.targets.into_iter().next() {
                    Some(target) => target,
                    None => {
                        self.flag_block(block.id, node, "policy returned no targets".to_string());
                        return false;
                    }
                },
                Err(e) => {
                    self.flag_block(block.id, node, e.to_string());
                    return false;
                }
            };

            // Hold a rack reservation across the commit so concurrent
            // chooses steer away from this rack.
            _reservation = self
                .topology
                .rack_of(&target)
                .ok()
                .map(|rack| self.policy.reservations().reserve(rack));

            if let Err(e) = committer.commit(block.id, &target).await {
                self.flag_block(block.id, node, format!("commit failed: {e}"));
                return false;
            }
            post_repair.push(target.clone());
            new_target = Some(target);
        }

        match self.verifier.verify(&post_repair, &block.replication) {
            PlacementStatus::Satisfied => {
                // Drop replicas beyond the slot count before the draining
                // one: a failed surplus evict keeps the block referencing
                // the node and therefore on the retry path.
                while post_repair.len() > slots {
                    let Some(victim) = self.surplus_victim(&post_repair) else { break };
                    if let Err(e) = committer.evict(block.id, &victim).await {
                        self.flag_block(block.id, node, format!("surplus evict failed: {e}"));
                        return false;
                    }
                    debug!(block = %block.id, node = %victim, "Evicted surplus replica");
                    post_repair.retain(|loc| *loc != victim);
                }
                if let Err(e) = committer.evict(block.id, node).await {
                    self.flag_block(block.id, node, format!("evict failed: {e}"));
                    return false;
                }
                self.flagged.remove(&block.id);
                if let Some(target) = new_target {
                    let _ = self.event_tx.send(DecommissionEvent::BlockRepaired {
                        block: block.id,
                        node: node.clone(),
                        target,
                    });
                }
                true
            }
            PlacementStatus::Violated(reason) => {
                // The replacement replica stays; the old one is kept until
                // a later pass produces a satisfied placement.
                self.flag_block(block.id, node, reason.to_string());
                false
            }
        }
    }

    /// Picks a replica to drop from an over-replicated set: a node in the
    /// most-occupied rack, so removal keeps the per-rack counts within one
    /// of each other.
    fn surplus_victim(&self, locations: &[NodeId]) -> Option<NodeId> {
        let mut by_rack: HashMap<RackId, Vec<NodeId>> = HashMap::new();
        for node in locations {
            if let Ok(rack) = self.topology.rack_of(node) {
                by_rack.entry(rack).or_default().push(node.clone());
            }
        }
        let mut racks: Vec<(RackId, Vec<NodeId>)> = by_rack.into_iter().collect();
        racks.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
        let (_, mut members) = racks.into_iter().next()?;
        members.sort();
        members.into_iter().next()
    }

    fn flag_block(&self, block: BlockId, node: &NodeId, reason: String) {
        counter!("rackwise_decommission_blocks_flagged").increment(1);
        let attempts = self.flagged.get(&block).map_or(0, |flag| flag.attempts) + 1;
        warn!(
            block = %block,
            node = %node,
            reason = %reason,
            attempts,
            "Block flagged for retry"
        );
        self.flagged
            .insert(block, FlaggedBlock { node: node.clone(), reason: reason.clone(), attempts });
        let _ = self.event_tx.send(DecommissionEvent::BlockFlagged {
            block,
            node: node.clone(),
            reason,
        });
    }

    /// Starts the background sweep.
    ///
    /// The sweep ticks every `sweep_interval` and runs one pass per
    /// draining node. Cancellation via [`DecommissionCoordinator::stop`]
    /// takes effect between passes, never mid-commit.
    pub fn start<I, C>(&mut self, index: Arc<I>, committer: Arc<C>)
    where
        I: BlockIndex + 'static,
        C: ReplicaCommitter + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let sweeper = self.handle();
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let nodes: Vec<NodeId> =
                            sweeper.draining.iter().map(|entry| entry.key().clone()).collect();
                        for node in nodes {
                            if let Err(e) = sweeper.run_pass(&node, &*index, &*committer).await {
                                warn!(node = %node, error = %e, "Sweep pass failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Decommission sweep shutting down");
                        break;
                    }
                }
            }
        });

        info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis(),
            "Decommission sweep started"
        );
    }

    /// Stops the background sweep after the current pass.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// A task-local handle sharing all coordinator state.
    fn handle(&self) -> Self {
        Self {
            config: self.config.clone(),
            topology: Arc::clone(&self.topology),
            health: Arc::clone(&self.health),
            policy: Arc::clone(&self.policy),
            verifier: Arc::clone(&self.verifier),
            draining: Arc::clone(&self.draining),
            flagged: Arc::clone(&self.flagged),
            block_locks: Arc::clone(&self.block_locks),
            event_tx: self.event_tx.clone(),
            shutdown_tx: None,
        }
    }
}

/// A block index that reports no blocks. For wiring and tests.
pub struct NoOpBlockIndex;

#[async_trait]
impl BlockIndex for NoOpBlockIndex {
    async fn blocks_on_node(&self, _node: &NodeId) -> Result<Vec<Block>, String> {
        Ok(Vec::new())
    }
}

/// A committer that accepts every mutation. For wiring and tests.
pub struct NoOpReplicaCommitter;

#[async_trait]
impl ReplicaCommitter for NoOpReplicaCommitter {
    async fn commit(&self, _block: BlockId, _node: &NodeId) -> Result<(), String> {
        Ok(())
    }

    async fn evict(&self, _block: BlockId, _node: &NodeId) -> Result<(), String> {
        Ok(())
    }
}

/// An in-memory block index and committer backed by a shared map.
///
/// Stands in for the metadata layer in tests and examples; the durable
/// implementation lives with the journal, outside this crate.
#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    blocks: DashMap<BlockId, Block>,
}

impl InMemoryBlockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a block record.
    pub fn put(&self, block: Block) {
        self.blocks.insert(block.id, block);
    }

    /// Returns a copy of the block record, if present.
    #[must_use]
    pub fn get(&self, block: BlockId) -> Option<Block> {
        self.blocks.get(&block).map(|entry| entry.clone())
    }
}

#[async_trait]
impl BlockIndex for InMemoryBlockStore {
    async fn blocks_on_node(&self, node: &NodeId) -> Result<Vec<Block>, String> {
        Ok(self
            .blocks
            .iter()
            .filter(|entry| entry.references(node))
            .map(|entry| entry.clone())
            .collect())
    }
}

#[async_trait]
impl ReplicaCommitter for InMemoryBlockStore {
    async fn commit(&self, block: BlockId, node: &NodeId) -> Result<(), String> {
        match self.blocks.get_mut(&block) {
            Some(mut entry) => {
                entry.locations.insert(node.clone());
                Ok(())
            }
            None => Err(format!("unknown block {block}")),
        }
    }

    async fn evict(&self, block: BlockId, node: &NodeId) -> Result<(), String> {
        match self.blocks.get_mut(&block) {
            Some(mut entry) => {
                entry.locations.remove(node);
                Ok(())
            }
            None => Err(format!("unknown block {block}")),
        }
    }
}
