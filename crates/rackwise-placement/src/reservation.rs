//! In-flight placement reservations, used as a tie-break signal.
//!
//! Between choosing targets and committing them, a caller may hold a
//! [`ReservationGuard`] per chosen rack. Concurrent `choose` calls see the
//! in-flight counts and steer away from racks with pending placements,
//! which avoids hot-rack bias under concurrent load. Reservations are
//! advisory only; they never make a rack ineligible.

use std::sync::Arc;

use dashmap::DashMap;

use rackwise_core::RackId;

/// Tracks how many chosen-but-uncommitted placements target each rack.
#[derive(Debug, Default)]
pub struct ReservationTracker {
    counts: DashMap<RackId, usize>,
}

impl ReservationTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of in-flight placements for the given rack.
    #[must_use]
    pub fn in_flight(&self, rack: &RackId) -> usize {
        self.counts.get(rack).map(|count| *count).unwrap_or(0)
    }

    /// Reserves one in-flight slot on the given rack.
    ///
    /// The reservation is released when the returned guard is dropped.
    #[must_use]
    pub fn reserve(self: &Arc<Self>, rack: RackId) -> ReservationGuard {
        *self.counts.entry(rack.clone()).or_insert(0) += 1;
        ReservationGuard { tracker: Arc::clone(self), rack }
    }
}

/// RAII guard for a single in-flight placement reservation.
#[derive(Debug)]
pub struct ReservationGuard {
    tracker: Arc<ReservationTracker>,
    rack: RackId,
}

impl ReservationGuard {
    /// The rack this reservation targets.
    #[must_use]
    pub fn rack(&self) -> &RackId {
        &self.rack
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if let Some(mut entry) = self.tracker.counts.get_mut(&self.rack) {
            *entry = entry.saturating_sub(1);
        }
    }
}
