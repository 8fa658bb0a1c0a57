//! Derived vector clocks.
//!
//! "What has each peer already seen" per space, computed from the
//! append-only entity sync log and sync history instead of being stored
//! as an independently mutated counter. A counter can drift away from
//! the log it is supposed to summarize; a derivation cannot.

use haven_store::Store;
use haven_types::{DeviceId, SpaceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::SyncResult;

/// Per-device last-synchronized markers for one space.
///
/// Markers are unix-millisecond positions; a device absent from the map
/// is at marker 0 (never synchronized).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceClock {
    markers: HashMap<DeviceId, i64>,
}

impl SpaceClock {
    /// An empty clock (nothing seen from anyone).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The marker for a device, 0 if never seen.
    #[must_use]
    pub fn marker_for(&self, device_id: &DeviceId) -> i64 {
        self.markers.get(device_id).copied().unwrap_or(0)
    }

    /// Records a marker for a device. A marker older than the stored one
    /// never regresses the clock.
    pub fn observe(&mut self, device_id: DeviceId, marker: i64) {
        let entry = self.markers.entry(device_id).or_insert(0);
        if marker > *entry {
            *entry = marker;
        }
    }

    /// Pointwise-max merge with another clock.
    pub fn merge(&mut self, other: &SpaceClock) {
        for (device_id, marker) in &other.markers {
            self.observe(*device_id, *marker);
        }
    }

    /// True if every marker in `other` is covered by this clock.
    #[must_use]
    pub fn dominates(&self, other: &SpaceClock) -> bool {
        other
            .markers
            .iter()
            .all(|(device_id, marker)| self.marker_for(device_id) >= *marker)
    }

    /// Number of devices with a recorded marker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// True if no device has ever been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Iterates over (device, marker) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &i64)> {
        self.markers.iter()
    }
}

impl FromIterator<(DeviceId, i64)> for SpaceClock {
    fn from_iter<T: IntoIterator<Item = (DeviceId, i64)>>(iter: T) -> Self {
        let mut clock = Self::new();
        for (device_id, marker) in iter {
            clock.observe(device_id, marker);
        }
        clock
    }
}

/// Derives space clocks from the store on demand.
#[derive(Clone)]
pub struct VectorClockStore {
    store: Store,
}

impl VectorClockStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Recomputes the clock for a space from the log. Never cached; the
    /// log is the single source of truth.
    pub fn get_vector_clock(&self, space_id: &SpaceId) -> SyncResult<SpaceClock> {
        let markers = self.store.sync_markers(space_id)?;
        Ok(markers.into_iter().collect())
    }
}
