//! Hybrid Logical Clock implementation for causal ordering.
//!
//! Combines physical time with a logical counter to ensure:
//! - Monotonicity (always increasing)
//! - Causality (if A happens-before B, then ts(A) < ts(B))
//! - Bounded drift from physical time
//!
//! The sync engine itself keys its markers on plain `now_ms()`
//! milliseconds; [`HybridTimestamp`] is offered to the entity modules
//! (notes, tasks, calendar) that stamp `modified_at` before handing
//! changes to sync, where same-millisecond edits on one device must
//! still order causally.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall time as Unix milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as i64
}

/// A Hybrid Logical Clock timestamp.
///
/// Consists of:
/// - `wall_time`: Milliseconds since Unix epoch (physical component)
/// - `logical`: Logical counter for events at the same wall time
///
/// Based on the HLC algorithm from "Logical Physical Clocks" (Kulkarni et al.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    /// Physical time component (milliseconds since Unix epoch).
    wall_time: u64,
    /// Logical counter for ordering events at the same wall time.
    logical: u32,
}

impl HybridTimestamp {
    /// Creates a new timestamp at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: now_ms() as u64,
            logical: 0,
        }
    }

    /// Creates a timestamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Generates the next timestamp, ensuring monotonicity.
    ///
    /// This should be called when stamping a new local change.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = now_ms() as u64;

        if now > self.wall_time {
            Self {
                wall_time: now,
                logical: 0,
            }
        } else {
            Self {
                wall_time: self.wall_time,
                logical: self.logical.saturating_add(1),
            }
        }
    }

    /// Updates this clock based on a received timestamp.
    ///
    /// Ensures the resulting timestamp is greater than both the current
    /// clock and the received timestamp.
    #[must_use]
    pub fn receive(&self, other: &Self) -> Self {
        let now = now_ms() as u64;
        let max_wall = now.max(self.wall_time).max(other.wall_time);

        let logical = if max_wall == self.wall_time && max_wall == other.wall_time {
            self.logical.max(other.logical).saturating_add(1)
        } else if max_wall == self.wall_time {
            self.logical.saturating_add(1)
        } else if max_wall == other.wall_time {
            other.logical.saturating_add(1)
        } else {
            0
        };

        Self {
            wall_time: max_wall,
            logical,
        }
    }
}

impl Default for HybridTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.wall_time.cmp(&other.wall_time) {
            Ordering::Equal => self.logical.cmp(&other.logical),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_strictly_monotonic() {
        let mut ts = HybridTimestamp::now();
        for _ in 0..100 {
            let next = ts.tick();
            assert!(next > ts);
            ts = next;
        }
    }

    #[test]
    fn receive_exceeds_both_inputs() {
        let local = HybridTimestamp::new(u64::MAX - 10, 3);
        let remote = HybridTimestamp::new(u64::MAX - 10, 7);
        let merged = local.receive(&remote);
        assert!(merged > local);
        assert!(merged > remote);
    }

    #[test]
    fn ordering_is_wall_then_logical() {
        assert!(HybridTimestamp::new(5, 0) < HybridTimestamp::new(6, 0));
        assert!(HybridTimestamp::new(5, 1) < HybridTimestamp::new(5, 2));
    }

    proptest::proptest! {
        #[test]
        fn receive_dominates_arbitrary_inputs(
            local_wall in 0u64..(1u64 << 62),
            local_logical in 0u32..1_000_000,
            remote_wall in 0u64..(1u64 << 62),
            remote_logical in 0u32..1_000_000,
        ) {
            let local = HybridTimestamp::new(local_wall, local_logical);
            let remote = HybridTimestamp::new(remote_wall, remote_logical);
            let merged = local.receive(&remote);
            proptest::prop_assert!(merged > local);
            proptest::prop_assert!(merged > remote);
        }
    }
}
