//! Session-level sync history.
//!
//! Thin facade over the store's append-only history table. Sessions
//! record an entry on every outcome, success or failure, so the audit
//! trail never has gaps a failed session could hide in.

use crate::error::SyncResult;
use haven_store::{Store, SyncHistoryEntry, SyncStats};
use haven_types::{DeviceId, SpaceId};
use tracing::debug;

/// Append-only record of sync attempts.
#[derive(Clone)]
pub struct SyncHistoryLedger {
    store: Store,
}

impl SyncHistoryLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Appends one entry. Existing entries are never touched.
    pub fn record(&self, entry: &SyncHistoryEntry) -> SyncResult<()> {
        self.store.record_sync(entry)?;
        debug!(
            space = %entry.space_id,
            peer = %entry.device_id,
            success = entry.success,
            pushed = entry.entities_pushed,
            pulled = entry.entities_pulled,
            "recorded sync attempt"
        );
        Ok(())
    }

    /// Recent attempts for a space, newest first.
    pub fn entries_for_space(
        &self,
        space_id: &SpaceId,
        limit: usize,
    ) -> SyncResult<Vec<SyncHistoryEntry>> {
        Ok(self.store.history_for_space(space_id, limit)?)
    }

    /// Completion time of the last successful sync with a peer.
    pub fn last_successful_sync(
        &self,
        space_id: &SpaceId,
        device_id: &DeviceId,
    ) -> SyncResult<Option<i64>> {
        Ok(self.store.last_successful_sync(space_id, device_id)?)
    }

    /// Aggregate statistics for a space.
    pub fn stats(&self, space_id: &SpaceId) -> SyncResult<SyncStats> {
        Ok(self.store.sync_stats(space_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_recorded_alongside_successes() {
        let ledger = SyncHistoryLedger::new(Store::open_in_memory().unwrap());
        let space = SpaceId::new();
        let peer = DeviceId::new();

        ledger
            .record(&SyncHistoryEntry::new(space, peer, "bidirectional", 10, 20))
            .unwrap();
        let mut failed = SyncHistoryEntry::new(space, peer, "bidirectional", 30, 40);
        failed.success = false;
        failed.error = Some("peer went away".into());
        ledger.record(&failed).unwrap();

        let entries = ledger.entries_for_space(&space, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].success);
        assert_eq!(ledger.last_successful_sync(&space, &peer).unwrap(), Some(20));
        assert_eq!(ledger.stats(&space).unwrap().total_syncs, 2);
    }
}
