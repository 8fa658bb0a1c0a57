//! Delta batching for transmission.
//!
//! Outgoing delta sets are split by item count and cumulative serialized
//! size, whichever bound is hit first. Batches are numbered 1-based with
//! a declared total so the receiver can detect an incomplete transfer.
//! The receiving side buffers batches and releases deltas for
//! application only once every declared batch has arrived; a missing,
//! duplicated, or renumbered batch aborts the session instead of
//! partially merging.

use crate::delta::SyncDelta;
use crate::error::{SyncError, SyncResult};
use tracing::debug;

/// Default maximum items per batch.
pub const DEFAULT_BATCH_ITEMS: usize = 500;

/// Default maximum serialized bytes per batch (~1 MB).
pub const DEFAULT_BATCH_BYTES: usize = 1024 * 1024;

/// Splits delta sets into transmission-sized chunks.
#[derive(Debug, Clone, Copy)]
pub struct BatchProcessor {
    pub max_items: usize,
    pub max_bytes: usize,
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_BATCH_ITEMS,
            max_bytes: DEFAULT_BATCH_BYTES,
        }
    }
}

impl BatchProcessor {
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            max_items: max_items.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    /// Splits deltas into batches. Every batch holds at least one delta,
    /// so a single oversized delta still travels (alone).
    pub fn split(&self, deltas: Vec<SyncDelta>) -> Vec<Vec<SyncDelta>> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut current_bytes = 0usize;

        for delta in deltas {
            let estimated = serde_json::to_vec(&delta).map(|v| v.len()).unwrap_or(1024);

            let full = current.len() >= self.max_items
                || (current_bytes + estimated > self.max_bytes && !current.is_empty());
            if full {
                batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }

            current.push(delta);
            current_bytes += estimated;
        }

        if !current.is_empty() {
            batches.push(current);
        }

        debug!(batches = batches.len(), "split outgoing deltas");
        batches
    }
}

/// Receiver-side batch tracking.
#[derive(Debug, Default)]
pub struct BatchAssembler {
    declared_total: Option<u32>,
    received: Vec<Option<Vec<SyncDelta>>>,
}

impl BatchAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one batch, validating its numbering against what has been
    /// seen so far.
    pub fn accept(
        &mut self,
        batch_number: u32,
        total_batches: u32,
        deltas: Vec<SyncDelta>,
    ) -> SyncResult<()> {
        if total_batches == 0 {
            return Err(SyncError::Protocol("declared total of 0 batches".into()));
        }
        match self.declared_total {
            None => {
                self.declared_total = Some(total_batches);
                self.received = vec![None; total_batches as usize];
            }
            Some(total) if total != total_batches => {
                return Err(SyncError::Protocol(format!(
                    "declared batch total changed from {total} to {total_batches}"
                )));
            }
            Some(_) => {}
        }

        if batch_number == 0 || batch_number > total_batches {
            return Err(SyncError::Protocol(format!(
                "batch number {batch_number} out of range 1..={total_batches}"
            )));
        }
        let slot = &mut self.received[(batch_number - 1) as usize];
        if slot.is_some() {
            return Err(SyncError::Protocol(format!(
                "batch {batch_number} received twice"
            )));
        }
        *slot = Some(deltas);
        Ok(())
    }

    /// True once every declared batch has arrived. False while nothing
    /// has been declared yet.
    pub fn is_complete(&self) -> bool {
        self.declared_total.is_some() && self.received.iter().all(Option::is_some)
    }

    /// Batch numbers still outstanding.
    pub fn missing(&self) -> Vec<u32> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u32 + 1)
            .collect()
    }

    /// Releases all deltas in batch order. Fails if any batch is
    /// missing; nothing from an incomplete transfer is ever released.
    pub fn into_deltas(self) -> SyncResult<Vec<SyncDelta>> {
        if !self.is_complete() {
            return Err(SyncError::Protocol(format!(
                "incomplete transfer, missing batches {:?}",
                self.missing()
            )));
        }
        Ok(self.received.into_iter().flatten().flatten().collect())
    }

    /// Whether any batch has been declared at all. An empty transfer
    /// (zero deltas) sends no batches.
    pub fn started(&self) -> bool {
        self.declared_total.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::{DeviceId, EntityId, SyncOperation};

    fn make_delta(padding: usize) -> SyncDelta {
        SyncDelta {
            operation: SyncOperation::Delete,
            entity_type: "note".into(),
            entity_id: EntityId::new(),
            payload: None,
            content_hash: "0".repeat(padding),
            sequence: 1,
            origin_device_id: DeviceId::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn splits_on_item_count() {
        let processor = BatchProcessor::new(2, usize::MAX);
        let batches = processor.split((0..5).map(|_| make_delta(0)).collect());
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn splits_on_byte_bound() {
        let processor = BatchProcessor::new(usize::MAX, 1500);
        // Each delta serializes to roughly a kilobyte.
        let batches = processor.split((0..4).map(|_| make_delta(800)).collect());
        assert_eq!(batches.len(), 4);
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(BatchProcessor::default().split(Vec::new()).is_empty());
    }

    #[test]
    fn assembler_requires_every_batch() {
        let mut assembler = BatchAssembler::new();
        assembler.accept(1, 3, vec![make_delta(0)]).unwrap();
        assembler.accept(3, 3, vec![make_delta(0)]).unwrap();

        assert!(!assembler.is_complete());
        assert_eq!(assembler.missing(), vec![2]);
        assert!(assembler.into_deltas().is_err());
    }

    #[test]
    fn assembler_orders_out_of_order_batches() {
        let mut assembler = BatchAssembler::new();
        let first = make_delta(1);
        let second = make_delta(2);
        assembler.accept(2, 2, vec![second.clone()]).unwrap();
        assembler.accept(1, 2, vec![first.clone()]).unwrap();

        let deltas = assembler.into_deltas().unwrap();
        assert_eq!(deltas, vec![first, second]);
    }

    proptest::proptest! {
        #[test]
        fn split_preserves_every_delta_in_order(
            count in 0usize..40,
            max_items in 1usize..10,
        ) {
            let deltas: Vec<SyncDelta> = (0..count).map(|_| make_delta(8)).collect();
            let batches = BatchProcessor::new(max_items, usize::MAX).split(deltas.clone());
            proptest::prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= max_items));
            let flat: Vec<SyncDelta> = batches.into_iter().flatten().collect();
            proptest::prop_assert_eq!(flat, deltas);
        }
    }

    #[test]
    fn assembler_rejects_bad_numbering() {
        let mut assembler = BatchAssembler::new();
        assembler.accept(1, 2, Vec::new()).unwrap();

        assert!(matches!(
            BatchAssembler::new().accept(0, 2, Vec::new()),
            Err(SyncError::Protocol(_))
        ));
        assert!(matches!(
            assembler.accept(3, 2, Vec::new()),
            Err(SyncError::Protocol(_))
        ));
        assert!(matches!(
            assembler.accept(1, 2, Vec::new()),
            Err(SyncError::Protocol(_))
        ));
        assert!(matches!(
            assembler.accept(2, 5, Vec::new()),
            Err(SyncError::Protocol(_))
        ));
    }
}
