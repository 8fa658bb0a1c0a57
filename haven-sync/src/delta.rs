//! Delta computation, encryption, and application.
//!
//! A delta carries one entity change to a peer. Payloads are AEAD
//! ciphertext over the entity's raw bytes with the entity's context
//! (space, type, id) as associated data, so ciphertext captured for one
//! entity cannot be replayed into another. Deletions travel as explicit
//! tombstone deltas with no payload.

use crate::clock::SpaceClock;
use crate::conflict::classify_conflict;
use crate::error::{SyncError, SyncResult};
use haven_crypto::{CryptoError, EncryptedPayload, SymmetricKey};
use haven_store::{ConflictRecord, EntityRecord, Store, SyncLogEntry};
use haven_types::{now_ms, ConflictId, DeviceId, EntityId, SpaceId, SyncOperation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// A single entity change packaged for transmission. Ephemeral:
/// constructed on demand, discarded after application and acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDelta {
    pub operation: SyncOperation,
    pub entity_type: String,
    pub entity_id: EntityId,
    /// Encrypted entity bytes; `None` only for deletions.
    pub payload: Option<EncryptedPayload>,
    /// SHA-256 hex of the plaintext (empty for deletions).
    pub content_hash: String,
    /// Origin device's per-entity sequence number.
    pub sequence: i64,
    pub origin_device_id: DeviceId,
    /// Unix milliseconds of the originating mutation.
    pub timestamp: i64,
}

/// Why a delta was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Already applied (sequence or content dedup hit).
    Duplicate,
    /// Ciphertext failed to decrypt or verify; the delta is corrupted.
    Corrupted,
}

/// Result of applying one delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Skipped(SkipReason),
    /// Divergent concurrent edit; recorded, not applied.
    Conflicted(ConflictId),
}

/// SHA-256 hex digest of entity content. Local writers use this when
/// storing payloads so delta hashes line up.
#[must_use]
pub fn content_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Converts local mutations into deltas and applies received ones.
#[derive(Clone)]
pub struct DeltaCodec {
    store: Store,
    local_device: DeviceId,
}

impl DeltaCodec {
    pub fn new(store: Store, local_device: DeviceId) -> Self {
        Self {
            store,
            local_device,
        }
    }

    /// Builds the outgoing delta set: every local entity changed after
    /// the peer's last known marker for this device, filtered by
    /// category when the peer asked for specific entity types.
    pub fn compute_deltas(
        &self,
        space_id: &SpaceId,
        peer_clock: &SpaceClock,
        categories: &[String],
        session_key: &SymmetricKey,
    ) -> SyncResult<Vec<SyncDelta>> {
        let marker = peer_clock.marker_for(&self.local_device);
        let changed = self.store.changed_since(space_id, marker)?;

        let mut deltas = Vec::with_capacity(changed.len());
        for record in changed {
            if !categories.is_empty() && !categories.contains(&record.entity_type) {
                continue;
            }
            deltas.push(self.delta_from_record(space_id, &record, session_key)?);
        }

        debug!(
            space = %space_id,
            marker,
            count = deltas.len(),
            "computed outgoing deltas"
        );
        Ok(deltas)
    }

    fn delta_from_record(
        &self,
        space_id: &SpaceId,
        record: &EntityRecord,
        session_key: &SymmetricKey,
    ) -> SyncResult<SyncDelta> {
        let operation = if record.deleted {
            SyncOperation::Delete
        } else if record.sequence == 1 {
            SyncOperation::Create
        } else {
            SyncOperation::Update
        };

        let payload = if record.deleted {
            None
        } else {
            let aad = context_aad(space_id, &record.entity_type, &record.entity_id);
            Some(haven_crypto::encrypt(session_key, &record.payload, &aad)?)
        };

        Ok(SyncDelta {
            operation,
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id,
            payload,
            content_hash: record.content_hash.clone(),
            sequence: record.sequence,
            origin_device_id: self.local_device,
            timestamp: record.modified_at,
        })
    }

    /// Applies one received delta.
    ///
    /// `agreed_marker` is the last point both devices are known to agree
    /// on (the peer's entry in our derived clock). Duplicates are
    /// skipped, corrupted payloads are skipped and logged, divergent
    /// concurrent edits are recorded as conflicts, and a clean apply
    /// commits the entity write and the sync log row atomically.
    pub fn apply_delta(
        &self,
        space_id: &SpaceId,
        delta: &SyncDelta,
        session_key: &SymmetricKey,
        agreed_marker: i64,
    ) -> SyncResult<ApplyOutcome> {
        // Sequence dedup: the log's unique index is the ground truth.
        if self
            .store
            .already_applied(&delta.entity_id, delta.sequence, &delta.origin_device_id)?
        {
            debug!(entity = %delta.entity_id, sequence = delta.sequence, "duplicate delta (sequence)");
            return Ok(ApplyOutcome::Skipped(SkipReason::Duplicate));
        }
        // Content dedup catches re-sent deltas renumbered in transit.
        if !delta.content_hash.is_empty()
            && self.store.already_applied_content(
                &delta.entity_id,
                &delta.origin_device_id,
                &delta.content_hash,
            )?
        {
            debug!(entity = %delta.entity_id, "duplicate delta (content)");
            return Ok(ApplyOutcome::Skipped(SkipReason::Duplicate));
        }

        let plaintext = match self.decrypt_payload(space_id, delta, session_key) {
            Ok(bytes) => bytes,
            Err(SyncError::Decryption(reason)) => {
                warn!(
                    entity = %delta.entity_id,
                    origin = %delta.origin_device_id,
                    %reason,
                    "skipping corrupted delta"
                );
                return Ok(ApplyOutcome::Skipped(SkipReason::Corrupted));
            }
            Err(e) => return Err(e),
        };

        let local = self.store.get_entity(space_id, &delta.entity_id)?;

        if let Some(local) = &local {
            let same_state = local.content_hash == delta.content_hash
                && local.deleted == (delta.operation == SyncOperation::Delete);
            if same_state {
                // Both sides already hold this state (echo of our own
                // change, or convergent edit). Nothing to do.
                return Ok(ApplyOutcome::Skipped(SkipReason::Duplicate));
            }

            let diverged = local.modified_at > agreed_marker && delta.timestamp > agreed_marker;
            if diverged {
                let conflict_id = self.record_conflict(space_id, local, delta, &plaintext)?;
                return Ok(ApplyOutcome::Conflicted(conflict_id));
            }
        }

        let record = EntityRecord {
            entity_id: delta.entity_id,
            space_id: *space_id,
            entity_type: delta.entity_type.clone(),
            payload: plaintext,
            content_hash: delta.content_hash.clone(),
            sequence: delta.sequence,
            modified_at: delta.timestamp,
            deleted: delta.operation == SyncOperation::Delete,
        };
        let log = SyncLogEntry {
            space_id: *space_id,
            entity_type: delta.entity_type.clone(),
            entity_id: delta.entity_id,
            device_id: delta.origin_device_id,
            operation: delta.operation,
            sequence: delta.sequence,
            content_hash: delta.content_hash.clone(),
            synced_at: now_ms(),
        };
        self.store.apply_remote(&record, &log)?;

        debug!(
            entity = %delta.entity_id,
            operation = %delta.operation,
            sequence = delta.sequence,
            "applied delta"
        );
        Ok(ApplyOutcome::Applied)
    }

    /// Decrypts and verifies a delta's payload. Returns empty bytes for
    /// a tombstone.
    fn decrypt_payload(
        &self,
        space_id: &SpaceId,
        delta: &SyncDelta,
        session_key: &SymmetricKey,
    ) -> SyncResult<Vec<u8>> {
        let Some(encrypted) = &delta.payload else {
            if delta.operation == SyncOperation::Delete {
                return Ok(Vec::new());
            }
            return Err(SyncError::Decryption(format!(
                "{} delta without payload",
                delta.operation
            )));
        };

        let aad = context_aad(space_id, &delta.entity_type, &delta.entity_id);
        let plaintext = haven_crypto::decrypt(session_key, encrypted, &aad).map_err(|e| {
            match e {
                CryptoError::Decryption(msg) => SyncError::Decryption(msg),
                other => SyncError::Crypto(other),
            }
        })?;

        if content_hash(&plaintext) != delta.content_hash {
            return Err(SyncError::Decryption("content hash mismatch".to_string()));
        }
        Ok(plaintext)
    }

    fn record_conflict(
        &self,
        space_id: &SpaceId,
        local: &EntityRecord,
        delta: &SyncDelta,
        remote_plaintext: &[u8],
    ) -> SyncResult<ConflictId> {
        let conflict = ConflictRecord {
            id: ConflictId::new(),
            space_id: *space_id,
            entity_type: delta.entity_type.clone(),
            entity_id: delta.entity_id,
            local_snapshot: local.payload.clone(),
            remote_snapshot: remote_plaintext.to_vec(),
            conflict_type: classify_conflict(local, delta),
            remote_device_id: delta.origin_device_id,
            remote_operation: delta.operation,
            remote_sequence: delta.sequence,
            remote_timestamp: delta.timestamp,
            detected_at: now_ms(),
            resolved: false,
            resolution: None,
        };
        self.store.insert_conflict(&conflict)?;
        warn!(
            entity = %delta.entity_id,
            conflict = %conflict.id,
            conflict_type = %conflict.conflict_type,
            "concurrent edit detected, recorded conflict"
        );
        Ok(conflict.id)
    }
}

/// Associated data binding a ciphertext to its context.
fn context_aad(space_id: &SpaceId, entity_type: &str, entity_id: &EntityId) -> Vec<u8> {
    format!("{space_id}|{entity_type}|{entity_id}").into_bytes()
}
