//! Entity sync log.
//!
//! One append-only row per applied remote change. The unique index on
//! `(entity_id, sequence, device_id)` is what makes delta application
//! at-most-once; the per-device maximum `synced_at` is what vector
//! clocks are derived from.

use crate::error::StoreResult;
use crate::Store;
use haven_types::{DeviceId, EntityId, SpaceId, SyncOperation};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// A single applied-change record.
#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    pub space_id: SpaceId,
    pub entity_type: String,
    pub entity_id: EntityId,
    /// The device the change originated from.
    pub device_id: DeviceId,
    pub operation: SyncOperation,
    /// The origin device's per-entity sequence number.
    pub sequence: i64,
    pub content_hash: String,
    /// Unix milliseconds at which the change was applied locally.
    pub synced_at: i64,
}

impl Store {
    /// Whether a delta with this `(entity_id, sequence, device_id)` has
    /// already been applied.
    pub fn already_applied(
        &self,
        entity_id: &EntityId,
        sequence: i64,
        device_id: &DeviceId,
    ) -> StoreResult<bool> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_sync_log
             WHERE entity_id = ?1 AND sequence = ?2 AND device_id = ?3",
            params![entity_id.to_string(), sequence, device_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether identical content from this device has already been
    /// applied to the entity, regardless of sequence number. Catches
    /// re-sent deltas that were renumbered in transit.
    pub fn already_applied_content(
        &self,
        entity_id: &EntityId,
        device_id: &DeviceId,
        content_hash: &str,
    ) -> StoreResult<bool> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_sync_log
             WHERE entity_id = ?1 AND device_id = ?2 AND content_hash = ?3",
            params![entity_id.to_string(), device_id.to_string(), content_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Number of log rows for an entity (test and audit surface).
    pub fn sync_log_count(&self, entity_id: &EntityId) -> StoreResult<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_sync_log WHERE entity_id = ?1",
            params![entity_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Per-device maximum synced-at marker for a space, combining the
    /// entity sync log with successful sync history. This is the raw
    /// material for the derived vector clock.
    pub fn sync_markers(&self, space_id: &SpaceId) -> StoreResult<Vec<(DeviceId, i64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT device_id, MAX(marker) FROM (
                 SELECT device_id, MAX(synced_at) AS marker
                 FROM entity_sync_log WHERE space_id = ?1 GROUP BY device_id
                 UNION ALL
                 SELECT device_id, MAX(completed_at) AS marker
                 FROM sync_history WHERE space_id = ?1 AND success = 1 GROUP BY device_id
             ) GROUP BY device_id",
        )?;
        let rows = stmt.query_map(params![space_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let marker: i64 = row.get(1)?;
            Ok((id, marker))
        })?;

        let mut markers = Vec::new();
        for row in rows {
            let (id_str, marker) = row?;
            let device_id = id_str.parse().map_err(|e| {
                crate::StoreError::InvalidRow(format!("device_id in sync log: {e}"))
            })?;
            markers.push((device_id, marker));
        }
        Ok(markers)
    }
}

/// Inserts a log row inside an open transaction. Fails on the unique
/// `(entity_id, sequence, device_id)` index if the delta was applied
/// before, which aborts the enclosing transaction.
pub(crate) fn insert_log_row(conn: &Connection, entry: &SyncLogEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO entity_sync_log
             (id, space_id, entity_type, entity_id, device_id, operation, sequence, content_hash, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            Uuid::now_v7().to_string(),
            entry.space_id.to_string(),
            entry.entity_type,
            entry.entity_id.to_string(),
            entry.device_id.to_string(),
            entry.operation.as_str(),
            entry.sequence,
            entry.content_hash,
            entry.synced_at,
        ],
    )?;
    Ok(())
}
