//! Sync history ledger.
//!
//! Append-only: one row per session attempt, success or failure. Feeds
//! the derived vector clock (via `sync_markers`) and the audit surface.

use crate::error::StoreResult;
use crate::Store;
use haven_types::{DeviceId, SpaceId};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

/// One recorded sync attempt.
#[derive(Debug, Clone)]
pub struct SyncHistoryEntry {
    pub id: String,
    pub space_id: SpaceId,
    pub device_id: DeviceId,
    pub direction: String,
    pub entities_pushed: u32,
    pub entities_pulled: u32,
    pub conflicts_detected: u32,
    pub started_at: i64,
    pub completed_at: i64,
    pub success: bool,
    pub error: Option<String>,
}

impl SyncHistoryEntry {
    /// Builds an entry with a fresh id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        space_id: SpaceId,
        device_id: DeviceId,
        direction: impl Into<String>,
        started_at: i64,
        completed_at: i64,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            space_id,
            device_id,
            direction: direction.into(),
            entities_pushed: 0,
            entities_pulled: 0,
            conflicts_detected: 0,
            started_at,
            completed_at,
            success: true,
            error: None,
        }
    }
}

/// Aggregate statistics over a space's sync history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    pub total_syncs: u32,
    pub total_entities: u32,
    pub conflicts_total: u32,
    pub success_rate: f64,
    pub last_sync_at: Option<i64>,
}

impl Store {
    /// Appends a history entry. Entries are never updated or deleted.
    pub fn record_sync(&self, entry: &SyncHistoryEntry) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_history
                 (id, space_id, device_id, direction, entities_pushed, entities_pulled,
                  conflicts_detected, started_at, completed_at, success, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.id,
                entry.space_id.to_string(),
                entry.device_id.to_string(),
                entry.direction,
                entry.entities_pushed,
                entry.entities_pulled,
                entry.conflicts_detected,
                entry.started_at,
                entry.completed_at,
                entry.success as i64,
                entry.error,
            ],
        )?;
        Ok(())
    }

    /// Recent history for a space, newest first.
    pub fn history_for_space(
        &self,
        space_id: &SpaceId,
        limit: usize,
    ) -> StoreResult<Vec<SyncHistoryEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, space_id, device_id, direction, entities_pushed, entities_pulled,
                    conflicts_detected, started_at, completed_at, success, error_message
             FROM sync_history
             WHERE space_id = ?1
             ORDER BY completed_at DESC
             LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![space_id.to_string(), limit as i64], history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Completion time of the last successful sync with a device, if any.
    pub fn last_successful_sync(
        &self,
        space_id: &SpaceId,
        device_id: &DeviceId,
    ) -> StoreResult<Option<i64>> {
        let conn = self.lock();
        let marker: Option<Option<i64>> = conn
            .query_row(
                "SELECT MAX(completed_at) FROM sync_history
                 WHERE space_id = ?1 AND device_id = ?2 AND success = 1",
                params![space_id.to_string(), device_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(marker.flatten())
    }

    /// Aggregate statistics for a space.
    pub fn sync_stats(&self, space_id: &SpaceId) -> StoreResult<SyncStats> {
        let conn = self.lock();
        let stats = conn.query_row(
            "SELECT
                 COUNT(*),
                 MAX(completed_at),
                 COALESCE(SUM(success), 0),
                 COALESCE(SUM(conflicts_detected), 0),
                 COALESCE(SUM(entities_pushed + entities_pulled), 0)
             FROM sync_history
             WHERE space_id = ?1",
            params![space_id.to_string()],
            |row| {
                let total_syncs: i64 = row.get(0)?;
                let last_sync_at: Option<i64> = row.get(1)?;
                let success_count: i64 = row.get(2)?;
                let conflicts_total: i64 = row.get(3)?;
                let total_entities: i64 = row.get(4)?;

                let success_rate = if total_syncs > 0 {
                    success_count as f64 / total_syncs as f64
                } else {
                    0.0
                };

                Ok(SyncStats {
                    total_syncs: total_syncs as u32,
                    total_entities: total_entities as u32,
                    conflicts_total: conflicts_total as u32,
                    success_rate,
                    last_sync_at,
                })
            },
        )?;
        Ok(stats)
    }
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<SyncHistoryEntry> {
    let space_str: String = row.get(1)?;
    let device_str: String = row.get(2)?;
    let to_sql_err = |e: uuid::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(SyncHistoryEntry {
        id: row.get(0)?,
        space_id: space_str.parse().map_err(to_sql_err)?,
        device_id: device_str.parse().map_err(to_sql_err)?,
        direction: row.get(3)?,
        entities_pushed: row.get::<_, i64>(4)? as u32,
        entities_pulled: row.get::<_, i64>(5)? as u32,
        conflicts_detected: row.get::<_, i64>(6)? as u32,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        success: row.get::<_, i64>(9)? == 1,
        error: row.get(10)?,
    })
}
