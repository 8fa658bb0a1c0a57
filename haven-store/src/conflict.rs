//! Conflict persistence and transactional resolution.
//!
//! A conflict row is written the moment divergent concurrent state is
//! detected, before any resolution runs. Rows are only ever closed by
//! being marked resolved; nothing deletes them.

use crate::error::{StoreError, StoreResult};
use crate::sync_log::{insert_log_row, SyncLogEntry};
use crate::Store;
use haven_types::{ConflictId, ConflictType, DeviceId, EntityId, SpaceId, SyncOperation};
use rusqlite::{params, OptionalExtension, Row};

/// A detected conflict with both full snapshots, so resolution can run
/// immediately or be deferred indefinitely.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub space_id: SpaceId,
    pub entity_type: String,
    pub entity_id: EntityId,
    /// Local entity payload at detection time.
    pub local_snapshot: Vec<u8>,
    /// Decrypted remote payload (empty for a remote deletion).
    pub remote_snapshot: Vec<u8>,
    pub conflict_type: ConflictType,
    pub remote_device_id: DeviceId,
    pub remote_operation: SyncOperation,
    pub remote_sequence: i64,
    pub remote_timestamp: i64,
    pub detected_at: i64,
    pub resolved: bool,
    pub resolution: Option<String>,
}

/// What resolution writes to the entity table.
#[derive(Debug, Clone)]
pub enum ConflictOutcome {
    /// Local state stands; nothing is written to the entity.
    KeepLocal,
    /// The stored remote snapshot replaces local state
    /// (or tombstones it, for a remote deletion).
    WriteRemote { tombstone: bool },
    /// A merged payload replaces local state.
    WriteMerged {
        payload: Vec<u8>,
        content_hash: String,
    },
}

impl Store {
    /// Records a freshly detected conflict.
    pub fn insert_conflict(&self, conflict: &ConflictRecord) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_conflict
                 (id, space_id, entity_type, entity_id, local_snapshot, remote_snapshot,
                  conflict_type, remote_device_id, remote_operation, remote_sequence,
                  remote_timestamp, detected_at, resolved, resolution)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, NULL)",
            params![
                conflict.id.to_string(),
                conflict.space_id.to_string(),
                conflict.entity_type,
                conflict.entity_id.to_string(),
                conflict.local_snapshot,
                conflict.remote_snapshot,
                conflict.conflict_type.as_str(),
                conflict.remote_device_id.to_string(),
                conflict.remote_operation.as_str(),
                conflict.remote_sequence,
                conflict.remote_timestamp,
                conflict.detected_at,
            ],
        )?;
        Ok(())
    }

    /// Looks up a conflict by id.
    pub fn get_conflict(&self, id: &ConflictId) -> StoreResult<Option<ConflictRecord>> {
        let conn = self.lock();
        conn.query_row(
            &format!("{CONFLICT_SELECT} WHERE id = ?1"),
            params![id.to_string()],
            conflict_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Open conflicts for a space, oldest first.
    pub fn unresolved_conflicts(&self, space_id: &SpaceId) -> StoreResult<Vec<ConflictRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{CONFLICT_SELECT} WHERE space_id = ?1 AND resolved = 0 ORDER BY detected_at ASC"
        ))?;
        let conflicts = stmt
            .query_map(params![space_id.to_string()], conflict_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conflicts)
    }

    /// Resolves a conflict transactionally: the entity write (if any),
    /// the resolved flag, and the sync log row commit together or not at
    /// all. Fails if the conflict is unknown or already resolved.
    pub fn resolve_conflict(
        &self,
        id: &ConflictId,
        resolution: &str,
        outcome: ConflictOutcome,
        log: &SyncLogEntry,
        now: i64,
    ) -> StoreResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let conflict = tx
            .query_row(
                &format!("{CONFLICT_SELECT} WHERE id = ?1"),
                params![id.to_string()],
                conflict_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("conflict {id}")))?;
        if conflict.resolved {
            return Err(StoreError::Constraint(format!(
                "conflict {id} already resolved"
            )));
        }

        match outcome {
            ConflictOutcome::KeepLocal => {}
            ConflictOutcome::WriteRemote { tombstone } => {
                write_entity(
                    &tx,
                    &conflict,
                    if tombstone { &[] } else { &conflict.remote_snapshot },
                    &log.content_hash,
                    log.sequence,
                    now,
                    tombstone,
                )?;
            }
            ConflictOutcome::WriteMerged {
                payload,
                content_hash,
            } => {
                write_entity(&tx, &conflict, &payload, &content_hash, log.sequence, now, false)?;
            }
        }

        tx.execute(
            "UPDATE sync_conflict SET resolved = 1, resolved_at = ?2, resolution = ?3
             WHERE id = ?1",
            params![id.to_string(), now, resolution],
        )?;
        insert_log_row(&tx, log)?;
        tx.commit()?;
        Ok(())
    }
}

const CONFLICT_SELECT: &str = "SELECT id, space_id, entity_type, entity_id, local_snapshot,
    remote_snapshot, conflict_type, remote_device_id, remote_operation, remote_sequence,
    remote_timestamp, detected_at, resolved, resolution FROM sync_conflict";

fn write_entity(
    conn: &rusqlite::Connection,
    conflict: &ConflictRecord,
    payload: &[u8],
    content_hash: &str,
    sequence: i64,
    modified_at: i64,
    deleted: bool,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO entities
             (entity_id, space_id, entity_type, payload, content_hash, sequence, modified_at, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(space_id, entity_id) DO UPDATE SET
             payload = excluded.payload,
             content_hash = excluded.content_hash,
             sequence = excluded.sequence,
             modified_at = excluded.modified_at,
             deleted = excluded.deleted",
        params![
            conflict.entity_id.to_string(),
            conflict.space_id.to_string(),
            conflict.entity_type,
            payload,
            content_hash,
            sequence,
            modified_at,
            deleted as i64,
        ],
    )?;
    Ok(())
}

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<ConflictRecord> {
    let to_sql_err = |e: uuid::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };
    let id_str: String = row.get(0)?;
    let space_str: String = row.get(1)?;
    let entity_str: String = row.get(3)?;
    let type_str: String = row.get(6)?;
    let device_str: String = row.get(7)?;
    let op_str: String = row.get(8)?;
    Ok(ConflictRecord {
        id: id_str.parse().map_err(to_sql_err)?,
        space_id: space_str.parse().map_err(to_sql_err)?,
        entity_type: row.get(2)?,
        entity_id: entity_str.parse().map_err(to_sql_err)?,
        local_snapshot: row.get(4)?,
        remote_snapshot: row.get(5)?,
        conflict_type: ConflictType::parse(&type_str).unwrap_or(ConflictType::UpdateUpdate),
        remote_device_id: device_str.parse().map_err(to_sql_err)?,
        remote_operation: SyncOperation::parse(&op_str).unwrap_or(SyncOperation::Update),
        remote_sequence: row.get(9)?,
        remote_timestamp: row.get(10)?,
        detected_at: row.get(11)?,
        resolved: row.get::<_, i64>(12)? == 1,
        resolution: row.get(13)?,
    })
}
