//! Table definitions.

use crate::error::StoreResult;
use rusqlite::Connection;
use tracing::debug;

pub(crate) fn init(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS devices (
            device_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            device_type TEXT NOT NULL,
            public_key BLOB NOT NULL DEFAULT x'',
            pairing_key BLOB,
            address TEXT NOT NULL,
            port INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            paired INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS entities (
            entity_id TEXT NOT NULL,
            space_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            payload BLOB NOT NULL,
            content_hash TEXT NOT NULL,
            sequence INTEGER NOT NULL DEFAULT 0,
            modified_at INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (space_id, entity_id)
        );

        CREATE INDEX IF NOT EXISTS idx_entities_modified
            ON entities (space_id, modified_at);

        CREATE TABLE IF NOT EXISTS entity_sync_log (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            synced_at INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_log_once
            ON entity_sync_log (entity_id, sequence, device_id);

        CREATE INDEX IF NOT EXISTS idx_sync_log_space
            ON entity_sync_log (space_id, device_id, synced_at);

        CREATE TABLE IF NOT EXISTS sync_history (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            direction TEXT NOT NULL,
            entities_pushed INTEGER NOT NULL DEFAULT 0,
            entities_pulled INTEGER NOT NULL DEFAULT 0,
            conflicts_detected INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER NOT NULL,
            completed_at INTEGER NOT NULL,
            success INTEGER NOT NULL DEFAULT 1,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_history_space
            ON sync_history (space_id, completed_at);

        CREATE TABLE IF NOT EXISTS sync_conflict (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            local_snapshot BLOB NOT NULL,
            remote_snapshot BLOB NOT NULL,
            conflict_type TEXT NOT NULL,
            remote_device_id TEXT NOT NULL,
            remote_operation TEXT NOT NULL,
            remote_sequence INTEGER NOT NULL,
            remote_timestamp INTEGER NOT NULL,
            detected_at INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_at INTEGER,
            resolution TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_conflict_open
            ON sync_conflict (space_id, resolved);
        ",
    )?;
    debug!("sync schema ready");
    Ok(())
}
