//! Local entity storage.
//!
//! Payloads are opaque byte sequences; the application may hand us
//! pre-encrypted ciphertext and we never inspect or re-encode it.
//! Deletions keep a tombstone row so they can be propagated explicitly.

use crate::error::{StoreError, StoreResult};
use crate::sync_log::{insert_log_row, SyncLogEntry};
use crate::Store;
use haven_types::{EntityId, SpaceId};
use rusqlite::{params, OptionalExtension, Row};

/// A stored entity (or its tombstone).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub entity_id: EntityId,
    pub space_id: SpaceId,
    pub entity_type: String,
    pub payload: Vec<u8>,
    pub content_hash: String,
    /// Per-entity mutation counter; increments on every local write.
    pub sequence: i64,
    /// Unix milliseconds of the last mutation.
    pub modified_at: i64,
    pub deleted: bool,
}

impl Store {
    /// Writes a local mutation: creates the entity or replaces its
    /// payload, bumping the sequence counter and modified-at marker.
    pub fn put_local(
        &self,
        space_id: &SpaceId,
        entity_type: &str,
        entity_id: &EntityId,
        payload: &[u8],
        content_hash: &str,
        modified_at: i64,
    ) -> StoreResult<EntityRecord> {
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO entities
                     (entity_id, space_id, entity_type, payload, content_hash, sequence, modified_at, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, 0)
                 ON CONFLICT(space_id, entity_id) DO UPDATE SET
                     payload = excluded.payload,
                     content_hash = excluded.content_hash,
                     sequence = entities.sequence + 1,
                     modified_at = excluded.modified_at,
                     deleted = 0",
                params![
                    entity_id.to_string(),
                    space_id.to_string(),
                    entity_type,
                    payload,
                    content_hash,
                    modified_at,
                ],
            )?;
        }
        self.get_entity(space_id, entity_id)?
            .ok_or_else(|| StoreError::NotFound(format!("entity {entity_id}")))
    }

    /// Tombstones an entity locally. The row remains so the deletion
    /// propagates as an explicit delta.
    pub fn delete_local(
        &self,
        space_id: &SpaceId,
        entity_id: &EntityId,
        modified_at: i64,
    ) -> StoreResult<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE entities SET
                 payload = x'',
                 content_hash = '',
                 sequence = sequence + 1,
                 modified_at = ?3,
                 deleted = 1
             WHERE space_id = ?1 AND entity_id = ?2",
            params![space_id.to_string(), entity_id.to_string(), modified_at],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("entity {entity_id}")));
        }
        Ok(())
    }

    /// Reads one entity, tombstones included.
    pub fn get_entity(
        &self,
        space_id: &SpaceId,
        entity_id: &EntityId,
    ) -> StoreResult<Option<EntityRecord>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT entity_id, space_id, entity_type, payload, content_hash, sequence, modified_at, deleted
             FROM entities WHERE space_id = ?1 AND entity_id = ?2",
            params![space_id.to_string(), entity_id.to_string()],
            entity_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// All entities in a space modified strictly after the marker,
    /// tombstones included, oldest change first. This is the
    /// "changes since marker X" query the delta computation consumes.
    pub fn changed_since(&self, space_id: &SpaceId, marker: i64) -> StoreResult<Vec<EntityRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT entity_id, space_id, entity_type, payload, content_hash, sequence, modified_at, deleted
             FROM entities
             WHERE space_id = ?1 AND modified_at > ?2
             ORDER BY modified_at ASC, entity_id ASC",
        )?;
        let records = stmt
            .query_map(params![space_id.to_string(), marker], entity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Applies a remote change: the entity write and the sync log append
    /// commit as one transaction, or neither does.
    pub fn apply_remote(&self, record: &EntityRecord, log: &SyncLogEntry) -> StoreResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO entities
                 (entity_id, space_id, entity_type, payload, content_hash, sequence, modified_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(space_id, entity_id) DO UPDATE SET
                 entity_type = excluded.entity_type,
                 payload = excluded.payload,
                 content_hash = excluded.content_hash,
                 sequence = excluded.sequence,
                 modified_at = excluded.modified_at,
                 deleted = excluded.deleted",
            params![
                record.entity_id.to_string(),
                record.space_id.to_string(),
                record.entity_type,
                record.payload,
                record.content_hash,
                record.sequence,
                record.modified_at,
                record.deleted as i64,
            ],
        )?;
        insert_log_row(&tx, log)?;
        tx.commit()?;
        Ok(())
    }
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<EntityRecord> {
    let entity_str: String = row.get(0)?;
    let space_str: String = row.get(1)?;
    let to_sql_err = |e: uuid::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(EntityRecord {
        entity_id: entity_str.parse().map_err(to_sql_err)?,
        space_id: space_str.parse().map_err(to_sql_err)?,
        entity_type: row.get(2)?,
        payload: row.get(3)?,
        content_hash: row.get(4)?,
        sequence: row.get(5)?,
        modified_at: row.get(6)?,
        deleted: row.get::<_, i64>(7)? == 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::{now_ms, DeviceId, SyncOperation};
    use pretty_assertions::assert_eq;

    fn make_log(record: &EntityRecord, device_id: DeviceId) -> SyncLogEntry {
        SyncLogEntry {
            space_id: record.space_id,
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id,
            device_id,
            operation: SyncOperation::Update,
            sequence: record.sequence,
            content_hash: record.content_hash.clone(),
            synced_at: now_ms(),
        }
    }

    #[test]
    fn put_local_bumps_sequence() {
        let store = Store::open_in_memory().unwrap();
        let space = SpaceId::new();
        let id = EntityId::new();

        let first = store
            .put_local(&space, "note", &id, b"v1", "h1", 100)
            .unwrap();
        assert_eq!(first.sequence, 1);

        let second = store
            .put_local(&space, "note", &id, b"v2", "h2", 200)
            .unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.payload, b"v2");
        assert!(!second.deleted);
    }

    #[test]
    fn binary_payload_round_trips_exactly() {
        let store = Store::open_in_memory().unwrap();
        let space = SpaceId::new();
        let id = EntityId::new();

        // Invalid UTF-8, embedded nulls, 10KB+.
        let mut payload = vec![0xFF, 0x00, 0xFE, 0x00, 0x80];
        payload.extend((0..11_000).map(|i| (i % 251) as u8));

        store
            .put_local(&space, "blob", &id, &payload, "h", 1)
            .unwrap();
        let loaded = store.get_entity(&space, &id).unwrap().unwrap();
        assert_eq!(loaded.payload, payload);
    }

    #[test]
    fn changed_since_respects_marker_and_tombstones() {
        let store = Store::open_in_memory().unwrap();
        let space = SpaceId::new();
        let a = EntityId::new();
        let b = EntityId::new();

        store.put_local(&space, "note", &a, b"a", "ha", 100).unwrap();
        store.put_local(&space, "note", &b, b"b", "hb", 200).unwrap();
        store.delete_local(&space, &a, 300).unwrap();

        let changed = store.changed_since(&space, 150).unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[0].entity_id, b);
        assert!(changed[1].deleted);
        assert_eq!(changed[1].entity_id, a);

        assert!(store.changed_since(&space, 300).unwrap().is_empty());
    }

    #[test]
    fn apply_remote_is_atomic_with_log() {
        let store = Store::open_in_memory().unwrap();
        let space = SpaceId::new();
        let origin = DeviceId::new();
        let record = EntityRecord {
            entity_id: EntityId::new(),
            space_id: space,
            entity_type: "note".into(),
            payload: b"remote".to_vec(),
            content_hash: "hr".into(),
            sequence: 4,
            modified_at: 500,
            deleted: false,
        };

        store.apply_remote(&record, &make_log(&record, origin)).unwrap();
        assert_eq!(
            store.get_entity(&space, &record.entity_id).unwrap().unwrap(),
            record
        );
        assert!(store.already_applied(&record.entity_id, 4, &origin).unwrap());

        // A second apply of the same (entity, seq, device) hits the unique
        // index and leaves everything unchanged.
        let mut replay = record.clone();
        replay.payload = b"tampered replay".to_vec();
        assert!(store
            .apply_remote(&replay, &make_log(&record, origin))
            .is_err());
        assert_eq!(
            store
                .get_entity(&space, &record.entity_id)
                .unwrap()
                .unwrap()
                .payload,
            b"remote"
        );
        assert_eq!(store.sync_log_count(&record.entity_id).unwrap(), 1);
    }
}
