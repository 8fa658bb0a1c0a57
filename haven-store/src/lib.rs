//! SQLite persistence for Haven sync state.
//!
//! Owns every table the sync core touches:
//! - `devices` — known peers, pairing state, key material
//! - `entities` — local entity payloads as opaque BLOBs, with tombstones
//! - `entity_sync_log` — append-only row per applied remote change;
//!   ground truth for vector clocks and duplicate detection
//! - `sync_history` — append-only row per sync session attempt
//! - `sync_conflict` — detected conflicts with both snapshots
//!
//! A single connection behind a mutex serializes all access, so remote
//! delta application never interleaves with local edits mid-statement.
//! The two multi-table invariants (entity write + log append on apply,
//! entity write + resolved flag + log append on conflict resolution) are
//! committed as single transactions.

mod conflict;
mod device;
mod entity;
mod error;
mod history;
mod schema;
mod sync_log;

pub use conflict::{ConflictOutcome, ConflictRecord};
pub use entity::EntityRecord;
pub use error::{StoreError, StoreResult};
pub use history::{SyncHistoryEntry, SyncStats};
pub use sync_log::SyncLogEntry;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Handle to the sync state database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }
}
