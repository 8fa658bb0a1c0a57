//! Peer-to-peer synchronization between a user's own devices.
//!
//! No account, no server: devices find each other on the local network,
//! pair through a short code the user transcribes, and exchange
//! end-to-end encrypted deltas directly. The moving parts:
//!
//! - [`PeerDiscovery`] — mDNS advertisement and browsing
//! - [`PairingService`] — code-verified X25519 pairing
//! - [`VectorClockStore`] — per-space clocks derived from the sync log
//! - [`DeltaCodec`] — delta computation, AEAD encryption, application
//! - [`ConflictResolver`] — concurrent-edit resolution
//! - [`SyncSession`] / [`SessionManager`] — the session state machine
//! - [`SyncHistoryLedger`] — append-only record of every attempt
//!
//! Entity payloads are opaque bytes end to end; this crate encrypts,
//! moves, stores, and compares them but never interprets them.

mod batch;
mod clock;
mod conflict;
mod delta;
mod discovery;
mod error;
mod history;
mod pairing;
mod protocol;
mod session;
mod wire;

pub use batch::{BatchAssembler, BatchProcessor, DEFAULT_BATCH_BYTES, DEFAULT_BATCH_ITEMS};
pub use clock::{SpaceClock, VectorClockStore};
pub use conflict::{merge_json_payloads, ConflictResolver, MergeFn, ResolutionStrategy};
pub use delta::{content_hash, ApplyOutcome, DeltaCodec, SkipReason, SyncDelta};
pub use discovery::{
    DiscoveredDevice, PeerDiscovery, DEFAULT_DISCOVERY_WINDOW, DEFAULT_PEER_TTL, SERVICE_TYPE,
};
pub use error::{SyncError, SyncResult};
pub use history::SyncHistoryLedger;
pub use pairing::{
    PairingCode, PairingService, RepairPolicy, MAX_CONCURRENT_HANDSHAKES, PAIRING_CODE_TTL,
};
pub use protocol::{
    PairingRequest, PairingResponse, SyncMessage, WireDeviceInfo, PROTOCOL_VERSION,
};
pub use session::{SessionManager, SyncConfig, SyncReport, SyncSession, SyncState};
pub use wire::{read_message, write_message, MAX_MESSAGE_SIZE};
