//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// Detected conflicts are deliberately not represented here; a conflict
/// is first-class state, not a failure.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Discovery problem. Non-fatal: partial results are still returned.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Pairing failed (bad or expired code, rejected re-pair). The user
    /// can retry with a fresh code.
    #[error("pairing error: {0}")]
    Pairing(String),

    /// Session handshake failed; the session aborts.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// A single delta could not be decrypted. Skipped and logged; the
    /// session continues unless the failure rate is systemic.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Storage error. Fatal to the session.
    #[error("storage error: {0}")]
    Storage(#[from] haven_store::StoreError),

    /// Crypto failure outside the per-delta decryption path.
    #[error("crypto error: {0}")]
    Crypto(#[from] haven_crypto::CryptoError),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Protocol error (invalid message, bad batch numbering).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A bounded phase exceeded its deadline.
    #[error("timed out during {phase}")]
    Timeout { phase: &'static str },

    /// The peer is not known or not paired.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// A session for this (space, peer) pair is already running.
    #[error("sync session already active for this peer")]
    SessionActive,

    /// The session state machine refused a transition.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// The referenced conflict does not exist or is already resolved.
    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    /// The session was cancelled between delta boundaries.
    #[error("sync cancelled")]
    Cancelled,
}
