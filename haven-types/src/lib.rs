//! Core type definitions for Haven.
//!
//! This crate defines the fundamental types shared by the sync core:
//! - Device, space, entity, and conflict identifiers (UUID v7)
//! - Device descriptors exchanged during discovery and pairing
//! - Entity-level sync operations
//! - Hybrid Logical Clock timestamps
//!
//! Domain-specific content types (notes, tasks, calendar entries) belong
//! to their respective modules, not here. Payloads cross this crate only
//! as opaque bytes.

mod conflict;
mod device;
mod ids;
mod operation;
mod timestamp;

pub use conflict::ConflictType;
pub use device::{Device, DeviceType};
pub use ids::{ConflictId, DeviceId, EntityId, SpaceId};
pub use operation::SyncOperation;
pub use timestamp::{now_ms, HybridTimestamp};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}
