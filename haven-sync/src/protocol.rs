//! Sync protocol message definitions.
//!
//! Everything that crosses the wire during a session is a `SyncMessage`;
//! pairing runs its own short exchange of `PairingRequest` /
//! `PairingResponse`. Messages are serialized as JSON and framed by the
//! codec in [`crate::wire`]. Delta payloads inside messages are already
//! AEAD ciphertext; the JSON layer never sees plaintext entity content.

use crate::clock::SpaceClock;
use crate::delta::SyncDelta;
use haven_types::{DeviceId, DeviceType, SpaceId};
use serde::{Deserialize, Serialize};

/// Current protocol version. Bump on incompatible message changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Device details carried in handshakes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDeviceInfo {
    pub device_id: DeviceId,
    pub display_name: String,
    pub device_type: DeviceType,
}

/// Initiates pairing. Sent after the user has read the responder's
/// displayed code. Only public key material crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    pub device_info: WireDeviceInfo,
    /// The short numeric code the user transcribed.
    pub code: String,
    /// Unix milliseconds; requests outside the expiry window are
    /// rejected as stale or replayed.
    pub timestamp: i64,
    /// Initiator's ephemeral X25519 public key (32 bytes).
    pub public_key: Vec<u8>,
}

/// Answers a pairing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingResponse {
    pub accepted: bool,
    pub device_info: Option<WireDeviceInfo>,
    /// Responder's ephemeral X25519 public key, present iff accepted.
    pub public_key: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl PairingResponse {
    /// An acceptance carrying the responder's identity and public key.
    pub fn accepted(device_info: WireDeviceInfo, public_key: Vec<u8>) -> Self {
        Self {
            accepted: true,
            device_info: Some(device_info),
            public_key: Some(public_key),
            error: None,
        }
    }

    /// A rejection with a reason.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            accepted: false,
            device_info: None,
            public_key: None,
            error: Some(error.into()),
        }
    }
}

/// A message exchanged during a sync session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Session opener from the initiator.
    Hello {
        protocol_version: u32,
        device_id: DeviceId,
        space_id: SpaceId,
        /// Random salt for this session's key derivation.
        session_salt: Vec<u8>,
    },
    /// Responder's answer to `Hello`.
    HelloAck {
        protocol_version: u32,
        device_id: DeviceId,
        accepted: bool,
        message: Option<String>,
    },
    /// Each side's view of what it has already seen.
    SyncRequest {
        space_id: SpaceId,
        /// Entity types the requester wants; empty means all.
        categories: Vec<String>,
        clock: SpaceClock,
    },
    /// One numbered chunk of the sender's delta set.
    DeltaBatch {
        /// 1-based batch number.
        batch_number: u32,
        /// Declared total, fixed for the whole transfer.
        total_batches: u32,
        deltas: Vec<SyncDelta>,
    },
    /// Acknowledges application of one batch.
    BatchAck { batch_number: u32 },
    /// Ends the session after both directions finish.
    Complete { pushed: u32, pulled: u32 },
    /// Fatal session error.
    Error { code: String, message: String },
}

impl SyncMessage {
    /// Builds a `Hello` with the current protocol version.
    pub fn hello(device_id: DeviceId, space_id: SpaceId, session_salt: Vec<u8>) -> Self {
        Self::Hello {
            protocol_version: PROTOCOL_VERSION,
            device_id,
            space_id,
            session_salt,
        }
    }

    /// Builds an accepting `HelloAck`.
    pub fn hello_ack(device_id: DeviceId) -> Self {
        Self::HelloAck {
            protocol_version: PROTOCOL_VERSION,
            device_id,
            accepted: true,
            message: None,
        }
    }

    /// Builds a rejecting `HelloAck`.
    pub fn hello_reject(device_id: DeviceId, message: impl Into<String>) -> Self {
        Self::HelloAck {
            protocol_version: PROTOCOL_VERSION,
            device_id,
            accepted: false,
            message: Some(message.into()),
        }
    }

    /// Builds an `Error` message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::HelloAck { .. } => "hello_ack",
            Self::SyncRequest { .. } => "sync_request",
            Self::DeltaBatch { .. } => "delta_batch",
            Self::BatchAck { .. } => "batch_ack",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_round_trip_through_json() {
        let msg = SyncMessage::hello(DeviceId::new(), SpaceId::new(), vec![1, 2, 3]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: SyncMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "hello");
        assert!(json.contains("\"type\":\"hello\""));
    }

    #[test]
    fn rejection_carries_reason() {
        let resp = PairingResponse::rejected("code mismatch");
        assert!(!resp.accepted);
        assert!(resp.public_key.is_none());
        assert_eq!(resp.error.as_deref(), Some("code mismatch"));
    }
}
