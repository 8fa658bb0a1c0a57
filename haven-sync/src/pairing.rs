//! Device pairing.
//!
//! Pairing establishes mutual trust between two devices through a short
//! numeric code the user transcribes out of band. The responder displays
//! the code; the initiator sends it back alongside an ephemeral X25519
//! public key. Code verification is constant-time and single-use, codes
//! expire after a few minutes, and the number of concurrent handshake
//! attempts is bounded so a hostile network cannot grind through codes.
//!
//! Only public keys cross the wire. The derived pairing key is persisted
//! per device and becomes the root for all later session keys.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{PairingRequest, PairingResponse, WireDeviceInfo};
use haven_crypto::{ExchangeKeyPair, SymmetricKey};
use haven_store::Store;
use haven_types::{now_ms, Device, DeviceId};
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// How long a displayed code stays valid.
pub const PAIRING_CODE_TTL: Duration = Duration::from_secs(300);

/// Upper bound on handshakes processed at once.
pub const MAX_CONCURRENT_HANDSHAKES: usize = 10;

/// What to do when a pairing request arrives from an already-paired
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairPolicy {
    /// Refuse; the user must remove the device first. The safe default:
    /// a re-pair request for a known device is more likely an
    /// impersonation attempt than a legitimate key rotation.
    #[default]
    Reject,
    /// Accept and replace the stored pairing key.
    UpdateKey,
}

/// A displayed pairing code with its issue time.
#[derive(Debug, Clone)]
pub struct PairingCode {
    digits: String,
    issued_at: i64,
}

impl PairingCode {
    /// Generates a random 6-digit code.
    pub fn generate() -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self {
            digits: format!("{n:06}"),
            issued_at: now_ms(),
        }
    }

    /// The digits to show the user.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.digits
    }

    /// True once the code has outlived its window.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.issued_at > PAIRING_CODE_TTL.as_millis() as i64
    }

    /// Constant-time comparison against a candidate.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        // ct_eq needs equal lengths; a length mismatch is not secret.
        self.digits.len() == candidate.len()
            && self
                .digits
                .as_bytes()
                .ct_eq(candidate.as_bytes())
                .into()
    }
}

struct PendingPairing {
    code: PairingCode,
    keys: ExchangeKeyPair,
}

/// Runs both sides of the pairing handshake against the device registry.
pub struct PairingService {
    store: Store,
    local: WireDeviceInfo,
    policy: RepairPolicy,
    limiter: Semaphore,
    pending: Mutex<Option<PendingPairing>>,
}

impl PairingService {
    pub fn new(store: Store, local: WireDeviceInfo) -> Self {
        Self {
            store,
            local,
            policy: RepairPolicy::default(),
            limiter: Semaphore::new(MAX_CONCURRENT_HANDSHAKES),
            pending: Mutex::new(None),
        }
    }

    pub fn with_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Responder side: arms a fresh code and key pair, returning the
    /// digits to display. Replaces any previously armed code.
    pub fn begin_pairing(&self) -> String {
        let code = PairingCode::generate();
        let digits = code.digits.clone();
        *self.pending.lock().expect("pairing state poisoned") = Some(PendingPairing {
            code,
            keys: ExchangeKeyPair::generate(),
        });
        info!(device = %self.local.device_id, "pairing armed, awaiting code entry");
        digits
    }

    /// Initiator side: builds the request to send after the user typed
    /// the responder's code. The returned key pair must be kept for
    /// [`complete_pairing`](Self::complete_pairing).
    pub fn initiate(&self, code: impl Into<String>) -> (PairingRequest, ExchangeKeyPair) {
        let keys = ExchangeKeyPair::generate();
        let request = PairingRequest {
            device_info: self.local.clone(),
            code: code.into(),
            timestamp: now_ms(),
            public_key: keys.public_bytes().to_vec(),
        };
        (request, keys)
    }

    /// Responder side: verifies an incoming request against the armed
    /// code and, on success, persists the peer as paired.
    ///
    /// The armed code is consumed by the first attempt, matching or not,
    /// so each displayed code permits exactly one guess. All rejections
    /// are returned as a [`PairingResponse`] for the wire rather than an
    /// error; only storage and key-agreement failures are errors.
    pub fn handle_request(&self, request: &PairingRequest) -> SyncResult<PairingResponse> {
        let Ok(_permit) = self.limiter.try_acquire() else {
            warn!(peer = %request.device_info.device_id, "pairing rejected, too many concurrent attempts");
            return Ok(PairingResponse::rejected("too many pairing attempts"));
        };

        let Some(pending) = self.pending.lock().expect("pairing state poisoned").take() else {
            return Ok(PairingResponse::rejected("no pairing in progress"));
        };

        let now = now_ms();
        if pending.code.is_expired(now) {
            return Ok(PairingResponse::rejected("pairing code expired"));
        }
        let window = PAIRING_CODE_TTL.as_millis() as i64;
        if (now - request.timestamp).abs() > window {
            return Ok(PairingResponse::rejected("request timestamp out of window"));
        }
        if !pending.code.matches(&request.code) {
            warn!(peer = %request.device_info.device_id, "pairing code mismatch");
            return Ok(PairingResponse::rejected("pairing code mismatch"));
        }

        let peer_id = request.device_info.device_id;
        if let Some(existing) = self.store.get_device(&peer_id)? {
            if existing.paired && self.policy == RepairPolicy::Reject {
                warn!(peer = %peer_id, "re-pair refused for already-paired device");
                return Ok(PairingResponse::rejected("device already paired"));
            }
        }

        let our_public = pending.keys.public_bytes();
        let pairing_key = pending.keys.agree(&request.public_key)?;
        self.persist_paired(&request.device_info, &request.public_key, &pairing_key)?;

        info!(peer = %peer_id, "pairing complete");
        Ok(PairingResponse::accepted(
            self.local.clone(),
            our_public.to_vec(),
        ))
    }

    /// Initiator side: consumes the response and the key pair from
    /// [`initiate`](Self::initiate), deriving and persisting the same
    /// pairing key the responder stored.
    pub fn complete_pairing(
        &self,
        keys: ExchangeKeyPair,
        response: &PairingResponse,
    ) -> SyncResult<SymmetricKey> {
        if !response.accepted {
            let reason = response.error.as_deref().unwrap_or("rejected by peer");
            return Err(SyncError::Pairing(reason.to_string()));
        }
        let (Some(device_info), Some(peer_public)) = (&response.device_info, &response.public_key)
        else {
            return Err(SyncError::Pairing(
                "acceptance missing device info or public key".to_string(),
            ));
        };

        let pairing_key = keys.agree(peer_public)?;
        self.persist_paired(device_info, peer_public, &pairing_key)?;

        info!(peer = %device_info.device_id, "pairing complete");
        Ok(pairing_key)
    }

    /// Loads the persisted pairing key for a peer.
    pub fn pairing_key_for(&self, peer: &DeviceId) -> SyncResult<SymmetricKey> {
        let bytes = self
            .store
            .pairing_key(peer)?
            .ok_or_else(|| SyncError::PeerNotFound(peer.to_string()))?;
        let key: [u8; haven_crypto::KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SyncError::Pairing("stored pairing key has wrong size".to_string()))?;
        Ok(SymmetricKey::from_bytes(key))
    }

    fn persist_paired(
        &self,
        info: &WireDeviceInfo,
        peer_public: &[u8],
        pairing_key: &SymmetricKey,
    ) -> SyncResult<()> {
        // The row may not exist yet if pairing ran before discovery saw
        // the peer; the address stays empty until the next browse.
        if self.store.get_device(&info.device_id)?.is_none() {
            let device = Device::discovered(
                info.device_id,
                info.display_name.clone(),
                info.device_type,
                "",
                0,
                now_ms(),
            );
            self.store.upsert_discovered_device(&device)?;
        }
        self.store
            .mark_paired(&info.device_id, peer_public, pairing_key.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::{DeviceId, DeviceType};

    fn service(policy: RepairPolicy) -> PairingService {
        let local = WireDeviceInfo {
            device_id: DeviceId::new(),
            display_name: "Desk".into(),
            device_type: DeviceType::Desktop,
        };
        PairingService::new(Store::open_in_memory().unwrap(), local).with_policy(policy)
    }

    fn pair(initiator: &PairingService, responder: &PairingService) -> SyncResult<SymmetricKey> {
        let code = responder.begin_pairing();
        let (request, keys) = initiator.initiate(code);
        let response = responder.handle_request(&request)?;
        initiator.complete_pairing(keys, &response)
    }

    #[test]
    fn code_is_six_digits() {
        for _ in 0..50 {
            let code = PairingCode::generate();
            assert_eq!(code.as_str().len(), 6);
            assert!(code.as_str().chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn code_matching_is_exact() {
        let code = PairingCode::generate();
        assert!(code.matches(code.as_str()));
        assert!(!code.matches("000000x"));
        assert!(!code.matches(""));
    }

    #[test]
    fn handshake_pairs_both_sides() {
        let a = service(RepairPolicy::Reject);
        let b = service(RepairPolicy::Reject);

        let key = pair(&a, &b).unwrap();

        // Both registries now hold the same pairing key for the peer.
        let a_stored = a.pairing_key_for(&b.local.device_id).unwrap();
        let b_stored = b.pairing_key_for(&a.local.device_id).unwrap();
        assert_eq!(a_stored, key);
        assert_eq!(b_stored, key);
    }

    #[test]
    fn wrong_code_is_rejected_and_consumes_the_attempt() {
        let a = service(RepairPolicy::Reject);
        let b = service(RepairPolicy::Reject);

        let real = b.begin_pairing();
        let wrong = if real == "111111" { "222222" } else { "111111" };
        let (request, _keys) = a.initiate(wrong);

        let response = b.handle_request(&request).unwrap();
        assert!(!response.accepted);

        // A second guess with the correct code fails too: single-use.
        let (retry, _keys) = a.initiate(real);
        let response = b.handle_request(&retry).unwrap();
        assert!(!response.accepted);
    }

    #[test]
    fn no_armed_code_means_rejection() {
        let a = service(RepairPolicy::Reject);
        let b = service(RepairPolicy::Reject);
        let (request, _keys) = a.initiate("123456");
        let response = b.handle_request(&request).unwrap();
        assert!(!response.accepted);
    }

    #[test]
    fn stale_request_timestamp_is_rejected() {
        let a = service(RepairPolicy::Reject);
        let b = service(RepairPolicy::Reject);

        let code = b.begin_pairing();
        let (mut request, _keys) = a.initiate(code);
        request.timestamp -= 2 * PAIRING_CODE_TTL.as_millis() as i64;

        let response = b.handle_request(&request).unwrap();
        assert!(!response.accepted);
    }

    #[test]
    fn repair_is_refused_by_default() {
        let a = service(RepairPolicy::Reject);
        let b = service(RepairPolicy::Reject);

        pair(&a, &b).unwrap();
        let err = pair(&a, &b).unwrap_err();
        assert!(matches!(err, SyncError::Pairing(_)));
    }

    #[test]
    fn update_key_policy_allows_repair() {
        let a = service(RepairPolicy::UpdateKey);
        let b = service(RepairPolicy::UpdateKey);

        let first = pair(&a, &b).unwrap();
        let second = pair(&a, &b).unwrap();
        assert_ne!(first, second);
        assert_eq!(b.pairing_key_for(&a.local.device_id).unwrap(), second);
    }

    #[test]
    fn rejected_response_fails_completion() {
        let a = service(RepairPolicy::Reject);
        let (_, keys) = a.initiate("123456");
        let err = a
            .complete_pairing(keys, &PairingResponse::rejected("nope"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Pairing(_)));
    }
}
