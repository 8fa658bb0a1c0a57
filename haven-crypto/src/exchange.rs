//! X25519 key agreement and HKDF key derivation for device pairing.
//!
//! Pairing runs an ephemeral Diffie-Hellman exchange: each side sends only
//! its public key, the shared secret never crosses the wire, and the
//! ephemeral private scalar is consumed by the agreement and zeroized.
//! The shared secret is expanded with HKDF-SHA256 into the long-term
//! pairing key; each sync session then derives a fresh session key from
//! the pairing key and a random per-session salt.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{SymmetricKey, KEY_SIZE};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};

/// Size of the per-session salt exchanged during the handshake.
pub const SESSION_SALT_SIZE: usize = 16;

const PAIRING_INFO: &[u8] = b"haven pairing key v1";
const SESSION_INFO: &[u8] = b"haven session key v1";

/// An ephemeral X25519 key pair used for a single pairing exchange.
///
/// The private scalar cannot be extracted or cloned; `agree` consumes the
/// pair, so the ephemeral material cannot outlive the exchange.
pub struct ExchangeKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl ExchangeKeyPair {
    /// Generates a fresh ephemeral key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key to send to the peer (32 bytes).
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Completes the exchange against the peer's public key and expands
    /// the shared secret into the long-term pairing key.
    ///
    /// Both sides arrive at the same key; a low-order peer public key
    /// (which would produce a non-contributory secret) is rejected.
    pub fn agree(self, peer_public: &[u8]) -> CryptoResult<SymmetricKey> {
        let peer_bytes: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::KeyExchange("peer public key must be 32 bytes".to_string()))?;
        let peer_key = PublicKey::from(peer_bytes);

        let shared = self.secret.diffie_hellman(&peer_key);
        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchange(
                "non-contributory shared secret (low-order peer key)".to_string(),
            ));
        }

        expand(shared.as_bytes(), None, PAIRING_INFO)
    }
}

impl std::fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeKeyPair")
            .field("public", &self.public_bytes())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Derives a fresh session key from the long-term pairing key.
///
/// The salt is generated by the session initiator and sent in the
/// handshake, so both sides derive the same key. A compromised session
/// key does not expose the pairing key or any other session's key.
pub fn derive_session_key(pairing_key: &SymmetricKey, salt: &[u8]) -> CryptoResult<SymmetricKey> {
    if salt.len() != SESSION_SALT_SIZE {
        return Err(CryptoError::KeyDerivation(format!(
            "session salt must be {SESSION_SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }
    expand(pairing_key.as_bytes(), Some(salt), SESSION_INFO)
}

fn expand(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> CryptoResult<SymmetricKey> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SymmetricKey::from_bytes(okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_pairing_key() {
        let alice = ExchangeKeyPair::generate();
        let bob = ExchangeKeyPair::generate();

        let alice_pub = alice.public_bytes();
        let bob_pub = bob.public_bytes();

        let alice_key = alice.agree(&bob_pub).unwrap();
        let bob_key = bob.agree(&alice_pub).unwrap();
        assert_eq!(alice_key, bob_key);
    }

    #[test]
    fn different_exchanges_yield_different_keys() {
        let k1 = {
            let a = ExchangeKeyPair::generate();
            let b = ExchangeKeyPair::generate();
            let b_pub = b.public_bytes();
            a.agree(&b_pub).unwrap()
        };
        let k2 = {
            let a = ExchangeKeyPair::generate();
            let b = ExchangeKeyPair::generate();
            let b_pub = b.public_bytes();
            a.agree(&b_pub).unwrap()
        };
        assert_ne!(k1, k2);
    }

    #[test]
    fn malformed_peer_key_is_rejected() {
        let pair = ExchangeKeyPair::generate();
        assert!(pair.agree(&[0u8; 16]).is_err());
    }

    #[test]
    fn session_keys_differ_per_salt() {
        let pairing_key = SymmetricKey::random();
        let s1 = derive_session_key(&pairing_key, &[1u8; SESSION_SALT_SIZE]).unwrap();
        let s2 = derive_session_key(&pairing_key, &[2u8; SESSION_SALT_SIZE]).unwrap();
        assert_ne!(s1, s2);
        assert_ne!(s1, pairing_key);
    }

    #[test]
    fn session_key_is_deterministic_for_a_salt() {
        let pairing_key = SymmetricKey::from_bytes([9u8; 32]);
        let salt = [4u8; SESSION_SALT_SIZE];
        let a = derive_session_key(&pairing_key, &salt).unwrap();
        let b = derive_session_key(&pairing_key, &salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bad_salt_length_is_rejected() {
        let pairing_key = SymmetricKey::random();
        assert!(derive_session_key(&pairing_key, &[0u8; 3]).is_err());
    }
}
