//! Delta payload encryption using ChaCha20-Poly1305.
//!
//! Authenticated encryption with associated data (AEAD). The associated
//! data binds a ciphertext to the context it was produced for (space,
//! entity type, entity id), so a payload captured from one entity cannot
//! be replayed into another.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypted payload with the metadata needed for decryption.
///
/// The ciphertext is raw bytes end-to-end; there is no text encoding
/// step anywhere between encryption and decryption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// The nonce used for encryption (unique per encryption).
    pub nonce: [u8; NONCE_SIZE],
    /// The encrypted ciphertext (includes auth tag).
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Returns the total size of the encrypted payload.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    /// Returns true if the ciphertext is empty.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Flattens to `nonce || ciphertext` for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parses `nonce || ciphertext` back into a payload.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption("data too short".to_string()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
        let ciphertext = bytes[NONCE_SIZE..].to_vec();

        Ok(Self { nonce, ciphertext })
    }
}

/// Encrypts plaintext using ChaCha20-Poly1305.
///
/// # Arguments
/// * `key` - The encryption key
/// * `plaintext` - Data to encrypt (opaque bytes)
/// * `aad` - Associated data authenticated but not encrypted; must be
///   presented identically at decryption
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<EncryptedPayload> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    // Generate random nonce
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedPayload {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypts a payload using ChaCha20-Poly1305.
///
/// Fails if the key is wrong, the associated data differs from the one
/// used at encryption, or the ciphertext was tampered with.
pub fn decrypt(
    key: &SymmetricKey,
    encrypted: &EncryptedPayload,
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: encrypted.ciphertext.as_ref(),
                aad,
            },
        )
        .map_err(|_| {
            CryptoError::Decryption("decryption failed (wrong key, wrong context, or tampered data)".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip() {
        let key = SymmetricKey::random();
        let encrypted = encrypt(&key, b"hello world", b"ctx").unwrap();
        let decrypted = decrypt(&key, &encrypted, b"ctx").unwrap();
        assert_eq!(decrypted, b"hello world");
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = encrypt(&SymmetricKey::random(), b"secret", b"").unwrap();
        assert!(decrypt(&SymmetricKey::random(), &encrypted, b"").is_err());
    }

    #[test]
    fn wrong_context_fails() {
        let key = SymmetricKey::random();
        let encrypted = encrypt(&key, b"secret", b"entity-a").unwrap();
        assert!(decrypt(&key, &encrypted, b"entity-b").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = SymmetricKey::random();
        let mut encrypted = encrypt(&key, b"secret", b"").unwrap();
        encrypted.ciphertext[0] ^= 0x01;
        assert!(decrypt(&key, &encrypted, b"").is_err());
    }

    #[test]
    fn binary_payloads_survive() {
        // Invalid UTF-8, embedded nulls, and a large payload.
        let key = SymmetricKey::random();
        let mut payload = vec![0xFF, 0xFE, 0x00, 0x80, 0x00, 0xC3];
        payload.extend(std::iter::repeat(0xA5u8).take(12 * 1024));

        let encrypted = encrypt(&key, &payload, b"ctx").unwrap();
        let decrypted = decrypt(&key, &encrypted, b"ctx").unwrap();
        assert_eq!(decrypted, payload);
    }

    #[test]
    fn bytes_round_trip() {
        let key = SymmetricKey::random();
        let encrypted = encrypt(&key, b"payload", b"").unwrap();
        let parsed = EncryptedPayload::from_bytes(&encrypted.to_bytes()).unwrap();
        assert_eq!(parsed, encrypted);
    }

    proptest! {
        #[test]
        fn any_bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let key = SymmetricKey::from_bytes([7u8; 32]);
            let encrypted = encrypt(&key, &data, b"prop").unwrap();
            let decrypted = decrypt(&key, &encrypted, b"prop").unwrap();
            prop_assert_eq!(decrypted, data);
        }
    }
}
