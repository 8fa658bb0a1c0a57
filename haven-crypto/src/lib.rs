//! Encryption and key exchange for Haven sync.
//!
//! Three concerns live here:
//! - Authenticated encryption (ChaCha20-Poly1305) of delta payloads, with
//!   associated data binding ciphertext to its entity/space context
//! - X25519 Diffie-Hellman key agreement for device pairing
//! - HKDF-SHA256 derivation of long-term pairing keys and per-session keys
//!
//! All key material is zeroized on drop. Payloads are treated as opaque
//! byte sequences throughout; nothing in this crate assumes text.

mod cipher;
mod error;
mod exchange;
mod key;

pub use cipher::{decrypt, encrypt, EncryptedPayload, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use exchange::{derive_session_key, ExchangeKeyPair, SESSION_SALT_SIZE};
pub use key::{SymmetricKey, KEY_SIZE};
