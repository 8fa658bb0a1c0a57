//! Error types for the crypto layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in crypto operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key, wrong context, or tampered data).
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Key exchange failed.
    #[error("key exchange error: {0}")]
    KeyExchange(String),

    /// Key derivation failed.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),
}
