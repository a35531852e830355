//! # weft-crypto
//!
//! Cryptographic primitives for the Weft messaging fabric. The suite is
//! fixed — no algorithm negotiation is permitted:
//!
//! - [`ed25519`] — Ed25519 signing and verification (RFC 8032), SPKI-DER
//!   public-key codec
//! - [`convert`] — Ed25519 → X25519 birational key conversion (RFC 7748)
//! - [`shared_key`] — X25519 ECDH + HKDF-SHA256 pairwise key derivation
//! - [`aead`] — AES-256-GCM authenticated encryption

pub mod aead;
pub mod convert;
pub mod ed25519;
pub mod shared_key;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// A key could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
