//! # weft-wire
//!
//! Wire-level building blocks of the Weft fabric:
//!
//! - [`canonical`] — deterministic JSON serialization used as signing input
//! - [`envelope`] — the signed, encrypted unit of peer-to-peer transport
//! - [`seal`] — envelope construction (encrypt + sign) and opening
//!   (verify + decrypt) with skew defense
//! - [`reqsig`] — detached signatures over relay HTTP requests

pub mod canonical;
pub mod envelope;
pub mod reqsig;
pub mod seal;

use weft_crypto::CryptoError;

/// Error types for wire operations. The [`seal::open`] pipeline raises a
/// distinct variant per failure class so callers can decide whether to queue,
/// drop, or re-resolve keys.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Envelope or input failed shape validation.
    #[error("malformed envelope: {0}")]
    Shape(String),

    /// Unsupported protocol version.
    #[error("unsupported version: {0}")]
    Version(String),

    /// Timestamp outside the tolerated clock-skew window.
    #[error("timestamp skew of {skew_secs}s exceeds the {limit_secs}s limit")]
    Skew { skew_secs: i64, limit_secs: i64 },

    /// Ed25519 signature did not verify.
    #[error("envelope signature verification failed")]
    Signature,

    /// Ciphertext did not authenticate or could not be decoded.
    #[error("payload decryption failed")]
    Decrypt,

    /// Value cannot be canonically serialized (non-finite number).
    #[error("value cannot be canonically serialized")]
    InvalidValue,

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, WireError>;
