//! Ed25519 → X25519 key conversion (RFC 7748).
//!
//! Agents hold a single Ed25519 identity keypair; encryption keys are derived
//! from it on demand so no second long-lived key needs distributing.
//!
//! ## Public keys
//!
//! An Ed25519 public key is a compressed Edwards point. The X25519
//! counterpart is the Montgomery u-coordinate of the same point under the
//! birational map
//!
//! ```text
//! u = (1 + y) * (1 - y)^-1  mod 2^255 - 19
//! ```
//!
//! The sign bit of the compressed encoding does not contribute to `u`.
//!
//! ## Secret keys
//!
//! The X25519 scalar is `SHA-512(seed)[0..32]` clamped per RFC 7748
//! (`a[0] &= 248; a[31] &= 127; a[31] |= 64`) — the same scalar Ed25519
//! itself signs with.

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha512};

use crate::ed25519::VerifyingKey;
use crate::{CryptoError, Result};

/// Convert an Ed25519 public key to its X25519 (Montgomery) form.
pub fn ed25519_public_to_x25519(public: &VerifyingKey) -> Result<[u8; 32]> {
    let point = CompressedEdwardsY(public.to_bytes())
        .decompress()
        .ok_or_else(|| CryptoError::InvalidKey("not a valid curve point".into()))?;
    Ok(point.to_montgomery().to_bytes())
}

/// Convert an Ed25519 seed to an X25519 secret scalar.
pub fn ed25519_seed_to_x25519(seed: &[u8; 32]) -> [u8; 32] {
    let digest = Sha512::digest(seed);
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&digest[..32]);
    // Clamp per RFC 7748
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
    scalar
}
