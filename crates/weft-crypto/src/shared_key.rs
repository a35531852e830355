//! Pairwise shared-key derivation.
//!
//! Both ends of a conversation derive the same 32-byte AEAD key from their
//! own Ed25519 seed and the peer's Ed25519 public key:
//!
//! ```text
//! shared_point = X25519(convert(own_seed), convert(peer_public))
//! key = HKDF-SHA256(salt = "cc4me-e2e-v1",
//!                   ikm  = shared_point,
//!                   info = "{min_name}:{max_name}")[0..32]
//! ```
//!
//! The info field joins the two agent names in ascending order, so sender and
//! recipient derive the same key regardless of role.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::ed25519::VerifyingKey;
use crate::{convert, CryptoError, Result};

/// HKDF salt fixed by the wire protocol.
pub const HKDF_SALT: &[u8] = b"cc4me-e2e-v1";

/// Derived key size (AES-256).
pub const SHARED_KEY_SIZE: usize = 32;

/// Derive the pairwise AEAD key between two agents.
///
/// # Arguments
///
/// * `own_seed` - This agent's Ed25519 seed
/// * `peer_public` - The peer's Ed25519 public key
/// * `own_name` / `peer_name` - The two agent names (order irrelevant)
pub fn derive_shared_key(
    own_seed: &[u8; 32],
    peer_public: &VerifyingKey,
    own_name: &str,
    peer_name: &str,
) -> Result<[u8; SHARED_KEY_SIZE]> {
    let scalar = convert::ed25519_seed_to_x25519(own_seed);
    let peer_u = convert::ed25519_public_to_x25519(peer_public)?;
    let shared_point = x25519_dalek::x25519(scalar, peer_u);

    // An all-zero DH output means the peer key was a low-order point.
    if shared_point == [0u8; 32] {
        return Err(CryptoError::KeyDerivation(
            "degenerate shared point".into(),
        ));
    }

    let info = pair_info(own_name, peer_name);
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &shared_point);
    let mut key = [0u8; SHARED_KEY_SIZE];
    hk.expand(info.as_bytes(), &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Build the HKDF info string: the two names sorted ascending, colon-joined.
fn pair_info(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ed25519::KeyPair;

    #[test]
    fn test_both_sides_derive_same_key() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let k1 = derive_shared_key(
            &alice.signing_key.to_bytes(),
            &bob.verifying_key,
            "alice",
            "bmo",
        )
        .expect("derive");
        let k2 = derive_shared_key(
            &bob.signing_key.to_bytes(),
            &alice.verifying_key,
            "bmo",
            "alice",
        )
        .expect("derive");

        assert_eq!(k1, k2);
    }

    #[test]
    fn test_name_order_is_normalized() {
        assert_eq!(pair_info("atlas", "bmo"), "atlas:bmo");
        assert_eq!(pair_info("bmo", "atlas"), "atlas:bmo");
        assert_eq!(pair_info("x", "x"), "x:x");
    }

    #[test]
    fn test_different_pairs_get_different_keys() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let k1 = derive_shared_key(
            &alice.signing_key.to_bytes(),
            &bob.verifying_key,
            "alice",
            "bmo",
        )
        .expect("derive");
        // Same keys, different conversation names: distinct key.
        let k2 = derive_shared_key(
            &alice.signing_key.to_bytes(),
            &bob.verifying_key,
            "alice",
            "carol",
        )
        .expect("derive");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_third_party_derives_different_key() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let eve = KeyPair::generate();

        let pair_key = derive_shared_key(
            &alice.signing_key.to_bytes(),
            &bob.verifying_key,
            "alice",
            "bmo",
        )
        .expect("derive");
        let eve_key = derive_shared_key(
            &eve.signing_key.to_bytes(),
            &bob.verifying_key,
            "alice",
            "bmo",
        )
        .expect("derive");
        assert_ne!(pair_key, eve_key);
    }
}
