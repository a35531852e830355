//! Ed25519 signing and verification (RFC 8032).
//!
//! Ed25519 is the single long-lived identity key algorithm in Weft. An agent
//! signs envelopes and relay requests with it, and the same keypair is
//! converted to X25519 for message encryption (see [`crate::convert`]).
//!
//! Public keys travel as base64-encoded SPKI DER (44 bytes of DER for an
//! Ed25519 key), which is what the relay registry stores.

use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// An Ed25519 signing key (private key).
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl Clone for SigningKey {
    fn clone(&self) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(&self.inner.to_bytes()),
        }
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        let mut bytes = self.inner.to_bytes();
        bytes.zeroize();
    }
}

/// An Ed25519 verification key (public key).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

/// An Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

/// An Ed25519 keypair identifying one agent.
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a signing key from the 32-byte seed.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Get the 32-byte seed of this signing key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Get the corresponding verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign a message (pure Ed25519, no prehash).
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }
}

impl VerifyingKey {
    /// Create a verifying key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Get the raw bytes of this verifying key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Get the raw bytes as a slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.inner.as_bytes()
    }

    /// Verify a signature on a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.inner
            .verify(message, &signature.inner)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// Encode as SPKI DER.
    pub fn to_spki_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .inner
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Decode from SPKI DER.
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let inner = ed25519_dalek::VerifyingKey::from_public_key_der(der)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Encode as base64(SPKI DER) — the registry representation.
    pub fn to_base64(&self) -> Result<String> {
        let der = self.to_spki_der()?;
        Ok(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            der,
        ))
    }

    /// Decode from base64(SPKI DER).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid base64: {e}")))?;
        Self::from_spki_der(&der)
    }
}

impl Signature {
    /// Create a signature from raw bytes.
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: ed25519_dalek::Signature::from_bytes(bytes),
        }
    }

    /// Get the raw bytes of this signature.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }

    /// Encode as standard base64.
    pub fn to_base64(&self) -> String {
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            self.to_bytes(),
        )
    }

    /// Decode from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid base64: {e}")))?;
        let sig: [u8; 64] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidInput("signature must be 64 bytes".into()))?;
        Ok(Self::from_bytes(&sig))
    }
}

impl KeyPair {
    /// Generate a new random Ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate();
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create a keypair from a signing key's seed.
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.verifying_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();
        let msg = b"test message";
        let sig = kp.signing_key.sign(msg);
        assert!(kp.verifying_key.verify(msg, &sig).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let kp = KeyPair::generate();
        let sig = kp.signing_key.sign(b"correct message");
        assert!(kp.verifying_key.verify(b"wrong message", &sig).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let sig = kp1.signing_key.sign(b"test");
        assert!(kp2.verifying_key.verify(b"test", &sig).is_err());
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let kp = KeyPair::generate();
        let seed = kp.signing_key.to_bytes();
        let restored = KeyPair::from_bytes(&seed);
        assert_eq!(
            kp.verifying_key.to_bytes(),
            restored.verifying_key.to_bytes()
        );
    }

    #[test]
    fn test_spki_der_roundtrip() {
        let kp = KeyPair::generate();
        let der = kp.verifying_key.to_spki_der().expect("encode");
        // Ed25519 SubjectPublicKeyInfo is always 44 bytes.
        assert_eq!(der.len(), 44);
        let restored = VerifyingKey::from_spki_der(&der).expect("decode");
        assert_eq!(kp.verifying_key, restored);
    }

    #[test]
    fn test_base64_spki_roundtrip() {
        let kp = KeyPair::generate();
        let encoded = kp.verifying_key.to_base64().expect("encode");
        let restored = VerifyingKey::from_base64(&encoded).expect("decode");
        assert_eq!(kp.verifying_key, restored);
    }

    #[test]
    fn test_base64_rejects_garbage() {
        assert!(VerifyingKey::from_base64("not base64!!!").is_err());
        let bogus = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b"not a spki document",
        );
        assert!(VerifyingKey::from_base64(&bogus).is_err());
    }

    #[test]
    fn test_signature_base64_roundtrip() {
        let kp = KeyPair::generate();
        let sig = kp.signing_key.sign(b"test");
        let encoded = sig.to_base64();
        let restored = Signature::from_base64(&encoded).expect("decode");
        assert_eq!(sig, restored);
    }

    #[test]
    fn test_deterministic_key_derivation() {
        let seed = [42u8; 32];
        let kp1 = KeyPair::from_bytes(&seed);
        let kp2 = KeyPair::from_bytes(&seed);
        assert_eq!(kp1.verifying_key.to_bytes(), kp2.verifying_key.to_bytes());

        let kp3 = KeyPair::from_bytes(&[43u8; 32]);
        assert_ne!(kp1.verifying_key.to_bytes(), kp3.verifying_key.to_bytes());
    }

    #[test]
    fn test_rfc8032_test_vector_1() {
        // RFC 8032 section 7.1, TEST 1: empty message.
        let seed = hex_literal::hex!(
            "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60"
        );
        let kp = KeyPair::from_bytes(&seed);
        assert_eq!(
            kp.verifying_key.to_bytes(),
            hex_literal::hex!(
                "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
            )
        );
        let sig = kp.signing_key.sign(b"");
        assert_eq!(
            sig.to_bytes().to_vec(),
            hex::decode(
                "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e06522490155\
                 5fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b"
            )
            .expect("valid hex")
        );
        assert!(kp.verifying_key.verify(b"", &sig).is_ok());
    }
}
