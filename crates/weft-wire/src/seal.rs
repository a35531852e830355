//! Envelope construction and opening.
//!
//! ## Seal
//!
//! ```text
//! seal(sender, recipient, payload, sender_key, recipient_public):
//!   1. message_id = caller-supplied (retry identity) or fresh UUIDv4
//!   2. key   = ECDH+HKDF over the converted Ed25519 keys
//!   3. ct    = AES-256-GCM(key, random nonce, json(payload), aad=message_id)
//!   4. env   = envelope with payload {ciphertext, nonce}, signature=""
//!   5. env.signature = base64(Ed25519(canonical(env minus signature)))
//! ```
//!
//! ## Open
//!
//! Verification runs shape → version → skew → signature → decrypt, raising a
//! distinct [`WireError`] per failure class.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};

use weft_crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use weft_crypto::{aead, shared_key};
use weft_types::MAX_SKEW_SECS;

use crate::envelope::{is_version_compatible, EncryptedPayload, Envelope, EnvelopeType, ENVELOPE_VERSION};
use crate::{Result, WireError};

/// Optional knobs for [`seal`].
#[derive(Clone, Debug, Default)]
pub struct SealOptions {
    /// Reuse a message id so a retried send keeps its identity.
    pub message_id: Option<String>,
    /// Address the envelope to a group.
    pub group_id: Option<String>,
    /// Override the envelope timestamp (tests only; defaults to now).
    pub timestamp: Option<String>,
}

/// A verified, decrypted inbound envelope.
#[derive(Clone, Debug)]
pub struct OpenedMessage {
    pub sender: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub group_id: Option<String>,
    pub payload: serde_json::Value,
    pub verified: bool,
}

/// Build a sealed envelope: encrypt the payload for the recipient and sign
/// the result with the sender's identity key.
pub fn seal(
    sender: &str,
    recipient: &str,
    payload: &serde_json::Value,
    sender_key: &SigningKey,
    recipient_public: &VerifyingKey,
    opts: SealOptions,
) -> Result<Envelope> {
    let message_id = opts
        .message_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let timestamp = opts
        .timestamp
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

    let key = shared_key::derive_shared_key(
        &sender_key.to_bytes(),
        recipient_public,
        sender,
        recipient,
    )?;

    let plaintext =
        serde_json::to_vec(payload).map_err(|e| WireError::Serialization(e.to_string()))?;
    let nonce = aead::random_nonce();
    let ciphertext = aead::encrypt(&key, &nonce, &plaintext, message_id.as_bytes())?;

    let kind = if opts.group_id.is_some() {
        EnvelopeType::Group
    } else {
        EnvelopeType::Direct
    };

    let body = EncryptedPayload {
        ciphertext: BASE64.encode(&ciphertext),
        nonce: BASE64.encode(nonce),
    };
    let mut envelope = Envelope {
        version: ENVELOPE_VERSION.to_string(),
        kind,
        message_id,
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        timestamp,
        group_id: opts.group_id,
        payload: serde_json::to_value(&body)
            .map_err(|e| WireError::Serialization(e.to_string()))?,
        signature: String::new(),
    };

    let signable = envelope.signable_payload()?;
    envelope.signature = sender_key.sign(&signable).to_base64();
    Ok(envelope)
}

/// Verify and decrypt an inbound envelope.
///
/// # Errors
///
/// - [`WireError::Shape`] — envelope fails shape validation
/// - [`WireError::Version`] — major version is not supported
/// - [`WireError::Skew`] — timestamp differs from `now` by more than 5 minutes
/// - [`WireError::Signature`] — Ed25519 verification fails
/// - [`WireError::Decrypt`] — base64 decode, GCM tag, or plaintext JSON fails
pub fn open(
    envelope: &Envelope,
    recipient_key: &SigningKey,
    sender_public: &VerifyingKey,
    now: DateTime<Utc>,
) -> Result<OpenedMessage> {
    envelope.validate()?;

    if !is_version_compatible(&envelope.version) {
        return Err(WireError::Version(envelope.version.clone()));
    }

    let timestamp = envelope.parsed_timestamp()?;
    let skew_secs = (now - timestamp).num_seconds().abs();
    if skew_secs > MAX_SKEW_SECS {
        return Err(WireError::Skew {
            skew_secs,
            limit_secs: MAX_SKEW_SECS,
        });
    }

    let signable = envelope.signable_payload()?;
    let signature =
        Signature::from_base64(&envelope.signature).map_err(|_| WireError::Signature)?;
    sender_public
        .verify(&signable, &signature)
        .map_err(|_| WireError::Signature)?;

    let body = envelope.encrypted_payload()?;
    let ciphertext = BASE64.decode(&body.ciphertext).map_err(|_| WireError::Decrypt)?;
    let nonce_bytes = BASE64.decode(&body.nonce).map_err(|_| WireError::Decrypt)?;
    let nonce: [u8; aead::NONCE_SIZE] =
        nonce_bytes.try_into().map_err(|_| WireError::Decrypt)?;

    let key = shared_key::derive_shared_key(
        &recipient_key.to_bytes(),
        sender_public,
        &envelope.recipient,
        &envelope.sender,
    )
    .map_err(|_| WireError::Decrypt)?;

    let plaintext = aead::decrypt(&key, &nonce, &ciphertext, envelope.message_id.as_bytes())
        .map_err(|_| WireError::Decrypt)?;
    let payload: serde_json::Value =
        serde_json::from_slice(&plaintext).map_err(|_| WireError::Decrypt)?;

    Ok(OpenedMessage {
        sender: envelope.sender.clone(),
        message_id: envelope.message_id.clone(),
        timestamp,
        group_id: envelope.group_id.clone(),
        payload,
        verified: true,
    })
}
