//! Detached signatures over relay HTTP requests.
//!
//! Every relay-bound request carries two headers:
//!
//! ```text
//! X-Timestamp:   <RFC 3339 UTC>
//! Authorization: Signature <agent>:<base64 Ed25519>
//! ```
//!
//! The signed string is exactly
//!
//! ```text
//! {METHOD} {PATH}\n{TIMESTAMP}\n{SHA256_HEX(body)}
//! ```
//!
//! with the body hashed as the empty string when absent. PATH is the URI
//! path component without the query string. The verifier enforces a
//! ±5-minute timestamp skew.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use weft_crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use weft_types::MAX_SKEW_SECS;

use crate::{Result, WireError};

/// Authorization scheme token.
pub const AUTH_SCHEME: &str = "Signature";

/// Timestamp header name.
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Headers produced for a signed request.
#[derive(Clone, Debug)]
pub struct RequestSignature {
    /// `X-Timestamp` value.
    pub timestamp: String,
    /// `Authorization` value (`Signature <agent>:<base64>`).
    pub authorization: String,
}

/// Hex SHA-256 of a request body (empty body hashes the empty string).
pub fn body_sha256_hex(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Build the exact string the request signature covers.
pub fn signing_string(method: &str, path: &str, timestamp: &str, body: &[u8]) -> String {
    format!(
        "{} {}\n{}\n{}",
        method.to_uppercase(),
        path,
        timestamp,
        body_sha256_hex(body)
    )
}

/// Sign a relay-bound request with the agent's identity key.
pub fn sign_request(
    agent: &str,
    key: &SigningKey,
    method: &str,
    path: &str,
    body: &[u8],
) -> RequestSignature {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    sign_request_at(agent, key, method, path, body, &timestamp)
}

/// Sign with an explicit timestamp (verification tests).
pub fn sign_request_at(
    agent: &str,
    key: &SigningKey,
    method: &str,
    path: &str,
    body: &[u8],
    timestamp: &str,
) -> RequestSignature {
    let signature = key.sign(signing_string(method, path, timestamp, body).as_bytes());
    RequestSignature {
        timestamp: timestamp.to_string(),
        authorization: format!("{AUTH_SCHEME} {agent}:{}", signature.to_base64()),
    }
}

/// Parse an `Authorization: Signature <agent>:<base64>` header.
pub fn parse_authorization(header: &str) -> Result<(String, Signature)> {
    let rest = header
        .strip_prefix(AUTH_SCHEME)
        .and_then(|r| r.strip_prefix(' '))
        .ok_or_else(|| WireError::Shape("authorization scheme must be Signature".into()))?;
    let (agent, sig_b64) = rest
        .split_once(':')
        .ok_or_else(|| WireError::Shape("authorization must be <agent>:<signature>".into()))?;
    if agent.is_empty() {
        return Err(WireError::Shape("empty agent in authorization".into()));
    }
    let signature = Signature::from_base64(sig_b64).map_err(|_| WireError::Signature)?;
    Ok((agent.to_string(), signature))
}

/// Enforce the ±5-minute window on a request timestamp.
pub fn check_skew(timestamp: &str, now: DateTime<Utc>) -> Result<()> {
    let ts = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| WireError::Shape(format!("bad X-Timestamp: {e}")))?
        .with_timezone(&Utc);
    let skew_secs = (now - ts).num_seconds().abs();
    if skew_secs > MAX_SKEW_SECS {
        return Err(WireError::Skew {
            skew_secs,
            limit_secs: MAX_SKEW_SECS,
        });
    }
    Ok(())
}

/// Verify a request signature against the agent's current public key.
pub fn verify_request(
    public: &VerifyingKey,
    method: &str,
    path: &str,
    timestamp: &str,
    body: &[u8],
    signature: &Signature,
) -> Result<()> {
    public
        .verify(signing_string(method, path, timestamp, body).as_bytes(), signature)
        .map_err(|_| WireError::Signature)
}
