//! Request authentication.
//!
//! Protected endpoints carry `X-Timestamp` and
//! `Authorization: Signature <agent>:<base64>`; the signature covers
//! `"{METHOD} {PATH}\n{TIMESTAMP}\n{SHA256_HEX(body)}"`. Verification
//! enforces the ±5-minute window, requires the agent to be `active`, and
//! checks the signature against the agent's current registered key.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use weft_crypto::ed25519::VerifyingKey;
use weft_db::queries::agents;
use weft_types::AgentStatus;
use weft_wire::reqsig;

use crate::error::ApiError;

/// Pieces of a signed request pulled from the headers.
pub struct SignedHeaders {
    pub agent: String,
    pub timestamp: String,
    pub signature: weft_crypto::ed25519::Signature,
}

/// Parse and skew-check the auth headers without touching the database.
pub fn parse_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Result<SignedHeaders, ApiError> {
    let timestamp = headers
        .get(reqsig::TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing X-Timestamp header"))?
        .to_string();
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

    reqsig::check_skew(&timestamp, now)?;
    let (agent, signature) = reqsig::parse_authorization(authorization)?;

    Ok(SignedHeaders {
        agent,
        timestamp,
        signature,
    })
}

/// Authenticate a request: returns the verified agent name.
pub fn authenticate(
    conn: &Connection,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<String, ApiError> {
    let signed = parse_headers(headers, now)?;

    let agent = agents::find(conn, &signed.agent)?
        .ok_or_else(|| ApiError::unauthorized("Unknown agent"))?;
    if agent.status != AgentStatus::Active.as_str() {
        return Err(ApiError::forbidden("Agent is not active"));
    }

    let public = VerifyingKey::from_base64(&agent.public_key)
        .map_err(|_| ApiError::internal("Stored public key is unreadable"))?;
    reqsig::verify_request(
        &public,
        method,
        path,
        &signed.timestamp,
        body,
        &signed.signature,
    )?;

    Ok(signed.agent)
}
