//! Identity lifecycle: registration, email verification, key rotation, and
//! cooled-off recovery.
//!
//! Every operation runs inside one transaction so status transitions and
//! uniqueness checks cannot race.

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use weft_crypto::ed25519::VerifyingKey;
use weft_db::queries::{agents, verifications};
use weft_types::{MAX_VERIFICATION_ATTEMPTS, RECOVERY_COOLING_OFF_SECS, VERIFICATION_TTL_SECS};

use crate::error::ApiError;
use crate::mailer::Mailer;

/// Registration input.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub public_key: String,
    pub email: String,
    pub endpoint: String,
}

/// Public registry view of an agent.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub name: String,
    pub public_key: String,
    pub status: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_updated_at: Option<i64>,
}

/// Register a new agent. The agent starts `pending`; a 6-digit code goes to
/// the owner's email and only its SHA-256 is stored.
pub fn register(
    conn: &mut Connection,
    mailer: &dyn Mailer,
    req: &RegisterRequest,
    now: i64,
) -> Result<(), ApiError> {
    validate_name(&req.name)?;
    validate_email(&req.email)?;
    validate_endpoint(&req.endpoint)?;
    VerifyingKey::from_base64(&req.public_key)
        .map_err(|_| ApiError::bad_request("publicKey is not a base64 SPKI Ed25519 key"))?;

    let code = generate_code();

    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    if agents::find(&tx, &req.name)?.is_some() {
        return Err(ApiError::conflict("Agent name already taken"));
    }
    if agents::public_key_in_use(&tx, &req.public_key, None)? {
        return Err(ApiError::conflict("Public key already registered"));
    }
    agents::insert(&tx, &req.name, &req.public_key, &req.email, &req.endpoint, now)?;
    verifications::upsert(
        &tx,
        &req.name,
        &req.email,
        &hash_code(&code),
        now + VERIFICATION_TTL_SECS,
    )?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;

    mailer.send_verification_code(&req.email, &req.name, &code);
    tracing::info!(agent = %req.name, "agent registered, verification pending");
    Ok(())
}

/// Verify the emailed code. Success promotes the agent to `active`. The
/// comparison is constant-time; five failures invalidate the challenge.
pub fn verify_email(conn: &mut Connection, name: &str, code: &str, now: i64) -> Result<(), ApiError> {
    if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::bad_request("Code must be 6 digits"));
    }

    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let agent = agents::find(&tx, name)?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    let row = verifications::find(&tx, name)?
        .ok_or_else(|| ApiError::gone("Verification expired or invalidated"))?;
    if row.verified && agent.email_verified {
        // Re-verification is a no-op.
        return Ok(());
    }
    if now > row.expires_at {
        return Err(ApiError::gone("Verification code expired"));
    }

    if !constant_time_eq(hash_code(code).as_bytes(), row.code_hash.as_bytes()) {
        let attempts = verifications::increment_attempts(&tx, name)?;
        if attempts >= MAX_VERIFICATION_ATTEMPTS {
            verifications::delete(&tx, name)?;
            tracing::warn!(agent = %name, "verification invalidated after repeated failures");
        }
        tx.commit().map_err(weft_db::DbError::Sqlite)?;
        return Err(ApiError::forbidden("Incorrect verification code"));
    }

    verifications::mark_verified(&tx, name)?;
    agents::mark_verified(&tx, name)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(agent = %name, "email verified, agent active");
    Ok(())
}

/// Rotate an agent's key.
///
/// Two paths: the agent itself (authenticated) rotates freely, or an active
/// recovery rotates to the pending key once the cooling-off has elapsed. A
/// key already bound to another agent is rejected.
pub fn rotate_key(
    conn: &mut Connection,
    name: &str,
    new_public_key: &str,
    authenticated_agent: Option<&str>,
    now: i64,
) -> Result<i64, ApiError> {
    VerifyingKey::from_base64(new_public_key)
        .map_err(|_| ApiError::bad_request("newPublicKey is not a base64 SPKI Ed25519 key"))?;

    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let agent = agents::find(&tx, name)?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    if let Some(initiated_at) = agent.recovery_initiated_at {
        if agent.pending_public_key.as_deref() != Some(new_public_key) {
            return Err(ApiError::bad_request(
                "Key does not match the pending recovery key",
            ));
        }
        if now - initiated_at < RECOVERY_COOLING_OFF_SECS {
            return Err(ApiError::forbidden(
                "Recovery cooling-off period has not elapsed",
            ));
        }
    } else if authenticated_agent != Some(name) {
        return Err(ApiError::forbidden("Cannot rotate another agent's key"));
    }

    if agents::public_key_in_use(&tx, new_public_key, Some(name))? {
        return Err(ApiError::conflict("Public key already registered"));
    }

    agents::update_key(&tx, name, new_public_key, now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(agent = %name, "public key rotated");
    Ok(now)
}

/// Initiate key recovery. Stores the candidate key and the initiation
/// instant; the registered key is untouched until rotation completes.
pub fn recover(
    conn: &mut Connection,
    name: &str,
    email: &str,
    new_public_key: &str,
    now: i64,
) -> Result<(), ApiError> {
    VerifyingKey::from_base64(new_public_key)
        .map_err(|_| ApiError::bad_request("newPublicKey is not a base64 SPKI Ed25519 key"))?;

    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let agent = agents::find(&tx, name)?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    if !agent.email_verified {
        return Err(ApiError::bad_request("Agent email is not verified"));
    }
    if !email.eq_ignore_ascii_case(&agent.owner_email) {
        return Err(ApiError::forbidden("Email does not match the registered owner"));
    }
    if agents::public_key_in_use(&tx, new_public_key, Some(name))? {
        return Err(ApiError::conflict("Public key already registered"));
    }

    agents::set_recovery(&tx, name, new_public_key, now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(agent = %name, "key recovery initiated");
    Ok(())
}

/// Public registry lookup.
pub fn profile(conn: &Connection, name: &str) -> Result<AgentProfile, ApiError> {
    let agent = agents::find(conn, name)?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;
    Ok(AgentProfile {
        name: agent.name,
        public_key: agent.public_key,
        status: agent.status,
        created_at: agent.created_at,
        key_updated_at: agent.key_updated_at,
    })
}

/// Is a recovery currently observable by the agent's contacts?
pub fn recovery_in_progress(recovery_initiated_at: Option<i64>, now: i64) -> bool {
    match recovery_initiated_at {
        Some(initiated_at) => now - initiated_at < RECOVERY_COOLING_OFF_SECS,
        None => false,
    }
}

fn generate_code() -> String {
    let n: u32 = rand::Rng::gen_range(&mut rand::rngs::OsRng, 0..1_000_000);
    format!("{n:06}")
}

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Length-checked constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(ApiError::bad_request(
            "Name must be 1-64 characters of [a-zA-Z0-9._-]",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::bad_request("Malformed email address"));
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ApiError> {
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(ApiError::bad_request("Endpoint must be an http(s) URL"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use weft_crypto::ed25519::KeyPair;

    use crate::mailer::CapturingMailer;

    fn test_key() -> String {
        KeyPair::generate().verifying_key.to_base64().expect("key")
    }

    fn req(name: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.to_string(),
            public_key: test_key(),
            email: format!("{name}@example.com"),
            endpoint: "https://agent.test/inbox".to_string(),
        }
    }

    fn setup() -> (Connection, Arc<CapturingMailer>) {
        (weft_db::open_memory().expect("db"), Arc::new(CapturingMailer::default()))
    }

    fn register_and_verify(conn: &mut Connection, mailer: &CapturingMailer, name: &str) {
        register(conn, mailer, &req(name), 1000).expect("register");
        let code = mailer.last_code().expect("code issued");
        verify_email(conn, name, &code, 1001).expect("verify");
    }

    #[test]
    fn test_register_creates_pending_agent() {
        let (mut conn, mailer) = setup();
        register(&mut conn, mailer.as_ref(), &req("atlas"), 1000).expect("register");

        let agent = agents::get(&conn, "atlas").expect("get");
        assert_eq!(agent.status, "pending");
        assert!(!agent.email_verified);
        assert!(mailer.last_code().is_some());
    }

    #[test]
    fn test_register_duplicate_name_is_conflict() {
        let (mut conn, mailer) = setup();
        register(&mut conn, mailer.as_ref(), &req("atlas"), 1000).expect("register");
        let err = register(&mut conn, mailer.as_ref(), &req("atlas"), 1001).expect_err("dup");
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_register_duplicate_key_is_conflict() {
        let (mut conn, mailer) = setup();
        let first = req("atlas");
        let mut second = req("bmo");
        second.public_key = first.public_key.clone();
        register(&mut conn, mailer.as_ref(), &first, 1000).expect("register");
        let err = register(&mut conn, mailer.as_ref(), &second, 1001).expect_err("dup key");
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_register_rejects_malformed_inputs() {
        let (mut conn, mailer) = setup();

        let mut bad_email = req("atlas");
        bad_email.email = "not-an-email".to_string();
        assert_eq!(
            register(&mut conn, mailer.as_ref(), &bad_email, 1000)
                .expect_err("email")
                .status,
            StatusCode::BAD_REQUEST
        );

        let mut bad_name = req("atlas");
        bad_name.name = "spaces not allowed".to_string();
        assert_eq!(
            register(&mut conn, mailer.as_ref(), &bad_name, 1000)
                .expect_err("name")
                .status,
            StatusCode::BAD_REQUEST
        );

        let mut bad_key = req("atlas");
        bad_key.public_key = "bm90IGEga2V5".to_string();
        assert_eq!(
            register(&mut conn, mailer.as_ref(), &bad_key, 1000)
                .expect_err("key")
                .status,
            StatusCode::BAD_REQUEST
        );

        let mut bad_endpoint = req("atlas");
        bad_endpoint.endpoint = "ftp://agent.test".to_string();
        assert_eq!(
            register(&mut conn, mailer.as_ref(), &bad_endpoint, 1000)
                .expect_err("endpoint")
                .status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_verify_promotes_agent() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");

        let agent = agents::get(&conn, "atlas").expect("get");
        assert_eq!(agent.status, "active");
        assert!(agent.email_verified);
    }

    #[test]
    fn test_verify_wrong_code_then_right_code() {
        let (mut conn, mailer) = setup();
        register(&mut conn, mailer.as_ref(), &req("atlas"), 1000).expect("register");
        let code = mailer.last_code().expect("code");
        let wrong = if code == "000000" { "000001" } else { "000000" };

        let err = verify_email(&mut conn, "atlas", wrong, 1001).expect_err("wrong code");
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        verify_email(&mut conn, "atlas", &code, 1002).expect("right code still works");
    }

    #[test]
    fn test_verify_invalidated_after_five_failures() {
        let (mut conn, mailer) = setup();
        register(&mut conn, mailer.as_ref(), &req("atlas"), 1000).expect("register");
        let code = mailer.last_code().expect("code");
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 0..5 {
            let err = verify_email(&mut conn, "atlas", wrong, 1001).expect_err("wrong");
            assert_eq!(err.status, StatusCode::FORBIDDEN);
        }
        // The challenge is gone now, even for the correct code.
        let err = verify_email(&mut conn, "atlas", &code, 1002).expect_err("invalidated");
        assert_eq!(err.status, StatusCode::GONE);
    }

    #[test]
    fn test_verify_expired_code() {
        let (mut conn, mailer) = setup();
        register(&mut conn, mailer.as_ref(), &req("atlas"), 1000).expect("register");
        let code = mailer.last_code().expect("code");

        let err = verify_email(&mut conn, "atlas", &code, 1000 + VERIFICATION_TTL_SECS + 1)
            .expect_err("expired");
        assert_eq!(err.status, StatusCode::GONE);
    }

    #[test]
    fn test_verify_malformed_code_is_bad_request() {
        let (mut conn, mailer) = setup();
        register(&mut conn, mailer.as_ref(), &req("atlas"), 1000).expect("register");
        let err = verify_email(&mut conn, "atlas", "12ab56", 1001).expect_err("shape");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rotate_key_by_owner() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");

        let new_key = test_key();
        rotate_key(&mut conn, "atlas", &new_key, Some("atlas"), 2000).expect("rotate");

        let agent = agents::get(&conn, "atlas").expect("get");
        assert_eq!(agent.public_key, new_key);
        assert_eq!(agent.key_updated_at, Some(2000));
    }

    #[test]
    fn test_rotate_key_wrong_agent_forbidden() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");

        let err = rotate_key(&mut conn, "atlas", &test_key(), Some("bmo"), 2000)
            .expect_err("forbidden");
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_rotate_key_collision_conflict() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");
        register_and_verify(&mut conn, &mailer, "bmo");
        let bmo_key = agents::get(&conn, "bmo").expect("get").public_key;

        let err = rotate_key(&mut conn, "atlas", &bmo_key, Some("atlas"), 2000)
            .expect_err("collision");
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_recover_requires_verified_email() {
        let (mut conn, mailer) = setup();
        register(&mut conn, mailer.as_ref(), &req("atlas"), 1000).expect("register");

        let err = recover(&mut conn, "atlas", "atlas@example.com", &test_key(), 2000)
            .expect_err("unverified");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_recover_wrong_email_forbidden() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");

        let err = recover(&mut conn, "atlas", "mallory@example.com", &test_key(), 2000)
            .expect_err("wrong email");
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_recover_email_match_is_case_insensitive() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");

        recover(&mut conn, "atlas", "Atlas@Example.COM", &test_key(), 2000).expect("recover");
        let agent = agents::get(&conn, "atlas").expect("get");
        assert!(agent.pending_public_key.is_some());
        assert_eq!(agent.recovery_initiated_at, Some(2000));
    }

    #[test]
    fn test_recover_does_not_mutate_public_key() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");
        let original = agents::get(&conn, "atlas").expect("get").public_key;

        recover(&mut conn, "atlas", "atlas@example.com", &test_key(), 2000).expect("recover");
        assert_eq!(agents::get(&conn, "atlas").expect("get").public_key, original);
    }

    #[test]
    fn test_recover_rejects_key_collision() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");
        register_and_verify(&mut conn, &mailer, "bmo");
        let bmo_key = agents::get(&conn, "bmo").expect("get").public_key;

        let err = recover(&mut conn, "atlas", "atlas@example.com", &bmo_key, 2000)
            .expect_err("collision");
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_recovery_cooling_off_timeline() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");
        let recovery_key = test_key();
        recover(&mut conn, "atlas", "atlas@example.com", &recovery_key, 10_000).expect("recover");

        // Immediately: 403 cooling-off.
        let err = rotate_key(&mut conn, "atlas", &recovery_key, None, 10_001)
            .expect_err("too early");
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert!(err.message.to_lowercase().contains("cooling"));

        // A different key after cooling-off: 400 mismatch.
        let err = rotate_key(
            &mut conn,
            "atlas",
            &test_key(),
            None,
            10_000 + RECOVERY_COOLING_OFF_SECS,
        )
        .expect_err("mismatch");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        // The pending key at exactly one hour: success, state cleared.
        rotate_key(
            &mut conn,
            "atlas",
            &recovery_key,
            None,
            10_000 + RECOVERY_COOLING_OFF_SECS,
        )
        .expect("rotate");
        let agent = agents::get(&conn, "atlas").expect("get");
        assert_eq!(agent.public_key, recovery_key);
        assert!(agent.pending_public_key.is_none());
        assert!(agent.recovery_initiated_at.is_none());
    }

    #[test]
    fn test_recovery_in_progress_window() {
        assert!(!recovery_in_progress(None, 1000));
        assert!(recovery_in_progress(Some(1000), 1000 + 3599));
        assert!(!recovery_in_progress(Some(1000), 1000 + 3600));
    }

    #[test]
    fn test_profile_lookup() {
        let (mut conn, mailer) = setup();
        register_and_verify(&mut conn, &mailer, "atlas");

        let profile = profile(&conn, "atlas").expect("profile");
        assert_eq!(profile.name, "atlas");
        assert_eq!(profile.status, "active");

        let err = super::profile(&conn, "ghost").expect_err("absent");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
