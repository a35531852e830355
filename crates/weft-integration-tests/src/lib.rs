//! Integration test helpers for the Weft workspace.
//!
//! The scenario tests live in `tests/`; this library only hosts shared
//! fixtures.

use rusqlite::Connection;

use weft_crypto::ed25519::KeyPair;
use weft_db::queries::agents;
use weft_relay::mailer::CapturingMailer;

/// An agent fixture: a keypair plus its base64 SPKI public key.
pub struct TestAgent {
    pub name: String,
    pub keys: KeyPair,
    pub public_key: String,
}

impl TestAgent {
    pub fn new(name: &str) -> Self {
        let keys = KeyPair::generate();
        let public_key = keys.verifying_key.to_base64().expect("encode key");
        Self {
            name: name.to_string(),
            keys,
            public_key,
        }
    }
}

/// Register and verify an agent through the real identity manager.
pub fn register_active(conn: &mut Connection, mailer: &CapturingMailer, agent: &TestAgent, now: i64) {
    weft_relay::identity::register(
        conn,
        mailer,
        &weft_relay::identity::RegisterRequest {
            name: agent.name.clone(),
            public_key: agent.public_key.clone(),
            email: format!("{}@example.com", agent.name),
            endpoint: format!("https://{}.test/inbox", agent.name),
        },
        now,
    )
    .expect("register");
    let code = mailer.last_code().expect("verification code");
    weft_relay::identity::verify_email(conn, &agent.name, &code, now + 1).expect("verify");
    let row = agents::get(conn, &agent.name).expect("agent row");
    assert_eq!(row.status, "active");
}
