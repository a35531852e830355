//! Signed relay HTTP client.
//!
//! Every request is retried up to two extra times (three total) with
//! `200 ms · (attempt + 1)` backoff when the transport errors or the body is
//! not parseable JSON — the latter guards against middlebox HTML
//! interstitials. JSON error responses (4xx/5xx) are never retried.
//! Per-attempt timeout is 10 seconds.

use std::time::Duration;

use serde_json::Value;

use weft_crypto::ed25519::SigningKey;
use weft_wire::reqsig;

use crate::{ClientError, Result};

/// Total attempts per request (1 + 2 retries).
const MAX_ATTEMPTS: u32 = 3;

/// Per-attempt deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Base backoff between attempts.
const BACKOFF_STEP: Duration = Duration::from_millis(200);

/// A signed HTTP client bound to one agent identity and one relay.
#[derive(Clone)]
pub struct RelayApi {
    base_url: String,
    agent: String,
    key: SigningKey,
    http: reqwest::Client,
}

impl RelayApi {
    /// Build a client for the given agent against the given relay.
    pub fn new(base_url: impl Into<String>, agent: impl Into<String>, key: SigningKey) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent: agent.into(),
            key,
            http,
        }
    }

    /// Issue a signed request. `path` may carry a query string; only the
    /// path component is signed.
    pub async fn call(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value> {
        self.dispatch(method, path, body, true).await
    }

    /// Issue an unsigned request (register, verify, recover).
    pub async fn call_public(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value> {
        self.dispatch(method, path, body, false).await
    }

    async fn dispatch(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        signed: bool,
    ) -> Result<Value> {
        let payload = match body {
            Some(value) => serde_json::to_vec(value)
                .map_err(|e| ClientError::Serialization(e.to_string()))?,
            None => Vec::new(),
        };
        let url = format!("{}{}", self.base_url, path);
        let signing_path = path.split('?').next().unwrap_or(path);

        let mut last_transport = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_STEP * (attempt + 1)).await;
            }

            let verb: reqwest::Method = method
                .parse()
                .map_err(|_| ClientError::Transport(format!("bad method: {method}")))?;
            let mut request = self
                .http
                .request(verb, &url)
                .header("content-type", "application/json")
                .body(payload.clone());
            if signed {
                let sig = reqsig::sign_request(
                    &self.agent,
                    &self.key,
                    method,
                    signing_path,
                    &payload,
                );
                request = request
                    .header(reqsig::TIMESTAMP_HEADER, sig.timestamp)
                    .header("Authorization", sig.authorization);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_transport = e.to_string();
                    tracing::debug!(attempt, error = %last_transport, "relay request failed");
                    continue;
                }
            };

            let status = response.status().as_u16();
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    last_transport = e.to_string();
                    continue;
                }
            };

            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => {
                    if (200..300).contains(&status) {
                        return Ok(value);
                    }
                    // A JSON error is authoritative: no retry.
                    let message = value
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("request failed")
                        .to_string();
                    return Err(ClientError::Api { status, message });
                }
                Err(_) => {
                    if attempt + 1 == MAX_ATTEMPTS {
                        return Err(ClientError::NonJson { status });
                    }
                    tracing::debug!(attempt, status, "non-JSON relay response, retrying");
                }
            }
        }
        Err(ClientError::Transport(last_transport))
    }

    // ---- identity -------------------------------------------------------

    /// Register this agent (public endpoint).
    pub async fn register(&self, public_key: &str, email: &str, endpoint: &str) -> Result<Value> {
        self.call_public(
            "POST",
            "/registry/agents",
            Some(&serde_json::json!({
                "name": self.agent,
                "publicKey": public_key,
                "email": email,
                "endpoint": endpoint,
            })),
        )
        .await
    }

    /// Submit the emailed verification code (public endpoint).
    pub async fn verify(&self, code: &str) -> Result<Value> {
        self.call_public(
            "POST",
            &format!("/registry/agents/{}/verify", self.agent),
            Some(&serde_json::json!({"code": code})),
        )
        .await
    }

    /// Rotate to a new public key.
    pub async fn rotate_key(&self, new_public_key: &str) -> Result<Value> {
        self.call(
            "POST",
            &format!("/registry/agents/{}/rotate-key", self.agent),
            Some(&serde_json::json!({"newPublicKey": new_public_key})),
        )
        .await
    }

    /// Initiate key recovery (public endpoint).
    pub async fn recover(&self, email: &str, new_public_key: &str) -> Result<Value> {
        self.call_public(
            "POST",
            "/recover",
            Some(&serde_json::json!({
                "name": self.agent,
                "email": email,
                "newPublicKey": new_public_key,
            })),
        )
        .await
    }

    /// Public registry lookup of any agent.
    pub async fn agent_profile(&self, name: &str) -> Result<Value> {
        self.call_public("GET", &format!("/registry/agents/{name}"), None).await
    }

    // ---- contacts -------------------------------------------------------

    /// Request contact with another agent.
    pub async fn contact_request(&self, to_agent: &str) -> Result<Value> {
        self.call(
            "POST",
            "/contacts/request",
            Some(&serde_json::json!({"toAgent": to_agent})),
        )
        .await
    }

    /// Pending inbound requests.
    pub async fn pending_contacts(&self) -> Result<Value> {
        self.call("GET", "/contacts/pending", None).await
    }

    /// Accept a pending request.
    pub async fn accept_contact(&self, from_agent: &str) -> Result<Value> {
        self.call("POST", &format!("/contacts/{from_agent}/accept"), None).await
    }

    /// Deny a pending request.
    pub async fn deny_contact(&self, from_agent: &str) -> Result<Value> {
        self.call("POST", &format!("/contacts/{from_agent}/deny"), None).await
    }

    /// Remove an active contact.
    pub async fn remove_contact(&self, agent: &str) -> Result<Value> {
        self.call("DELETE", &format!("/contacts/{agent}"), None).await
    }

    /// The active contact list.
    pub async fn contacts(&self) -> Result<Value> {
        self.call("GET", "/contacts", None).await
    }

    // ---- presence -------------------------------------------------------

    /// Stamp this agent's presence.
    pub async fn heartbeat(&self) -> Result<Value> {
        self.call("PUT", "/presence", None).await
    }

    /// Presence of one agent.
    pub async fn presence(&self, agent: &str) -> Result<Value> {
        self.call("GET", &format!("/presence/{agent}"), None).await
    }

    // ---- groups ---------------------------------------------------------

    /// Create a group.
    pub async fn create_group(&self, body: &Value) -> Result<Value> {
        self.call("POST", "/groups", Some(body)).await
    }

    /// Invite an agent to a group.
    pub async fn invite_to_group(&self, group_id: &str, agent: &str) -> Result<Value> {
        self.call(
            "POST",
            &format!("/groups/{group_id}/invite"),
            Some(&serde_json::json!({"agent": agent})),
        )
        .await
    }

    /// Accept a group invitation.
    pub async fn accept_group(&self, group_id: &str) -> Result<Value> {
        self.call("POST", &format!("/groups/{group_id}/accept"), None).await
    }

    /// Group change log since a given instant.
    pub async fn group_changes(&self, group_id: &str, since: i64) -> Result<Value> {
        self.call("GET", &format!("/groups/{group_id}/changes?since={since}"), None)
            .await
    }
}
