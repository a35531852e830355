//! The agent send/receive engine.
//!
//! Outbound: resolve the recipient through the contact cache (refreshing
//! from the relay on a miss), seal an envelope, POST it to the recipient's
//! inbox. Dispatch is presence-aware: a peer known offline is not worth a
//! direct delivery attempt, so the sealed envelope goes straight to the
//! retry queue, and the queue's send function applies the same gate on
//! every retry. Transport failures likewise hand the envelope to the queue,
//! which re-sends it byte-identically under the same message id.
//!
//! Inbound: the host's HTTP server passes raw POST bodies to
//! [`AgentClient::handle_incoming`], which verifies and decrypts the
//! envelope and emits an [`IncomingMessage`] event. A signature failure
//! triggers one contact refresh and retry, which absorbs peer key rotation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use weft_crypto::ed25519::{SigningKey, VerifyingKey};
use weft_types::events::{DeliveryEvent, IncomingMessage};
use weft_wire::envelope::Envelope;
use weft_wire::seal::{self, SealOptions};
use weft_wire::WireError;

use crate::api::RelayApi;
use crate::cache::{CachedContact, ContactCache};
use crate::config::AgentConfig;
use crate::retry::{RetryConfig, RetryQueue};
use crate::{ClientError, Result};

/// Peer-to-peer delivery deadline.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// One agent process: identity, relay client, cache, and delivery engine.
pub struct AgentClient {
    name: String,
    signing_key: SigningKey,
    api: RelayApi,
    cache: ContactCache,
    queue: RetryQueue,
    incoming: broadcast::Sender<IncomingMessage>,
    http: reqwest::Client,
}

impl AgentClient {
    /// Assemble an agent with the default retry configuration.
    pub fn new(config: &AgentConfig, signing_key: SigningKey) -> Result<Self> {
        Self::with_retry_config(config, signing_key, RetryConfig::default())
    }

    /// Assemble an agent with explicit retry tuning.
    pub fn with_retry_config(
        config: &AgentConfig,
        signing_key: SigningKey,
        retry: RetryConfig,
    ) -> Result<Self> {
        let cache = ContactCache::open(&config.data_dir, &config.community)?;
        let api = RelayApi::new(&config.relay_url, &config.name, signing_key.clone());
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_default();

        let queue = RetryQueue::new(retry, {
            let http = http.clone();
            let cache = cache.clone();
            let api = api.clone();
            Arc::new(move |message| {
                let http = http.clone();
                let cache = cache.clone();
                let api = api.clone();
                Box::pin(async move {
                    let Some(contact) = cache.find(&message.recipient) else {
                        tracing::debug!(recipient = %message.recipient, "no cached endpoint");
                        return false;
                    };
                    if !peer_reachable(&api, &cache, &contact).await {
                        tracing::debug!(
                            recipient = %message.recipient,
                            "peer offline, skipping delivery attempt"
                        );
                        return false;
                    }
                    deliver(&http, &contact.endpoint, &message.envelope).await
                })
            })
        });

        let (incoming, _) = broadcast::channel(256);
        Ok(Self {
            name: config.name.clone(),
            signing_key,
            api,
            cache,
            queue,
            incoming,
            http,
        })
    }

    /// The signed relay API client.
    pub fn relay(&self) -> &RelayApi {
        &self.api
    }

    /// The delivery queue (for status inspection).
    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Subscribe to verified inbound messages.
    pub fn subscribe_incoming(&self) -> broadcast::Receiver<IncomingMessage> {
        self.incoming.subscribe()
    }

    /// Subscribe to delivery-status events.
    pub fn subscribe_delivery(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.queue.subscribe()
    }

    /// Send a direct message. Returns the message id; delivery progress for
    /// queued sends arrives on the status stream.
    pub async fn send(&self, recipient: &str, payload: &serde_json::Value) -> Result<String> {
        self.send_with(recipient, payload, None).await
    }

    /// Send within a group context.
    pub async fn send_in_group(
        &self,
        group_id: &str,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<String> {
        self.send_with(recipient, payload, Some(group_id.to_string())).await
    }

    async fn send_with(
        &self,
        recipient: &str,
        payload: &serde_json::Value,
        group_id: Option<String>,
    ) -> Result<String> {
        let contact = self.resolve(recipient).await?;
        let recipient_key = VerifyingKey::from_base64(&contact.public_key)
            .map_err(|e| ClientError::Wire(WireError::Crypto(e)))?;

        let envelope = seal::seal(
            &self.name,
            recipient,
            payload,
            &self.signing_key,
            &recipient_key,
            SealOptions {
                group_id: group_id.clone(),
                ..Default::default()
            },
        )?;
        let message_id = envelope.message_id.clone();
        let envelope_json = serde_json::to_value(&envelope)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;

        // A peer known offline is not worth the direct attempt; park the
        // envelope and let the queue watch for it coming back.
        if !peer_reachable(&self.api, &self.cache, &contact).await {
            tracing::debug!(recipient, message_id, "peer offline, queueing without direct send");
            return self
                .enqueue(message_id, recipient.to_string(), envelope_json, group_id)
                .await;
        }

        match self
            .http
            .post(&contact.endpoint)
            .json(&envelope_json)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(recipient, message_id, "delivered directly");
                Ok(message_id)
            }
            Ok(response) if response.status().is_client_error() => {
                Err(ClientError::Api {
                    status: response.status().as_u16(),
                    message: "Recipient inbox rejected the envelope".to_string(),
                })
            }
            outcome => {
                if let Err(e) = &outcome {
                    tracing::debug!(recipient, error = %e, "direct send failed, queueing");
                }
                self.enqueue(message_id, recipient.to_string(), envelope_json, group_id)
                    .await
            }
        }
    }

    async fn enqueue(
        &self,
        message_id: String,
        recipient: String,
        envelope_json: serde_json::Value,
        group_id: Option<String>,
    ) -> Result<String> {
        let queued = self
            .queue
            .enqueue(message_id.clone(), recipient, envelope_json, group_id)
            .await;
        if !queued {
            return Err(ClientError::QueueFull);
        }
        Ok(message_id)
    }

    /// Verify and decrypt a raw inbound envelope, emitting the message event.
    pub async fn handle_incoming(&self, body: &[u8]) -> Result<IncomingMessage> {
        let envelope = Envelope::from_json(body)?;
        let sender = envelope.sender.clone();

        let contact = self.resolve(&sender).await?;
        let opened = match self.open_from(&envelope, &contact) {
            Err(ClientError::Wire(WireError::Signature)) => {
                // The sender may have rotated keys since our last refresh.
                let refreshed = self.refresh_contacts().await?;
                let contact = refreshed
                    .into_iter()
                    .find(|c| c.agent == sender)
                    .ok_or_else(|| ClientError::NotAContact(sender.clone()))?;
                self.open_from(&envelope, &contact)?
            }
            other => other?,
        };

        let message = IncomingMessage {
            sender: opened.sender,
            message_id: opened.message_id,
            timestamp: opened.timestamp.to_rfc3339(),
            group_id: opened.group_id,
            payload: opened.payload,
        };
        let _ = self.incoming.send(message.clone());
        Ok(message)
    }

    fn open_from(
        &self,
        envelope: &Envelope,
        contact: &CachedContact,
    ) -> Result<weft_wire::seal::OpenedMessage> {
        let sender_key = VerifyingKey::from_base64(&contact.public_key)
            .map_err(|e| ClientError::Wire(WireError::Crypto(e)))?;
        Ok(seal::open(envelope, &self.signing_key, &sender_key, Utc::now())?)
    }

    /// Stamp presence with the relay.
    pub async fn heartbeat(&self) -> Result<()> {
        self.api.heartbeat().await.map(|_| ())
    }

    /// Pull the contact list from the relay and replace the local snapshot.
    pub async fn refresh_contacts(&self) -> Result<Vec<CachedContact>> {
        let listed = self.api.contacts().await?;
        let contacts: Vec<CachedContact> = listed
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        Some(CachedContact {
                            agent: row.get("agent")?.as_str()?.to_string(),
                            public_key: row.get("publicKey")?.as_str()?.to_string(),
                            endpoint: row.get("endpoint")?.as_str()?.to_string(),
                            online: row
                                .get("online")
                                .and_then(serde_json::Value::as_bool)
                                .unwrap_or(false),
                            key_updated_at: row.get("keyUpdatedAt").and_then(|v| v.as_i64()),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.cache.store(&contacts, Utc::now().timestamp())?;
        Ok(contacts)
    }

    /// Resolve a peer: cache hit, or refresh once from the relay.
    async fn resolve(&self, agent: &str) -> Result<CachedContact> {
        if let Some(contact) = self.cache.find(agent) {
            return Ok(contact);
        }
        self.refresh_contacts()
            .await?
            .into_iter()
            .find(|c| c.agent == agent)
            .ok_or_else(|| ClientError::NotAContact(agent.to_string()))
    }
}

/// Is the peer worth a delivery attempt right now?
///
/// A peer marked online in the snapshot is trusted. For one marked offline
/// the relay is asked for a fresh answer (and the snapshot updated when the
/// peer has come back); if the relay cannot be reached the snapshot stands.
async fn peer_reachable(api: &RelayApi, cache: &ContactCache, contact: &CachedContact) -> bool {
    if contact.online {
        return true;
    }
    match api.presence(&contact.agent).await {
        Ok(view) => {
            let online = view
                .get("online")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            if online {
                if let Err(e) =
                    cache.set_online(&contact.agent, true, Utc::now().timestamp())
                {
                    tracing::debug!(agent = %contact.agent, error = %e, "presence cache update failed");
                }
            }
            online
        }
        Err(e) => {
            tracing::debug!(agent = %contact.agent, error = %e, "presence check failed");
            false
        }
    }
}

/// POST a sealed envelope to a peer inbox.
async fn deliver(http: &reqwest::Client, endpoint: &str, envelope: &serde_json::Value) -> bool {
    match http.post(endpoint).json(envelope).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(endpoint, error = %e, "inbox delivery failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use weft_crypto::ed25519::KeyPair;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("weft-agent-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn agent_config(name: &str, dir: &PathBuf) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            // Nothing listens here; relay calls fail as transport errors.
            relay_url: "http://127.0.0.1:1".to_string(),
            data_dir: dir.clone(),
            community: "default".to_string(),
        }
    }

    fn cached(name: &str, kp: &KeyPair, endpoint: &str) -> CachedContact {
        CachedContact {
            agent: name.to_string(),
            public_key: kp.verifying_key.to_base64().expect("key"),
            endpoint: endpoint.to_string(),
            online: true,
            key_updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_handle_incoming_roundtrip() {
        let alice_dir = temp_dir();
        let alice_keys = KeyPair::generate();
        let bob_keys = KeyPair::generate();

        // Alice knows Bob from her cache.
        let alice = AgentClient::new(
            &agent_config("atlas", &alice_dir),
            SigningKey::from_bytes(&alice_keys.signing_key.to_bytes()),
        )
        .expect("client");
        alice
            .cache
            .store(&[cached("bmo", &bob_keys, "http://127.0.0.1:1")], 1000)
            .expect("seed cache");

        let mut events = alice.subscribe_incoming();

        // Bob seals an envelope to Alice.
        let envelope = seal::seal(
            "bmo",
            "atlas",
            &serde_json::json!({"text": "hello atlas"}),
            &bob_keys.signing_key,
            &alice_keys.verifying_key,
            SealOptions::default(),
        )
        .expect("seal");
        let body = serde_json::to_vec(&envelope).expect("body");

        let message = alice.handle_incoming(&body).await.expect("open");
        assert_eq!(message.sender, "bmo");
        assert_eq!(message.payload["text"], "hello atlas");

        let event = events.try_recv().expect("event emitted");
        assert_eq!(event.message_id, message.message_id);
    }

    #[tokio::test]
    async fn test_handle_incoming_rejects_tamper() {
        let dir = temp_dir();
        let alice_keys = KeyPair::generate();
        let bob_keys = KeyPair::generate();

        let alice = AgentClient::new(
            &agent_config("atlas", &dir),
            SigningKey::from_bytes(&alice_keys.signing_key.to_bytes()),
        )
        .expect("client");
        alice
            .cache
            .store(&[cached("bmo", &bob_keys, "http://127.0.0.1:1")], 1000)
            .expect("seed cache");

        let mut envelope = seal::seal(
            "bmo",
            "atlas",
            &serde_json::json!({"text": "hi"}),
            &bob_keys.signing_key,
            &alice_keys.verifying_key,
            SealOptions::default(),
        )
        .expect("seal");
        envelope.recipient = "carol".to_string();
        let body = serde_json::to_vec(&envelope).expect("body");

        let err = alice.handle_incoming(&body).await.expect_err("tampered");
        // The signature no longer verifies; the refresh fallback cannot
        // reach the (absent) relay, so a transport error is also acceptable.
        assert!(matches!(
            err,
            ClientError::Wire(WireError::Signature) | ClientError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_send_queues_on_unreachable_inbox() {
        let dir = temp_dir();
        let alice_keys = KeyPair::generate();
        let bob_keys = KeyPair::generate();

        let retry = RetryConfig {
            tick: Duration::from_millis(50),
            // Long backoffs: the entry must still be parked when asserted.
            schedule: vec![Duration::from_secs(600), Duration::from_secs(600)],
            ..Default::default()
        };
        let alice = AgentClient::with_retry_config(
            &agent_config("atlas", &dir),
            SigningKey::from_bytes(&alice_keys.signing_key.to_bytes()),
            retry,
        )
        .expect("client");
        // Bob's inbox is unreachable.
        alice
            .cache
            .store(&[cached("bmo", &bob_keys, "http://127.0.0.1:1")], 1000)
            .expect("seed cache");

        let message_id = alice
            .send("bmo", &serde_json::json!({"text": "are you there?"}))
            .await
            .expect("queued");
        assert!(!message_id.is_empty());
        assert_eq!(alice.queue().len().await, 1);
        alice.queue().stop().await;
    }

    #[tokio::test]
    async fn test_offline_peer_skips_direct_send() {
        let dir = temp_dir();
        let alice_keys = KeyPair::generate();
        let bob_keys = KeyPair::generate();

        let retry = RetryConfig {
            tick: Duration::from_millis(50),
            schedule: vec![Duration::from_secs(600), Duration::from_secs(600)],
            ..Default::default()
        };
        let alice = AgentClient::with_retry_config(
            &agent_config("atlas", &dir),
            SigningKey::from_bytes(&alice_keys.signing_key.to_bytes()),
            retry,
        )
        .expect("client");

        // Bob is cached offline; the relay presence check cannot connect
        // either, so the snapshot stands and no direct POST is attempted.
        let mut bob = cached("bmo", &bob_keys, "http://127.0.0.1:1");
        bob.online = false;
        alice.cache.store(&[bob], 1000).expect("seed cache");

        let message_id = alice
            .send("bmo", &serde_json::json!({"text": "for later"}))
            .await
            .expect("parked");
        assert!(!message_id.is_empty());
        assert_eq!(alice.queue().len().await, 1);
        alice.queue().stop().await;
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let dir = temp_dir();
        let keys = KeyPair::generate();
        let alice = AgentClient::new(
            &agent_config("atlas", &dir),
            SigningKey::from_bytes(&keys.signing_key.to_bytes()),
        )
        .expect("client");

        // Empty cache; the relay refresh cannot connect either.
        let err = alice
            .send("ghost", &serde_json::json!({}))
            .await
            .expect_err("unknown");
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
