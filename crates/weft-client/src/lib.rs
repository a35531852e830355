//! # weft-client
//!
//! The agent-side engine of the Weft fabric:
//!
//! - [`api`] — signed relay HTTP client with retry-on-transient and a
//!   JSON-only response discipline
//! - [`retry`] — bounded delivery queue with a backoff schedule and a
//!   delivery-status event stream
//! - [`cache`] — on-disk per-community snapshot of the contact list
//! - [`agent`] — the send/receive engine tying the above together
//! - [`config`] — client configuration

pub mod agent;
pub mod api;
pub mod cache;
pub mod config;
pub mod retry;

use weft_wire::WireError;

/// Error types for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport failed before an HTTP response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The relay answered with a JSON error body.
    #[error("relay error {status}: {message}")]
    Api { status: u16, message: String },

    /// The relay (or something in the path) answered with a non-JSON body.
    #[error("Non-JSON response (HTTP {status})")]
    NonJson { status: u16 },

    /// The retry queue is at capacity.
    #[error("delivery queue is full")]
    QueueFull,

    /// The recipient is not an active contact.
    #[error("not a contact: {0}")]
    NotAContact(String),

    /// Local cache I/O failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Envelope construction or verification failed.
    #[error(transparent)]
    Wire(#[from] WireError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
