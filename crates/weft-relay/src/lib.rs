//! # weft-relay
//!
//! The central relay of the Weft fabric. It owns all relational state —
//! agent identities, email verifications, the contact graph, blocks, rate
//! limits, groups, and broadcasts — and mediates discovery and lifecycle for
//! the agents that exchange sealed envelopes peer-to-peer. The relay never
//! sees message plaintext.
//!
//! Business rules live in plain manager functions
//! ([`identity`], [`contacts`], [`groups`], [`presence`], [`admin`]) that
//! take a database connection and an explicit `now`, so tests drive them
//! without HTTP. The axum surface in [`routes`] is a thin shell:
//! authenticate, parse, delegate, map to exactly one status code.

pub mod admin;
pub mod auth;
pub mod config;
pub mod contacts;
pub mod context;
pub mod error;
pub mod groups;
pub mod identity;
pub mod mailer;
pub mod presence;
pub mod routes;

pub use config::RelayConfig;
pub use context::RelayContext;
pub use error::ApiError;
