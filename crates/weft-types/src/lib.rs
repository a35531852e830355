//! # weft-types
//!
//! Shared domain types used across the Weft workspace: lifecycle status
//! enums, protocol constants, and event payloads.

pub mod events;
pub mod status;

pub use status::{
    AgentStatus, ContactStatus, DeliveryStatus, GroupRole, GroupStatus, MembershipStatus,
};

/// Wire protocol version carried in every envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Major protocol version accepted by the envelope pipeline.
pub const PROTOCOL_MAJOR: u32 = 2;

/// Maximum tolerated clock skew for envelopes and signed requests (5 minutes).
pub const MAX_SKEW_SECS: i64 = 300;

/// Window after which an agent is considered offline (20 minutes).
pub const ONLINE_WINDOW_SECS: i64 = 20 * 60;

/// Quarantine between initiating key recovery and rotating to the recovery
/// key (1 hour).
pub const RECOVERY_COOLING_OFF_SECS: i64 = 3600;

/// Pending contact requests older than this are expired (30 days).
pub const PENDING_CONTACT_TTL_SECS: i64 = 30 * 24 * 3600;

/// Denials from one peer that trigger an automatic block.
pub const AUTO_BLOCK_THRESHOLD: i64 = 3;

/// Contact requests permitted per sender per rate-limit window.
pub const CONTACT_REQUEST_LIMIT: i64 = 100;

/// Rate-limit window length (1 hour).
pub const RATE_LIMIT_WINDOW_SECS: i64 = 3600;

/// Email verification code lifetime (10 minutes).
pub const VERIFICATION_TTL_SECS: i64 = 600;

/// Failed verification attempts before the code is invalidated.
pub const MAX_VERIFICATION_ATTEMPTS: i64 = 5;

/// Default cap on active members per group.
pub const DEFAULT_MAX_GROUP_MEMBERS: i64 = 50;
