//! Lifecycle status enums.
//!
//! All statuses serialize to the lowercase strings stored in the relay
//! database and carried in API responses.

use serde::{Deserialize, Serialize};

/// Relay-side lifecycle of an agent identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered, email not yet verified.
    Pending,
    /// Verified and allowed to authenticate.
    Active,
    /// Administratively revoked.
    Revoked,
}

/// State of a contact pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Active,
    Denied,
    Removed,
}

/// State of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Dissolved,
}

/// Role of a group member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
}

/// State of a group membership row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Active,
    Removed,
    Left,
}

/// Delivery state of a queued outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Delivered,
    Expired,
    Failed,
}

macro_rules! text_codec {
    ($ty:ty, [$(($variant:path, $text:literal)),+ $(,)?]) => {
        impl $ty {
            /// The lowercase database/API representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $text,)+
                }
            }

            /// Parse the lowercase database/API representation.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_codec!(AgentStatus, [
    (AgentStatus::Pending, "pending"),
    (AgentStatus::Active, "active"),
    (AgentStatus::Revoked, "revoked"),
]);

text_codec!(ContactStatus, [
    (ContactStatus::Pending, "pending"),
    (ContactStatus::Active, "active"),
    (ContactStatus::Denied, "denied"),
    (ContactStatus::Removed, "removed"),
]);

text_codec!(GroupStatus, [
    (GroupStatus::Active, "active"),
    (GroupStatus::Dissolved, "dissolved"),
]);

text_codec!(GroupRole, [
    (GroupRole::Owner, "owner"),
    (GroupRole::Admin, "admin"),
    (GroupRole::Member, "member"),
]);

text_codec!(MembershipStatus, [
    (MembershipStatus::Pending, "pending"),
    (MembershipStatus::Active, "active"),
    (MembershipStatus::Removed, "removed"),
    (MembershipStatus::Left, "left"),
]);

text_codec!(DeliveryStatus, [
    (DeliveryStatus::Pending, "pending"),
    (DeliveryStatus::Sending, "sending"),
    (DeliveryStatus::Delivered, "delivered"),
    (DeliveryStatus::Expired, "expired"),
    (DeliveryStatus::Failed, "failed"),
]);
