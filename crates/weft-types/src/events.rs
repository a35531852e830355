//! Event payloads emitted by the client engine.
//!
//! Delivery-status events are totally ordered per `message_id`
//! (`pending → sending → (delivered | expired | failed)`); ordering across
//! message ids is not guaranteed.

use serde::{Deserialize, Serialize};

use crate::DeliveryStatus;

/// A delivery-status transition for a queued outbound message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryEvent {
    /// Message id of the envelope this event refers to.
    #[serde(rename = "messageId")]
    pub message_id: String,
    /// New delivery status.
    pub status: DeliveryStatus,
    /// Send attempts so far.
    pub attempts: u32,
}

/// A decrypted and verified inbound message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Sending agent's name.
    pub sender: String,
    /// Message id from the envelope.
    #[serde(rename = "messageId")]
    pub message_id: String,
    /// Envelope timestamp (RFC 3339).
    pub timestamp: String,
    /// Group id for group messages, absent for direct ones.
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Application-defined decrypted payload.
    pub payload: serde_json::Value,
}

/// An entry in a group's ordered change log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupChange {
    /// Monotonic sequence number within the group log.
    pub seq: i64,
    /// Group id.
    #[serde(rename = "groupId")]
    pub group_id: String,
    /// Change kind, e.g. "invited", "joined", "left", "transferred".
    pub change: String,
    /// Agent that performed the change.
    pub actor: String,
    /// Agent the change is about, when different from the actor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Unix timestamp of the change.
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_event_json_field_names() {
        let event = DeliveryEvent {
            message_id: "m-1".to_string(),
            status: DeliveryStatus::Sending,
            attempts: 2,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["messageId"], "m-1");
        assert_eq!(json["status"], "sending");
        assert_eq!(json["attempts"], 2);
    }

    #[test]
    fn test_incoming_message_omits_absent_group() {
        let msg = IncomingMessage {
            sender: "atlas".to_string(),
            message_id: "m-2".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            group_id: None,
            payload: serde_json::json!({"text": "hi"}),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert!(json.get("groupId").is_none());
    }
}
