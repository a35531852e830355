//! The Weft message envelope.
//!
//! Every peer-to-peer message is wrapped in an [`Envelope`]: a JSON object
//! carrying the encrypted payload plus an Ed25519 signature over the
//! canonical serialization of every other field.
//!
//! ## Wire format
//!
//! ```text
//! {
//!   "messageId": "<uuid v4>",
//!   "payload":   {"ciphertext": "<base64>", "nonce": "<base64, 12 bytes>"},
//!   "recipient": "<agent name>",
//!   "sender":    "<agent name>",
//!   "signature": "<base64 Ed25519>",
//!   "timestamp": "<RFC 3339 UTC>",
//!   "type":      "direct" | "group",
//!   "version":   "2.0",
//!   "groupId":   "<group id>"        // group type only
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weft_types::PROTOCOL_MAJOR;

use crate::canonical;
use crate::{Result, WireError};

/// Envelope version emitted by this implementation.
pub const ENVELOPE_VERSION: &str = weft_types::PROTOCOL_VERSION;

/// Message type. Validation is strict: unknown strings fail deserialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// One recipient, no `groupId`.
    Direct,
    /// Fan-out within a group; requires `groupId`.
    Group,
}

/// Encrypted payload body: AES-256-GCM ciphertext with appended tag, plus
/// the 96-bit nonce, both base64.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub nonce: String,
}

/// The signed, encrypted unit of peer-to-peer transport.
///
/// `timestamp` stays a string: the verifier recomputes the signed bytes from
/// this struct, and a parse/print cycle through a datetime type could change
/// the formatting the sender signed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub sender: String,
    pub recipient: String,
    pub timestamp: String,
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub payload: serde_json::Value,
    pub signature: String,
}

impl Envelope {
    /// Parse an envelope from raw JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| WireError::Shape(e.to_string()))
    }

    /// Serialize to JSON for transmission.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| WireError::Serialization(e.to_string()))
    }

    /// Shape-check the envelope. Does **not** verify the signature.
    pub fn validate(&self) -> Result<()> {
        if self.message_id.is_empty() {
            return Err(WireError::Shape("messageId must not be empty".into()));
        }
        if self.sender.is_empty() || self.recipient.is_empty() {
            return Err(WireError::Shape(
                "sender and recipient must not be empty".into(),
            ));
        }
        if self.version.is_empty() {
            return Err(WireError::Shape("version must not be empty".into()));
        }
        if DateTime::parse_from_rfc3339(&self.timestamp).is_err() {
            return Err(WireError::Shape(format!(
                "timestamp is not RFC 3339: {}",
                self.timestamp
            )));
        }
        if !self.payload.is_object() {
            return Err(WireError::Shape("payload must be an object".into()));
        }
        match (self.kind, self.group_id.as_deref()) {
            (EnvelopeType::Group, None) | (EnvelopeType::Group, Some("")) => {
                Err(WireError::Shape("group envelope requires groupId".into()))
            }
            (EnvelopeType::Direct, Some(_)) => Err(WireError::Shape(
                "direct envelope must not carry groupId".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Parse the envelope timestamp.
    pub fn parsed_timestamp(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| WireError::Shape(format!("bad timestamp: {e}")))
    }

    /// The canonical bytes the envelope signature covers: the canonical JSON
    /// of the envelope with only the `signature` field removed. `groupId`
    /// stays inside the signed region.
    pub fn signable_payload(&self) -> Result<Vec<u8>> {
        let mut value =
            serde_json::to_value(self).map_err(|e| WireError::Serialization(e.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("signature");
        }
        canonical::canonical_bytes(&value)
    }

    /// Parse the encrypted payload body.
    pub fn encrypted_payload(&self) -> Result<EncryptedPayload> {
        serde_json::from_value(self.payload.clone()).map_err(|_| WireError::Decrypt)
    }
}

/// Version gate: accept only major version [`PROTOCOL_MAJOR`]. The version is
/// the dotted form with an integer before the first dot; malformed strings
/// reject.
pub fn is_version_compatible(version: &str) -> bool {
    let major = match version.split('.').next() {
        Some(m) => m,
        None => return false,
    };
    match major.parse::<u32>() {
        Ok(m) => m == PROTOCOL_MAJOR,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(kind: EnvelopeType, group_id: Option<&str>) -> Envelope {
        Envelope {
            version: ENVELOPE_VERSION.to_string(),
            kind,
            message_id: "11111111-2222-3333-4444-555555555555".to_string(),
            sender: "atlas".to_string(),
            recipient: "bmo".to_string(),
            timestamp: "2026-08-01T12:00:00.000Z".to_string(),
            group_id: group_id.map(str::to_string),
            payload: json!({"ciphertext": "YWJj", "nonce": "AAAAAAAAAAAAAAAA"}),
            signature: String::new(),
        }
    }

    #[test]
    fn test_direct_envelope_validates() {
        assert!(sample(EnvelopeType::Direct, None).validate().is_ok());
    }

    #[test]
    fn test_group_requires_group_id() {
        assert!(sample(EnvelopeType::Group, Some("g-1")).validate().is_ok());
        assert!(sample(EnvelopeType::Group, None).validate().is_err());
        assert!(sample(EnvelopeType::Group, Some("")).validate().is_err());
    }

    #[test]
    fn test_direct_must_not_carry_group_id() {
        assert!(sample(EnvelopeType::Direct, Some("g-1")).validate().is_err());
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let mut env = sample(EnvelopeType::Direct, None);
        env.timestamp = "yesterday".to_string();
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let mut env = sample(EnvelopeType::Direct, None);
        env.payload = json!("scalar");
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_unknown_type_fails_parse() {
        let raw = br#"{"version":"2.0","type":"broadcast","messageId":"m","sender":"a",
            "recipient":"b","timestamp":"2026-08-01T12:00:00Z","payload":{},"signature":""}"#;
        assert!(Envelope::from_json(raw).is_err());
    }

    #[test]
    fn test_version_gate() {
        assert!(is_version_compatible("2.0"));
        assert!(is_version_compatible("2.17"));
        assert!(is_version_compatible("2"));
        assert!(!is_version_compatible("1.9"));
        assert!(!is_version_compatible("3.0"));
        assert!(!is_version_compatible(""));
        assert!(!is_version_compatible("two.zero"));
        assert!(!is_version_compatible(".2"));
    }

    #[test]
    fn test_signable_payload_excludes_only_signature() {
        let mut env = sample(EnvelopeType::Group, Some("g-1"));
        env.signature = "c2ln".to_string();
        let bytes = env.signable_payload().expect("signable");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(!text.contains("signature"));
        assert!(text.contains("\"groupId\":\"g-1\""));
        assert!(text.contains("\"messageId\""));
    }

    #[test]
    fn test_signable_payload_ignores_signature_value() {
        let mut a = sample(EnvelopeType::Direct, None);
        let mut b = sample(EnvelopeType::Direct, None);
        a.signature = String::new();
        b.signature = "ZGlmZmVyZW50".to_string();
        assert_eq!(
            a.signable_payload().expect("a"),
            b.signable_payload().expect("b")
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let env = sample(EnvelopeType::Group, Some("g-9"));
        let bytes = env.to_json().expect("serialize");
        let restored = Envelope::from_json(&bytes).expect("parse");
        assert_eq!(restored.message_id, env.message_id);
        assert_eq!(restored.kind, EnvelopeType::Group);
        assert_eq!(restored.group_id.as_deref(), Some("g-9"));
    }
}
