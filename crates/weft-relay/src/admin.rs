//! Administrative operations: broadcasts and agent approval/revocation.
//!
//! Admin agents are named in the relay configuration.

use rusqlite::Connection;

use weft_db::queries::{agents, broadcasts};
use weft_types::AgentStatus;

use crate::config::RelayConfig;
use crate::error::ApiError;

/// Broadcast creation body.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub subject: String,
    pub body: String,
}

/// Stored broadcast.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastView {
    pub id: i64,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub created_at: i64,
}

/// Reject callers that are not configured admins.
pub fn require_admin(config: &RelayConfig, agent: &str) -> Result<(), ApiError> {
    if !config.admin_agents.iter().any(|name| name == agent) {
        return Err(ApiError::forbidden("Admin privileges required"));
    }
    Ok(())
}

/// Store a broadcast announcement.
pub fn broadcast(
    conn: &Connection,
    sender: &str,
    req: &BroadcastRequest,
    now: i64,
) -> Result<i64, ApiError> {
    if req.subject.is_empty() {
        return Err(ApiError::bad_request("Subject must not be empty"));
    }
    let id = broadcasts::insert(conn, sender, &req.subject, &req.body, now)?;
    tracing::info!(sender, subject = %req.subject, "broadcast stored");
    Ok(id)
}

/// List broadcasts, newest first.
pub fn list_broadcasts(conn: &Connection, limit: i64) -> Result<Vec<BroadcastView>, ApiError> {
    Ok(broadcasts::list(conn, limit)?
        .into_iter()
        .map(|row| BroadcastView {
            id: row.id,
            sender: row.sender,
            subject: row.subject,
            body: row.body,
            created_at: row.created_at,
        })
        .collect())
}

/// Force an agent active without email verification.
pub fn approve(conn: &Connection, admin: &str, name: &str) -> Result<(), ApiError> {
    agents::get(conn, name)?;
    agents::set_status(conn, name, AgentStatus::Active.as_str(), admin)?;
    tracing::info!(admin, agent = name, "agent approved");
    Ok(())
}

/// Revoke an agent; it can no longer authenticate.
pub fn revoke(conn: &Connection, admin: &str, name: &str) -> Result<(), ApiError> {
    agents::get(conn, name)?;
    agents::set_status(conn, name, AgentStatus::Revoked.as_str(), admin)?;
    tracing::warn!(admin, agent = name, "agent revoked");
    Ok(())
}
