//! Contact lifecycle: request, accept, deny, remove, listings.
//!
//! The pair is symmetric under swap (stored ordered); `requested_by` names
//! the initiator and only the other side may accept or deny. Three denials
//! of the same requester insert a directional block. Requests are
//! rate-limited per sender with a fixed 1-hour window.

use rusqlite::Connection;

use weft_db::queries::{agents, blocks, contacts, rate_limit};
use weft_types::{
    AgentStatus, ContactStatus, AUTO_BLOCK_THRESHOLD, CONTACT_REQUEST_LIMIT, ONLINE_WINDOW_SECS,
    PENDING_CONTACT_TTL_SECS, RATE_LIMIT_WINDOW_SECS,
};

use crate::error::ApiError;
use crate::identity;

/// Contact request body.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    pub to_agent: String,
    /// Greetings were removed in v3; any value is rejected.
    #[serde(default)]
    pub greeting: Option<String>,
}

/// Batch contact request body.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchContactRequest {
    pub to_agents: Vec<String>,
}

/// Outcome of one target within a batch request.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub to_agent: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A pending inbound request.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingView {
    pub from_agent: String,
    pub requester_email: String,
    pub requested_at: i64,
}

/// What accepting a request returns: the endpoint-exchange moment.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedView {
    pub agent: String,
    pub public_key: String,
    pub endpoint: String,
}

/// An active contact with liveness and key facts.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub agent: String,
    pub public_key: String,
    pub endpoint: String,
    pub online: bool,
    pub recovery_in_progress: bool,
    pub since: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_updated_at: Option<i64>,
}

/// Issue a contact request from `from` to `req.to_agent`.
pub fn request(
    conn: &mut Connection,
    from: &str,
    req: &ContactRequest,
    now: i64,
) -> Result<(), ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    request_in_tx(&tx, from, req, now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    Ok(())
}

fn request_in_tx(
    tx: &Connection,
    from: &str,
    req: &ContactRequest,
    now: i64,
) -> Result<(), ApiError> {
    if req.greeting.is_some() {
        return Err(ApiError::bad_request("Greetings are no longer supported"));
    }
    let to = req.to_agent.as_str();
    if to == from {
        return Err(ApiError::bad_request("Cannot request contact with yourself"));
    }

    let target = agents::find(tx, to)?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;
    if target.status != AgentStatus::Active.as_str() {
        return Err(ApiError::forbidden("Agent is not active"));
    }
    if blocks::exists(tx, to, from)? {
        return Err(ApiError::forbidden("Contact request not permitted"));
    }

    let decision = rate_limit::check_and_increment(
        tx,
        &format!("contacts:request:{from}"),
        CONTACT_REQUEST_LIMIT,
        RATE_LIMIT_WINDOW_SECS,
        now,
    )?;
    if !decision.allowed {
        return Err(ApiError::too_many_requests(
            CONTACT_REQUEST_LIMIT,
            decision.retry_after,
            decision.reset_at,
        ));
    }

    match contacts::find(tx, from, to)? {
        None => {
            contacts::insert_pending(tx, from, to, now)?;
        }
        Some(row) => match ContactStatus::parse(&row.status) {
            Some(ContactStatus::Active) => {
                return Err(ApiError::conflict("Already contacts"));
            }
            Some(ContactStatus::Pending) => {
                if now - row.created_at <= PENDING_CONTACT_TTL_SECS {
                    return Err(ApiError::conflict("Contact request already pending"));
                }
                // Stale request: replace it wholesale.
                contacts::delete(tx, from, to)?;
                contacts::insert_pending(tx, from, to, now)?;
            }
            Some(ContactStatus::Denied) => {
                contacts::reopen_denied(tx, from, to, now)?;
            }
            Some(ContactStatus::Removed) => {
                contacts::delete(tx, from, to)?;
                contacts::insert_pending(tx, from, to, now)?;
            }
            None => {
                return Err(ApiError::internal("Unreadable contact status"));
            }
        },
    }

    tracing::debug!(from, to, "contact request recorded");
    Ok(())
}

/// Apply [`request`] per target; returns per-target outcomes.
pub fn batch_request(
    conn: &mut Connection,
    from: &str,
    req: &BatchContactRequest,
    now: i64,
) -> Result<Vec<BatchResult>, ApiError> {
    if req.to_agents.is_empty() {
        return Err(ApiError::bad_request("toAgents must not be empty"));
    }

    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let mut results = Vec::with_capacity(req.to_agents.len());
    for to_agent in &req.to_agents {
        let single = ContactRequest {
            to_agent: to_agent.clone(),
            greeting: None,
        };
        match request_in_tx(&tx, from, &single, now) {
            Ok(()) => results.push(BatchResult {
                to_agent: to_agent.clone(),
                status: 201,
                error: None,
            }),
            Err(e) => results.push(BatchResult {
                to_agent: to_agent.clone(),
                status: e.status.as_u16(),
                error: Some(e.message),
            }),
        }
    }
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    Ok(results)
}

/// Pending requests addressed to `agent`, 30-day fresh, oldest first.
pub fn list_pending(conn: &Connection, agent: &str, now: i64) -> Result<Vec<PendingView>, ApiError> {
    let rows = contacts::list_pending_for(conn, agent, now - PENDING_CONTACT_TTL_SECS)?;
    Ok(rows
        .into_iter()
        .map(|row| PendingView {
            from_agent: row.requester,
            requester_email: row.requester_email,
            requested_at: row.created_at,
        })
        .collect())
}

/// Accept a pending request from `other`. Returns the peer's current key and
/// endpoint. Idempotent when the pair is already active.
pub fn accept(
    conn: &mut Connection,
    agent: &str,
    other: &str,
    now: i64,
) -> Result<AcceptedView, ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;

    let row = contacts::find(&tx, agent, other)?
        .ok_or_else(|| ApiError::not_found("No pending request from this agent"))?;

    match ContactStatus::parse(&row.status) {
        Some(ContactStatus::Active) => {}
        Some(ContactStatus::Pending) if row.requested_by == other => {
            contacts::set_status(&tx, agent, other, ContactStatus::Active.as_str(), now)?;
        }
        _ => return Err(ApiError::not_found("No pending request from this agent")),
    }

    let peer = agents::get(&tx, other)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(agent, other, "contact accepted");

    Ok(AcceptedView {
        agent: peer.name,
        public_key: peer.public_key,
        endpoint: peer.endpoint,
    })
}

/// Deny a pending request from `other`. The third denial inserts a block
/// from `agent` to `other`.
pub fn deny(conn: &mut Connection, agent: &str, other: &str, now: i64) -> Result<i64, ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;

    let row = contacts::find(&tx, agent, other)?
        .ok_or_else(|| ApiError::not_found("No pending request from this agent"))?;
    if row.status != ContactStatus::Pending.as_str() || row.requested_by != other {
        return Err(ApiError::not_found("No pending request from this agent"));
    }

    let denial_count = contacts::deny(&tx, agent, other, now)?;
    if denial_count >= AUTO_BLOCK_THRESHOLD {
        blocks::insert(&tx, agent, other, now)?;
        tracing::info!(agent, other, "auto-block after repeated denials");
    }
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    Ok(denial_count)
}

/// Remove an active contact, permitting a future re-request.
pub fn remove(conn: &mut Connection, agent: &str, other: &str) -> Result<(), ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;

    let row = contacts::find(&tx, agent, other)?
        .ok_or_else(|| ApiError::not_found("Not an active contact"))?;
    if row.status != ContactStatus::Active.as_str() {
        return Err(ApiError::not_found("Not an active contact"));
    }

    contacts::delete(&tx, agent, other)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(agent, other, "contact removed");
    Ok(())
}

/// Active contacts with computed liveness and recovery observability.
pub fn list(conn: &Connection, agent: &str, now: i64) -> Result<Vec<ContactView>, ApiError> {
    let rows = contacts::list_active_for(conn, agent)?;
    Ok(rows
        .into_iter()
        .map(|row| ContactView {
            agent: row.peer,
            public_key: row.public_key,
            endpoint: row.endpoint,
            online: row
                .last_seen
                .is_some_and(|seen| now - seen <= ONLINE_WINDOW_SECS),
            recovery_in_progress: identity::recovery_in_progress(row.recovery_initiated_at, now),
            since: row.since,
            key_updated_at: row.key_updated_at,
        })
        .collect())
}
