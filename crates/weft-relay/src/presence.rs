//! Presence: heartbeat writes and online reads.
//!
//! An agent is online when its last heartbeat is at most 20 minutes old.

use rusqlite::Connection;

use weft_db::queries::agents;
use weft_types::ONLINE_WINDOW_SECS;

use crate::error::ApiError;

/// Presence of one agent.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    pub agent: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

/// Record a heartbeat for the authenticated agent.
pub fn heartbeat(conn: &Connection, agent: &str, now: i64) -> Result<PresenceView, ApiError> {
    agents::touch_last_seen(conn, agent, now)?;
    Ok(PresenceView {
        agent: agent.to_string(),
        online: true,
        last_seen: Some(now),
    })
}

/// Presence of a single agent.
pub fn get(conn: &Connection, agent: &str, now: i64) -> Result<PresenceView, ApiError> {
    let row = agents::find(conn, agent)?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;
    Ok(view(&row.name, row.last_seen, now))
}

/// Presence of several agents at once. Unknown names are reported offline
/// rather than failing the whole batch.
pub fn batch(conn: &Connection, names: &[String], now: i64) -> Result<Vec<PresenceView>, ApiError> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        match agents::find(conn, name)? {
            Some(row) => out.push(view(&row.name, row.last_seen, now)),
            None => out.push(PresenceView {
                agent: name.clone(),
                online: false,
                last_seen: None,
            }),
        }
    }
    Ok(out)
}

fn view(agent: &str, last_seen: Option<i64>, now: i64) -> PresenceView {
    PresenceView {
        agent: agent.to_string(),
        online: last_seen.is_some_and(|seen| now - seen <= ONLINE_WINDOW_SECS),
        last_seen,
    }
}
