//! Contact-pair queries.
//!
//! The pair is stored ordered (`agent_a < agent_b`); `requested_by` retains
//! the actual initiator. All lookups normalize the pair first, so the
//! operations are symmetric under swap.

use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// A raw contact row.
#[derive(Clone, Debug)]
pub struct ContactRow {
    pub agent_a: String,
    pub agent_b: String,
    pub status: String,
    pub requested_by: String,
    pub denial_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A pending request as seen by the non-requester.
#[derive(Clone, Debug)]
pub struct PendingRow {
    pub requester: String,
    pub requester_email: String,
    pub created_at: i64,
}

/// An active contact joined with the peer's registry row.
#[derive(Clone, Debug)]
pub struct ActiveContactRow {
    pub peer: String,
    pub public_key: String,
    pub endpoint: String,
    pub last_seen: Option<i64>,
    pub key_updated_at: Option<i64>,
    pub recovery_initiated_at: Option<i64>,
    pub since: i64,
}

/// Normalize a pair to storage order.
pub fn order_pair<'a>(x: &'a str, y: &'a str) -> (&'a str, &'a str) {
    if x < y {
        (x, y)
    } else {
        (y, x)
    }
}

/// Find the row for a pair (order-insensitive).
pub fn find(conn: &Connection, x: &str, y: &str) -> Result<Option<ContactRow>> {
    let (a, b) = order_pair(x, y);
    conn.query_row(
        "SELECT agent_a, agent_b, status, requested_by, denial_count, created_at, updated_at
         FROM contacts WHERE agent_a = ?1 AND agent_b = ?2",
        [a, b],
        |row| {
            Ok(ContactRow {
                agent_a: row.get(0)?,
                agent_b: row.get(1)?,
                status: row.get(2)?,
                requested_by: row.get(3)?,
                denial_count: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(crate::DbError::Sqlite)
}

/// Insert a fresh pending request.
pub fn insert_pending(conn: &Connection, requester: &str, target: &str, now: i64) -> Result<()> {
    let (a, b) = order_pair(requester, target);
    conn.execute(
        "INSERT INTO contacts (agent_a, agent_b, status, requested_by, denial_count, created_at, updated_at)
         VALUES (?1, ?2, 'pending', ?3, 0, ?4, ?4)",
        rusqlite::params![a, b, requester, now],
    )?;
    Ok(())
}

/// Delete the row for a pair.
pub fn delete(conn: &Connection, x: &str, y: &str) -> Result<bool> {
    let (a, b) = order_pair(x, y);
    let changed = conn.execute(
        "DELETE FROM contacts WHERE agent_a = ?1 AND agent_b = ?2",
        [a, b],
    )?;
    Ok(changed > 0)
}

/// Set the pair's status, stamping `updated_at`.
pub fn set_status(conn: &Connection, x: &str, y: &str, status: &str, now: i64) -> Result<()> {
    let (a, b) = order_pair(x, y);
    conn.execute(
        "UPDATE contacts SET status = ?3, updated_at = ?4 WHERE agent_a = ?1 AND agent_b = ?2",
        rusqlite::params![a, b, status, now],
    )?;
    Ok(())
}

/// Re-open a previously denied pair as a fresh pending request from
/// `requester`, retaining the denial count.
pub fn reopen_denied(conn: &Connection, requester: &str, target: &str, now: i64) -> Result<()> {
    let (a, b) = order_pair(requester, target);
    conn.execute(
        "UPDATE contacts SET status = 'pending', requested_by = ?3, created_at = ?4, updated_at = ?4
         WHERE agent_a = ?1 AND agent_b = ?2",
        rusqlite::params![a, b, requester, now],
    )?;
    Ok(())
}

/// Record a denial; returns the new denial count.
pub fn deny(conn: &Connection, x: &str, y: &str, now: i64) -> Result<i64> {
    let (a, b) = order_pair(x, y);
    conn.execute(
        "UPDATE contacts SET status = 'denied', denial_count = denial_count + 1, updated_at = ?3
         WHERE agent_a = ?1 AND agent_b = ?2",
        rusqlite::params![a, b, now],
    )?;
    let count: i64 = conn.query_row(
        "SELECT denial_count FROM contacts WHERE agent_a = ?1 AND agent_b = ?2",
        [a, b],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Pending requests addressed to `agent`, fresher than `cutoff`, oldest
/// first, with the requester's email for display.
pub fn list_pending_for(conn: &Connection, agent: &str, cutoff: i64) -> Result<Vec<PendingRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.requested_by, a.owner_email, c.created_at
         FROM contacts c
         JOIN agents a ON a.name = c.requested_by
         WHERE c.status = 'pending'
           AND (c.agent_a = ?1 OR c.agent_b = ?1)
           AND c.requested_by != ?1
           AND c.created_at >= ?2
         ORDER BY c.created_at ASC",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![agent, cutoff], |row| {
            Ok(PendingRow {
                requester: row.get(0)?,
                requester_email: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Active contacts of `agent`, joined with the peer's registry row.
pub fn list_active_for(conn: &Connection, agent: &str) -> Result<Vec<ActiveContactRow>> {
    let mut stmt = conn.prepare(
        "SELECT a.name, a.public_key, a.endpoint, a.last_seen, a.key_updated_at,
                a.recovery_initiated_at, c.updated_at
         FROM contacts c
         JOIN agents a ON a.name = CASE WHEN c.agent_a = ?1 THEN c.agent_b ELSE c.agent_a END
         WHERE c.status = 'active' AND (c.agent_a = ?1 OR c.agent_b = ?1)
         ORDER BY a.name",
    )?;

    let rows = stmt
        .query_map([agent], |row| {
            Ok(ActiveContactRow {
                peer: row.get(0)?,
                public_key: row.get(1)?,
                endpoint: row.get(2)?,
                last_seen: row.get(3)?,
                key_updated_at: row.get(4)?,
                recovery_initiated_at: row.get(5)?,
                since: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
