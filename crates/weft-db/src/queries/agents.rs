//! Agent registry queries.

use rusqlite::{Connection, OptionalExtension};

use crate::{DbError, Result};

/// A raw agent row.
#[derive(Clone, Debug)]
pub struct AgentRow {
    pub name: String,
    pub public_key: String,
    pub owner_email: String,
    pub endpoint: String,
    pub email_verified: bool,
    pub status: String,
    pub last_seen: Option<i64>,
    pub created_at: i64,
    pub approved_by: Option<String>,
    pub key_updated_at: Option<i64>,
    pub recovery_initiated_at: Option<i64>,
    pub pending_public_key: Option<String>,
}

const COLUMNS: &str = "name, public_key, owner_email, endpoint, email_verified, status, \
                       last_seen, created_at, approved_by, key_updated_at, \
                       recovery_initiated_at, pending_public_key";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    Ok(AgentRow {
        name: row.get(0)?,
        public_key: row.get(1)?,
        owner_email: row.get(2)?,
        endpoint: row.get(3)?,
        email_verified: row.get(4)?,
        status: row.get(5)?,
        last_seen: row.get(6)?,
        created_at: row.get(7)?,
        approved_by: row.get(8)?,
        key_updated_at: row.get(9)?,
        recovery_initiated_at: row.get(10)?,
        pending_public_key: row.get(11)?,
    })
}

/// Insert a freshly registered agent (status `pending`).
pub fn insert(
    conn: &Connection,
    name: &str,
    public_key: &str,
    owner_email: &str,
    endpoint: &str,
    created_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO agents (name, public_key, owner_email, endpoint, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![name, public_key, owner_email, endpoint, created_at],
    )?;
    Ok(())
}

/// Get an agent by name.
pub fn get(conn: &Connection, name: &str) -> Result<AgentRow> {
    find(conn, name)?.ok_or_else(|| DbError::NotFound(format!("agent {name}")))
}

/// Find an agent by name, `None` when absent.
pub fn find(conn: &Connection, name: &str) -> Result<Option<AgentRow>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM agents WHERE name = ?1"),
        [name],
        map_row,
    )
    .optional()
    .map_err(DbError::Sqlite)
}

/// Is a public key already bound to any agent other than `exclude`?
pub fn public_key_in_use(conn: &Connection, public_key: &str, exclude: Option<&str>) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM agents WHERE public_key = ?1 AND name != COALESCE(?2, '')",
        rusqlite::params![public_key, exclude],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Promote an agent after successful email verification.
pub fn mark_verified(conn: &Connection, name: &str) -> Result<()> {
    affect_one(
        conn.execute(
            "UPDATE agents SET email_verified = 1, status = 'active' WHERE name = ?1",
            [name],
        )?,
        name,
    )
}

/// Install a new public key, stamping `key_updated_at` and clearing any
/// recovery state.
pub fn update_key(conn: &Connection, name: &str, public_key: &str, now: i64) -> Result<()> {
    affect_one(
        conn.execute(
            "UPDATE agents SET public_key = ?2, key_updated_at = ?3,
                               recovery_initiated_at = NULL, pending_public_key = NULL
             WHERE name = ?1",
            rusqlite::params![name, public_key, now],
        )?,
        name,
    )
}

/// Record a recovery initiation: the candidate key and the start instant.
pub fn set_recovery(conn: &Connection, name: &str, pending_key: &str, now: i64) -> Result<()> {
    affect_one(
        conn.execute(
            "UPDATE agents SET pending_public_key = ?2, recovery_initiated_at = ?3
             WHERE name = ?1",
            rusqlite::params![name, pending_key, now],
        )?,
        name,
    )
}

/// Stamp presence.
pub fn touch_last_seen(conn: &Connection, name: &str, now: i64) -> Result<()> {
    affect_one(
        conn.execute(
            "UPDATE agents SET last_seen = ?2 WHERE name = ?1",
            rusqlite::params![name, now],
        )?,
        name,
    )
}

/// Set lifecycle status with the acting admin recorded.
pub fn set_status(conn: &Connection, name: &str, status: &str, approved_by: &str) -> Result<()> {
    affect_one(
        conn.execute(
            "UPDATE agents SET status = ?2, approved_by = ?3 WHERE name = ?1",
            rusqlite::params![name, status, approved_by],
        )?,
        name,
    )
}

fn affect_one(changed: usize, name: &str) -> Result<()> {
    if changed == 0 {
        return Err(DbError::NotFound(format!("agent {name}")));
    }
    Ok(())
}
