//! Directional block queries.
//!
//! A block from X to Y prevents Y from issuing new contact requests to X.

use rusqlite::Connection;

use crate::Result;

/// Insert a block idempotently.
pub fn insert(conn: &Connection, blocker: &str, blocked: &str, now: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO blocks (blocker, blocked, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![blocker, blocked, now],
    )?;
    Ok(())
}

/// Is there a live block from `blocker` to `blocked`?
pub fn exists(conn: &Connection, blocker: &str, blocked: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM blocks WHERE blocker = ?1 AND blocked = ?2",
        [blocker, blocked],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
