//! Email verification queries.

use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// A raw verification row.
#[derive(Clone, Debug)]
pub struct VerificationRow {
    pub agent_name: String,
    pub email: String,
    pub code_hash: String,
    pub attempts: i64,
    pub expires_at: i64,
    pub verified: bool,
}

/// Create or replace the verification challenge for an agent.
pub fn upsert(
    conn: &Connection,
    agent_name: &str,
    email: &str,
    code_hash: &str,
    expires_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO email_verifications (agent_name, email, code_hash, expires_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(agent_name) DO UPDATE SET
             email = excluded.email,
             code_hash = excluded.code_hash,
             expires_at = excluded.expires_at,
             attempts = 0,
             verified = 0",
        rusqlite::params![agent_name, email, code_hash, expires_at],
    )?;
    Ok(())
}

/// Find the verification row for an agent.
pub fn find(conn: &Connection, agent_name: &str) -> Result<Option<VerificationRow>> {
    conn.query_row(
        "SELECT agent_name, email, code_hash, attempts, expires_at, verified
         FROM email_verifications WHERE agent_name = ?1",
        [agent_name],
        |row| {
            Ok(VerificationRow {
                agent_name: row.get(0)?,
                email: row.get(1)?,
                code_hash: row.get(2)?,
                attempts: row.get(3)?,
                expires_at: row.get(4)?,
                verified: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(crate::DbError::Sqlite)
}

/// Record a failed attempt; returns the new attempt count.
pub fn increment_attempts(conn: &Connection, agent_name: &str) -> Result<i64> {
    conn.execute(
        "UPDATE email_verifications SET attempts = attempts + 1 WHERE agent_name = ?1",
        [agent_name],
    )?;
    let attempts: i64 = conn.query_row(
        "SELECT attempts FROM email_verifications WHERE agent_name = ?1",
        [agent_name],
        |row| row.get(0),
    )?;
    Ok(attempts)
}

/// Mark the challenge as satisfied.
pub fn mark_verified(conn: &Connection, agent_name: &str) -> Result<()> {
    conn.execute(
        "UPDATE email_verifications SET verified = 1 WHERE agent_name = ?1",
        [agent_name],
    )?;
    Ok(())
}

/// Invalidate the challenge (too many attempts).
pub fn delete(conn: &Connection, agent_name: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM email_verifications WHERE agent_name = ?1",
        [agent_name],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::agents;

    fn test_db() -> Connection {
        let conn = crate::open_memory().expect("open test db");
        agents::insert(&conn, "atlas", "key-a", "a@example.com", "https://x", 100)
            .expect("agent");
        conn
    }

    #[test]
    fn test_upsert_and_find() {
        let conn = test_db();
        upsert(&conn, "atlas", "a@example.com", "hash-1", 700).expect("upsert");

        let row = find(&conn, "atlas").expect("find").expect("present");
        assert_eq!(row.code_hash, "hash-1");
        assert_eq!(row.attempts, 0);
        assert!(!row.verified);
    }

    #[test]
    fn test_upsert_resets_attempts() {
        let conn = test_db();
        upsert(&conn, "atlas", "a@example.com", "hash-1", 700).expect("upsert");
        increment_attempts(&conn, "atlas").expect("attempt");
        increment_attempts(&conn, "atlas").expect("attempt");

        upsert(&conn, "atlas", "a@example.com", "hash-2", 900).expect("re-upsert");
        let row = find(&conn, "atlas").expect("find").expect("present");
        assert_eq!(row.attempts, 0);
        assert_eq!(row.code_hash, "hash-2");
    }

    #[test]
    fn test_increment_attempts_counts() {
        let conn = test_db();
        upsert(&conn, "atlas", "a@example.com", "hash-1", 700).expect("upsert");
        assert_eq!(increment_attempts(&conn, "atlas").expect("inc"), 1);
        assert_eq!(increment_attempts(&conn, "atlas").expect("inc"), 2);
    }

    #[test]
    fn test_delete_invalidates() {
        let conn = test_db();
        upsert(&conn, "atlas", "a@example.com", "hash-1", 700).expect("upsert");
        delete(&conn, "atlas").expect("delete");
        assert!(find(&conn, "atlas").expect("find").is_none());
    }

    #[test]
    fn test_cascade_on_agent_delete() {
        let conn = test_db();
        upsert(&conn, "atlas", "a@example.com", "hash-1", 700).expect("upsert");
        conn.execute("DELETE FROM agents WHERE name = 'atlas'", [])
            .expect("delete agent");
        assert!(find(&conn, "atlas").expect("find").is_none());
    }
}
