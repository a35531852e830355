//! Admin broadcast queries.

use rusqlite::Connection;

use crate::Result;

/// A stored broadcast announcement.
#[derive(Clone, Debug)]
pub struct BroadcastRow {
    pub id: i64,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub created_at: i64,
}

/// Store a broadcast; returns its id.
pub fn insert(conn: &Connection, sender: &str, subject: &str, body: &str, now: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO broadcasts (sender, subject, body, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![sender, subject, body, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// List broadcasts, newest first.
pub fn list(conn: &Connection, limit: i64) -> Result<Vec<BroadcastRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender, subject, body, created_at
         FROM broadcasts ORDER BY created_at DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            Ok(BroadcastRow {
                id: row.get(0)?,
                sender: row.get(1)?,
                subject: row.get(2)?,
                body: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_list_newest_first() {
        let conn = crate::open_memory().expect("open test db");
        insert(&conn, "root", "maintenance", "tonight", 1000).expect("insert");
        insert(&conn, "root", "done", "all clear", 2000).expect("insert");

        let rows = list(&conn, 10).expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].subject, "done");
        assert_eq!(rows[1].subject, "maintenance");
    }

    #[test]
    fn test_limit() {
        let conn = crate::open_memory().expect("open test db");
        for i in 0..5 {
            insert(&conn, "root", &format!("s{i}"), "b", 1000 + i).expect("insert");
        }
        assert_eq!(list(&conn, 3).expect("list").len(), 3);
    }
}
