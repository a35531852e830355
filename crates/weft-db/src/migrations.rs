//! Database migration system.
//!
//! The schema version lives in `_meta(key='schema_version')`. Migrations are
//! forward-only and additive: columns are added with an idempotent
//! `ALTER TABLE ... ADD COLUMN` that swallows the duplicate-column error, so
//! re-running a migration is harmless.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let current = current_version(conn)?;

    if current == 0 {
        tracing::info!("initializing relay database schema");
        conn.execute_batch(schema::SCHEMA_V1)?;
        set_version(conn, 1)?;
    } else if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    for version in (current_version(conn)? + 1)..=SCHEMA_VERSION {
        tracing::info!(version, "running schema migration");
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

/// Read the stored schema version (0 when the row is absent).
pub fn current_version(conn: &Connection) -> Result<u32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM _meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(DbError::Sqlite(other)),
        })?;

    match value {
        Some(v) => v
            .parse::<u32>()
            .map_err(|_| DbError::Migration(format!("bad schema_version value: {v}"))),
        None => Ok(0),
    }
}

fn set_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [version.to_string()],
    )?;
    Ok(())
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        2 => migration_v2(conn),
        _ => Err(DbError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// v2: key-recovery support on agents.
fn migration_v2(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "agents", "recovery_initiated_at INTEGER")?;
    add_column_if_missing(conn, "agents", "pending_public_key TEXT")?;
    Ok(())
}

/// Idempotent `ADD COLUMN`: the duplicate-column error is swallowed so a
/// partially applied migration can be re-run.
fn add_column_if_missing(conn: &Connection, table: &str, column_def: &str) -> Result<()> {
    match conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column_def}"), []) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(_, Some(msg)))
            if msg.contains("duplicate column name") =>
        {
            tracing::debug!(table, column_def, "column already present");
            Ok(())
        }
        Err(e) => Err(DbError::Sqlite(e)),
    }
}
