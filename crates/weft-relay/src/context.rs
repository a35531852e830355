//! Shared relay state.
//!
//! The context is passed explicitly to every handler; there is no
//! process-global database handle. The SQLite connection sits behind an
//! async mutex — the store is single-writer-serialized, and each mutating
//! operation runs inside one transaction while the lock is held.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::config::RelayConfig;
use crate::mailer::{LogMailer, Mailer};

/// Everything a request handler needs.
pub struct RelayContext {
    pub db: Mutex<Connection>,
    pub config: RelayConfig,
    pub mailer: Arc<dyn Mailer>,
}

impl RelayContext {
    /// Open the configured database and assemble the context.
    pub fn open(config: RelayConfig, mailer: Arc<dyn Mailer>) -> weft_db::Result<Arc<Self>> {
        let conn = weft_db::open(Path::new(&config.db_path))?;
        Ok(Arc::new(Self {
            db: Mutex::new(conn),
            config,
            mailer,
        }))
    }

    /// In-memory context for tests.
    pub fn in_memory(config: RelayConfig) -> weft_db::Result<Arc<Self>> {
        let conn = weft_db::open_memory()?;
        Ok(Arc::new(Self {
            db: Mutex::new(conn),
            config,
            mailer: Arc::new(LogMailer),
        }))
    }

    /// In-memory context with a custom mailer.
    pub fn in_memory_with_mailer(
        config: RelayConfig,
        mailer: Arc<dyn Mailer>,
    ) -> weft_db::Result<Arc<Self>> {
        let conn = weft_db::open_memory()?;
        Ok(Arc::new(Self {
            db: Mutex::new(conn),
            config,
            mailer,
        }))
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
