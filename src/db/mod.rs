// Database layer — SQLite storage for scans and findings.
//
// We use rusqlite with the "bundled" feature so there's no system SQLite
// dependency. The database file lives wherever the config's `database` key
// points (defaults to ./recon.db). All access goes through `Store`, which
// serializes writes behind an async mutex.

pub mod models;
pub mod queries;
pub mod schema;
pub mod store;

pub use store::Store;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Storage errors callers need to discriminate.
///
/// `AlreadyExists` matters to the engine: a scan manager pre-creates the
/// scan row, so the engine tolerates it on its own create attempt. Everything
/// else is a driver or serialization failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("scan {0} already exists")]
    AlreadyExists(String),

    #[error("finding kind `{0}` is not recognized")]
    InvalidKind(String),

    #[error("scan status `{0}` is not recognized")]
    InvalidStatus(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Open (or create) the database file and run migrations.
pub fn initialize(db_path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {}", db_path))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::create_tables(&conn)?;

    Ok(conn)
}
