// Store — the shared async handle over the SQLite connection.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Methods lock the mutex, do synchronous rusqlite work, and return; the lock
// is never held across .await points. Every component of a scan shares one
// Store via Arc.

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::models::{canonical_json, Finding, FindingKind, Scan, ScanStatus};
use super::{queries, StoreError};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file and run migrations.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = super::initialize(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn create_scan(
        &self,
        scan_id: &str,
        target: &str,
        status: ScanStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        queries::create_scan(&conn, scan_id, target, status)
    }

    pub async fn update_scan_status(
        &self,
        scan_id: &str,
        status: ScanStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        queries::update_scan_status(&conn, scan_id, status)
    }

    pub async fn get_scan(&self, scan_id: &str) -> Result<Option<Scan>, StoreError> {
        let conn = self.conn.lock().await;
        queries::get_scan(&conn, scan_id)
    }

    pub async fn list_scans(&self, limit: u32) -> Result<Vec<Scan>, StoreError> {
        let conn = self.conn.lock().await;
        queries::list_scans(&conn, limit)
    }

    /// Append one finding; the payload is serialized to canonical JSON here.
    pub async fn store_finding<T: Serialize + ?Sized>(
        &self,
        scan_id: Option<&str>,
        target: &str,
        module: &str,
        source: &str,
        kind: FindingKind,
        payload: &T,
    ) -> Result<(), StoreError> {
        let data = canonical_json(payload)?;
        let conn = self.conn.lock().await;
        queries::store_finding(&conn, scan_id, target, module, source, kind, &data)
    }

    pub async fn get_findings(
        &self,
        target: &str,
        module: Option<&str>,
        scan_id: Option<&str>,
    ) -> Result<Vec<Finding>, StoreError> {
        let conn = self.conn.lock().await;
        queries::get_findings(&conn, target, module, scan_id)
    }

    pub async fn get_unique_subdomains(&self, target: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().await;
        queries::get_unique_subdomains(&conn, target)
    }

    pub async fn get_unique_findings(
        &self,
        target: &str,
        kind: FindingKind,
        key_fields: Option<&[&str]>,
    ) -> Result<Vec<Value>, StoreError> {
        let conn = self.conn.lock().await;
        queries::get_unique_findings(&conn, target, kind, key_fields)
    }

    pub async fn compact(
        &self,
        target: &str,
        kind: Option<FindingKind>,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        queries::compact(&conn, target, kind)
    }

    pub async fn clear_history(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        queries::clear_history(&conn)
    }
}
