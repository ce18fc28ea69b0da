// Database schema — table creation and migrations.
//
// Creation is idempotent and runs on every open. The one migration we carry
// is the scan_id column on findings, added for databases created before
// scans were first-class rows.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables and indexes if they don't exist yet.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- One row per observed fact, tagged with the scan that produced it.
        -- `data` holds the payload as canonical (sorted-key) JSON so that
        -- byte-equality implements semantic deduplication.
        CREATE TABLE IF NOT EXISTS findings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scan_id TEXT,
            target TEXT NOT NULL,
            module TEXT NOT NULL,
            source TEXT NOT NULL,
            type TEXT NOT NULL,
            data TEXT NOT NULL,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS scans (
            id TEXT PRIMARY KEY,
            target TEXT NOT NULL,
            status TEXT NOT NULL,
            start_time DATETIME,
            end_time DATETIME
        );
        ",
    )
    .context("Failed to create database tables")?;

    // Databases from before scan tracking lack the scan_id column; add it
    // and ignore the duplicate-column error everywhere else. Must run
    // before the scan_id index below.
    match conn.execute("ALTER TABLE findings ADD COLUMN scan_id TEXT", []) {
        Ok(_) => {}
        Err(e) if e.to_string().contains("duplicate column") => {}
        Err(e) => return Err(e).context("Failed to migrate findings table"),
    }

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_findings_target ON findings(target);
        CREATE INDEX IF NOT EXISTS idx_findings_scan_id ON findings(scan_id);
        CREATE INDEX IF NOT EXISTS idx_findings_type ON findings(type);
        ",
    )
    .context("Failed to create database indexes")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn scan_id_migration_fills_legacy_table() {
        let conn = Connection::open_in_memory().unwrap();
        // A findings table from before scan tracking existed
        conn.execute_batch(
            "CREATE TABLE findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target TEXT NOT NULL,
                module TEXT NOT NULL,
                source TEXT NOT NULL,
                type TEXT NOT NULL,
                data TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .unwrap();

        create_tables(&conn).unwrap();

        conn.execute(
            "INSERT INTO findings (scan_id, target, module, source, type, data)
             VALUES ('s1', 'example.com', 'subdomain/crtsh', 'crt.sh', 'subdomain', '{}')",
            [],
        )
        .unwrap();
        let scan_id: String = conn
            .query_row("SELECT scan_id FROM findings LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(scan_id, "s1");
    }
}
