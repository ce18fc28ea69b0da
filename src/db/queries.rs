// Query functions — synchronous rusqlite work against an open Connection.
//
// These are free functions so they can be tested against an in-memory
// connection directly; `Store` wraps them behind its async mutex.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde_json::Value;

use super::models::{Finding, FindingKind, Scan, ScanStatus};
use super::StoreError;

pub fn create_scan(
    conn: &Connection,
    scan_id: &str,
    target: &str,
    status: ScanStatus,
) -> Result<(), StoreError> {
    let result = conn.execute(
        "INSERT INTO scans (id, target, status, start_time) VALUES (?1, ?2, ?3, ?4)",
        params![scan_id, target, status.as_str(), Utc::now().to_rfc3339()],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::AlreadyExists(scan_id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Update a scan's status. Terminal states set end_time in the same write.
pub fn update_scan_status(
    conn: &Connection,
    scan_id: &str,
    status: ScanStatus,
) -> Result<(), StoreError> {
    if status.is_terminal() {
        conn.execute(
            "UPDATE scans SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), scan_id],
        )?;
    } else {
        conn.execute(
            "UPDATE scans SET status = ?1 WHERE id = ?2",
            params![status.as_str(), scan_id],
        )?;
    }
    Ok(())
}

pub fn get_scan(conn: &Connection, scan_id: &str) -> Result<Option<Scan>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, target, status, start_time, end_time FROM scans WHERE id = ?1",
    )?;
    let mut rows = stmt.query(params![scan_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_scan(row)?)),
        None => Ok(None),
    }
}

pub fn list_scans(conn: &Connection, limit: u32) -> Result<Vec<Scan>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, target, status, start_time, end_time FROM scans
         ORDER BY start_time DESC LIMIT ?1",
    )?;
    let mut rows = stmt.query(params![limit])?;
    let mut scans = Vec::new();
    while let Some(row) = rows.next()? {
        scans.push(row_to_scan(row)?);
    }
    Ok(scans)
}

/// Append one finding. `data` must already be canonical JSON text.
pub fn store_finding(
    conn: &Connection,
    scan_id: Option<&str>,
    target: &str,
    module: &str,
    source: &str,
    kind: FindingKind,
    data: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO findings (scan_id, target, module, source, type, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![scan_id, target, module, source, kind.as_str(), data],
    )?;
    Ok(())
}

/// Findings for a target, optionally narrowed by module and/or scan.
///
/// A module filter containing `/` matches exactly; otherwise it matches the
/// `<module>/*` prefix. When a scan_id is given it takes precedence over the
/// target filter.
pub fn get_findings(
    conn: &Connection,
    target: &str,
    module: Option<&str>,
    scan_id: Option<&str>,
) -> Result<Vec<Finding>, StoreError> {
    let mut sql = String::from(
        "SELECT id, scan_id, target, module, source, type, data, timestamp FROM findings ",
    );
    let mut args: Vec<String> = Vec::new();
    match scan_id {
        Some(id) => {
            sql.push_str("WHERE scan_id = ?1");
            args.push(id.to_string());
        }
        None => {
            sql.push_str("WHERE target = ?1");
            args.push(target.to_string());
        }
    }
    if let Some(module) = module {
        if module.contains('/') {
            sql.push_str(" AND module = ?2");
            args.push(module.to_string());
        } else {
            sql.push_str(" AND module LIKE ?2");
            args.push(format!("{module}/%"));
        }
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args))?;
    let mut findings = Vec::new();
    while let Some(row) = rows.next()? {
        findings.push(row_to_finding(row)?);
    }
    Ok(findings)
}

/// Union of the `subdomain` key of every subdomain-module payload for a
/// target, sorted lexicographically with no duplicates.
pub fn get_unique_subdomains(conn: &Connection, target: &str) -> Result<Vec<String>, StoreError> {
    let findings = get_findings(conn, target, Some("subdomain"), None)?;
    let mut subdomains = BTreeSet::new();
    for finding in &findings {
        for entry in finding.entries() {
            if let Some(sub) = entry.get("subdomain").and_then(Value::as_str) {
                subdomains.insert(sub.to_string());
            }
        }
    }
    Ok(subdomains.into_iter().collect())
}

/// Deduplicated payload entries of one kind across all sources for a target.
///
/// The dedup key is either the tuple of `key_fields` values or the whole
/// entry in canonical encoding. First occurrence wins; insertion order is
/// preserved.
pub fn get_unique_findings(
    conn: &Connection,
    target: &str,
    kind: FindingKind,
    key_fields: Option<&[&str]>,
) -> Result<Vec<Value>, StoreError> {
    let findings = get_findings(conn, target, None, None)?;
    let mut seen = HashSet::new();
    let mut unique = Vec::new();

    for finding in findings.iter().filter(|f| f.kind == kind) {
        for entry in finding.entries() {
            if !entry.is_object() {
                continue;
            }
            let key = match key_fields {
                Some(fields) => {
                    let values: Vec<Option<&Value>> = fields.iter().map(|f| entry.get(f)).collect();
                    serde_json::to_string(&values)?
                }
                None => super::models::canonical_json(entry)?,
            };
            if seen.insert(key) {
                unique.push(entry.clone());
            }
        }
    }
    Ok(unique)
}

/// Physically delete rows whose (type, data) text duplicates an earlier row
/// for the target. Returns the number of rows removed.
pub fn compact(
    conn: &Connection,
    target: &str,
    kind: Option<FindingKind>,
) -> Result<usize, StoreError> {
    let mut sql = String::from("SELECT id, type, data FROM findings WHERE target = ?1");
    let mut args = vec![target.to_string()];
    if let Some(kind) = kind {
        sql.push_str(" AND type = ?2");
        args.push(kind.as_str().to_string());
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args))?;

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut to_delete: Vec<i64> = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let kind: String = row.get(1)?;
        let data: String = row.get(2)?;
        if !seen.insert((kind, data)) {
            to_delete.push(id);
        }
    }
    drop(rows);
    drop(stmt);

    if !to_delete.is_empty() {
        let tx = conn.unchecked_transaction()?;
        for id in &to_delete {
            tx.execute("DELETE FROM findings WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
    }
    Ok(to_delete.len())
}

/// Truncate both tables.
pub fn clear_history(conn: &Connection) -> Result<(), StoreError> {
    conn.execute("DELETE FROM findings", [])?;
    conn.execute("DELETE FROM scans", [])?;
    Ok(())
}

fn row_to_scan(row: &Row<'_>) -> Result<Scan, StoreError> {
    let status: String = row.get(2)?;
    Ok(Scan {
        id: row.get(0)?,
        target: row.get(1)?,
        status: ScanStatus::parse(&status).ok_or(StoreError::InvalidStatus(status))?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
    })
}

fn row_to_finding(row: &Row<'_>) -> Result<Finding, StoreError> {
    let kind: String = row.get(5)?;
    let data: String = row.get(6)?;
    Ok(Finding {
        id: row.get(0)?,
        scan_id: row.get(1)?,
        target: row.get(2)?,
        module: row.get(3)?,
        source: row.get(4)?,
        kind: FindingKind::parse(&kind)?,
        data: serde_json::from_str(&data)?,
        timestamp: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::canonical_json;
    use crate::db::schema::create_tables;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn insert(
        conn: &Connection,
        scan_id: Option<&str>,
        module: &str,
        source: &str,
        kind: FindingKind,
        data: Value,
    ) {
        let text = canonical_json(&data).unwrap();
        store_finding(conn, scan_id, "example.com", module, source, kind, &text).unwrap();
    }

    #[test]
    fn create_scan_rejects_duplicate_id() {
        let conn = test_conn();
        create_scan(&conn, "s1", "example.com", ScanStatus::Pending).unwrap();
        let err = create_scan(&conn, "s1", "example.com", ScanStatus::Pending).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == "s1"));
    }

    #[test]
    fn end_time_set_iff_terminal() {
        let conn = test_conn();
        create_scan(&conn, "s1", "example.com", ScanStatus::Pending).unwrap();

        update_scan_status(&conn, "s1", ScanStatus::Running).unwrap();
        let scan = get_scan(&conn, "s1").unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Running);
        assert!(scan.end_time.is_none());

        update_scan_status(&conn, "s1", ScanStatus::Completed).unwrap();
        let scan = get_scan(&conn, "s1").unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert!(scan.end_time.is_some());
    }

    #[test]
    fn list_scans_is_ordered_and_limited() {
        let conn = test_conn();
        for i in 0..5 {
            create_scan(&conn, &format!("s{i}"), "example.com", ScanStatus::Pending).unwrap();
            // Distinct start times so the ordering is deterministic
            conn.execute(
                "UPDATE scans SET start_time = ?1 WHERE id = ?2",
                params![format!("2026-01-0{}T00:00:00Z", i + 1), format!("s{i}")],
            )
            .unwrap();
        }
        let scans = list_scans(&conn, 3).unwrap();
        assert_eq!(scans.len(), 3);
        assert_eq!(scans[0].id, "s4");
        assert_eq!(scans[2].id, "s2");
    }

    #[test]
    fn module_filter_prefix_vs_exact() {
        let conn = test_conn();
        let payload = serde_json::json!({"subdomain": "a.example.com", "source": "crt.sh"});
        insert(&conn, None, "subdomain/crtsh", "crt.sh", FindingKind::Subdomain, payload.clone());
        insert(&conn, None, "subdomain/anubis", "anubis", FindingKind::Subdomain, payload);
        insert(
            &conn,
            None,
            "portscan/scanner",
            "port_scanner",
            FindingKind::Port,
            serde_json::json!({"ip": "1.2.3.4", "port": 80, "state": "open"}),
        );

        let prefix = get_findings(&conn, "example.com", Some("subdomain"), None).unwrap();
        assert_eq!(prefix.len(), 2);

        let exact = get_findings(&conn, "example.com", Some("subdomain/crtsh"), None).unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].module, "subdomain/crtsh");
    }

    #[test]
    fn scan_id_takes_precedence_over_target() {
        let conn = test_conn();
        let payload = serde_json::json!({"subdomain": "a.example.com", "source": "x"});
        insert(&conn, Some("s1"), "subdomain/crtsh", "crt.sh", FindingKind::Subdomain, payload.clone());
        insert(&conn, Some("s2"), "subdomain/crtsh", "crt.sh", FindingKind::Subdomain, payload);

        let scoped = get_findings(&conn, "example.com", None, Some("s1")).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].scan_id.as_deref(), Some("s1"));

        let all = get_findings(&conn, "example.com", None, None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn unique_subdomains_sorted_without_duplicates() {
        let conn = test_conn();
        insert(
            &conn,
            None,
            "subdomain/crtsh",
            "crt.sh",
            FindingKind::Subdomain,
            serde_json::json!([
                {"subdomain": "b.example.com", "source": "crt.sh"},
                {"subdomain": "a.example.com", "source": "crt.sh"}
            ]),
        );
        insert(
            &conn,
            None,
            "subdomain/anubis",
            "anubis",
            FindingKind::Subdomain,
            serde_json::json!({"subdomain": "a.example.com", "source": "anubis"}),
        );

        let subs = get_unique_subdomains(&conn, "example.com").unwrap();
        assert_eq!(subs, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn unique_findings_by_key_fields() {
        let conn = test_conn();
        insert(
            &conn,
            None,
            "portscan/scanner",
            "port_scanner",
            FindingKind::Port,
            serde_json::json!([
                {"ip": "1.2.3.4", "port": 80, "state": "open"},
                {"ip": "1.2.3.4", "port": 443, "state": "open"}
            ]),
        );
        insert(
            &conn,
            None,
            "portscan/scanner",
            "port_scanner",
            FindingKind::Port,
            serde_json::json!({"ip": "1.2.3.4", "port": 80, "state": "open"}),
        );

        let by_tuple =
            get_unique_findings(&conn, "example.com", FindingKind::Port, Some(&["ip", "port"]))
                .unwrap();
        assert_eq!(by_tuple.len(), 2);

        let by_payload = get_unique_findings(&conn, "example.com", FindingKind::Port, None).unwrap();
        assert_eq!(by_payload.len(), 2);
    }

    #[test]
    fn compact_removes_duplicates_and_is_idempotent() {
        let conn = test_conn();
        let payload = serde_json::json!([{"subdomain": "a.example.com", "source": "crt.sh"}]);
        insert(&conn, None, "subdomain/crtsh", "crt.sh", FindingKind::Subdomain, payload.clone());
        insert(&conn, None, "subdomain/anubis", "anubis", FindingKind::Subdomain, payload);

        assert_eq!(compact(&conn, "example.com", None).unwrap(), 1);
        assert_eq!(compact(&conn, "example.com", None).unwrap(), 0);

        let rows = get_findings(&conn, "example.com", None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].module, "subdomain/crtsh");
    }

    #[test]
    fn compact_scoped_to_kind() {
        let conn = test_conn();
        let sub = serde_json::json!({"subdomain": "a.example.com", "source": "x"});
        let port = serde_json::json!({"ip": "1.2.3.4", "port": 80, "state": "open"});
        insert(&conn, None, "subdomain/crtsh", "crt.sh", FindingKind::Subdomain, sub.clone());
        insert(&conn, None, "subdomain/crtsh", "crt.sh", FindingKind::Subdomain, sub);
        insert(&conn, None, "portscan/scanner", "s", FindingKind::Port, port.clone());
        insert(&conn, None, "portscan/scanner", "s", FindingKind::Port, port);

        assert_eq!(compact(&conn, "example.com", Some(FindingKind::Port)).unwrap(), 1);
        // Subdomain duplicates untouched by the scoped pass
        let subs = get_findings(&conn, "example.com", Some("subdomain"), None).unwrap();
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn clear_history_truncates_both_tables() {
        let conn = test_conn();
        create_scan(&conn, "s1", "example.com", ScanStatus::Pending).unwrap();
        insert(
            &conn,
            Some("s1"),
            "subdomain/crtsh",
            "crt.sh",
            FindingKind::Subdomain,
            serde_json::json!({"subdomain": "a.example.com", "source": "x"}),
        );
        clear_history(&conn).unwrap();
        assert!(get_scan(&conn, "s1").unwrap().is_none());
        assert!(get_findings(&conn, "example.com", None, None).unwrap().is_empty());
    }
}
