// End-to-end scan flow tests.
//
// The engine drives a real in-memory store; no external network is touched.
// The only live module exercised here is the port scanner, pointed at an
// ephemeral listener on localhost.

use std::sync::Arc;

use dragnet::config::Config;
use dragnet::db::models::{FindingKind, ScanStatus};
use dragnet::db::Store;
use dragnet::engine;
use dragnet::progress::{ModuleStatus, ProgressEvent};

fn drain(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn minimal_scan_completes_with_empty_summary() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    engine::run_scan_with_store(
        "example.com",
        &Config::default(),
        store.clone(),
        Some("scan-1".to_string()),
        Some(tx),
    )
    .await
    .unwrap();

    let scan = store.get_scan("scan-1").await.unwrap().unwrap();
    assert_eq!(scan.status, ScanStatus::Completed);
    assert!(scan.end_time.is_some());
    assert!(store
        .get_findings("example.com", None, None)
        .await
        .unwrap()
        .is_empty());

    let events = drain(&mut rx);
    let running = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Status { status: ScanStatus::Running, .. }))
        .count();
    let completed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Status {
                status: ScanStatus::Completed,
                summary,
                ..
            } => Some(summary.clone()),
            _ => None,
        })
        .collect();
    let phases = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Phase { .. }))
        .count();

    assert_eq!(running, 1);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0], Some(Default::default()));
    assert_eq!(phases, 5);
}

#[tokio::test]
async fn scan_id_is_generated_when_absent() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    engine::run_scan_with_store("example.com", &Config::default(), store.clone(), None, None)
        .await
        .unwrap();

    let scans = store.list_scans(10).await.unwrap();
    assert_eq!(scans.len(), 1);
    assert!(scans[0].id.starts_with("cli_"));
    assert_eq!(scans[0].status, ScanStatus::Completed);
}

#[tokio::test]
async fn unknown_enabled_sources_do_not_break_the_scan() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let mut config = Config::default();
    config
        .modules
        .enabled
        .insert("subdomain".to_string(), vec!["no_such_source".to_string()]);

    engine::run_scan_with_store("example.com", &config, store.clone(), Some("s1".into()), None)
        .await
        .unwrap();

    let scan = store.get_scan("s1").await.unwrap().unwrap();
    assert_eq!(scan.status, ScanStatus::Completed);
}

#[tokio::test]
async fn portscan_findings_flow_into_the_scan_summary() {
    // A real listener so the scanner has one open port to find
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let store = Arc::new(Store::open_in_memory().unwrap());
    let mut config = Config::default();
    config
        .modules
        .enabled
        .insert("portscan".to_string(), vec!["scanner".to_string()]);
    config.modules.settings.insert(
        "portscan".to_string(),
        serde_yaml::from_str(&format!("ports: [{port}]\ntimeout: 1")).unwrap(),
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    engine::run_scan_with_store(
        "localhost",
        &config,
        store.clone(),
        Some("scan-ports".to_string()),
        Some(tx),
    )
    .await
    .unwrap();

    // The finding is tagged with the scan and counted in the summary
    let findings = store
        .get_findings("localhost", Some("portscan/scanner"), None)
        .await
        .unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, FindingKind::Port);
    assert_eq!(findings[0].scan_id.as_deref(), Some("scan-ports"));

    let events = drain(&mut rx);
    let module_ends: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::ModuleEnd { module, status, .. } => Some((module.clone(), *status)),
            _ => None,
        })
        .collect();
    assert_eq!(module_ends, vec![("scanner".to_string(), ModuleStatus::Completed)]);

    let summary = events.iter().find_map(|e| match e {
        ProgressEvent::Status {
            status: ScanStatus::Completed,
            summary,
            ..
        } => summary.clone(),
        _ => None,
    });
    assert_eq!(summary.unwrap().get("port"), Some(&1));
}

#[tokio::test]
async fn duplicate_findings_are_compacted_at_scan_end() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .create_scan("scan-dup", "example.com", ScanStatus::Pending)
        .await
        .unwrap();

    // Two sources reported the same subdomain before this scan's phases ran
    let payload = serde_json::json!([{"subdomain": "a.example.com", "source": "crt.sh"}]);
    store
        .store_finding(
            Some("scan-dup"),
            "example.com",
            "subdomain/crtsh",
            "crt.sh",
            FindingKind::Subdomain,
            &payload,
        )
        .await
        .unwrap();
    store
        .store_finding(
            Some("scan-dup"),
            "example.com",
            "subdomain/anubis",
            "anubis",
            FindingKind::Subdomain,
            &payload,
        )
        .await
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    engine::run_scan_with_store(
        "example.com",
        &Config::default(),
        store.clone(),
        Some("scan-dup".to_string()),
        Some(tx),
    )
    .await
    .unwrap();

    // Compaction kept exactly one row; the views agree
    let findings = store.get_findings("example.com", None, None).await.unwrap();
    assert_eq!(findings.len(), 1);
    let subdomains = store.get_unique_subdomains("example.com").await.unwrap();
    assert_eq!(subdomains, vec!["a.example.com"]);

    let summary = drain(&mut rx).into_iter().find_map(|e| match e {
        ProgressEvent::Status {
            status: ScanStatus::Completed,
            summary,
            ..
        } => summary,
        _ => None,
    });
    assert_eq!(summary.unwrap().get("subdomain"), Some(&1));
}

#[tokio::test]
async fn reused_scan_id_from_a_supervisor_is_tolerated() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .create_scan("pre-created", "example.com", ScanStatus::Pending)
        .await
        .unwrap();

    engine::run_scan_with_store(
        "example.com",
        &Config::default(),
        store.clone(),
        Some("pre-created".to_string()),
        None,
    )
    .await
    .unwrap();

    let scan = store.get_scan("pre-created").await.unwrap().unwrap();
    assert_eq!(scan.status, ScanStatus::Completed);
}
