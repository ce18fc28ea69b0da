// Scan engine — executes one scan end-to-end.
//
// Five phases run in strict order; the modules inside a phase run as
// concurrent tasks. A faulting module is isolated and reported, never
// fatal; a phase that outlives its timeout is cut short and the engine
// moves on. Only engine-level failures (store create/update, compaction)
// mark the scan failed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{self, Config};
use crate::db::models::{FindingKind, ScanStatus};
use crate::db::{Store, StoreError};
use crate::limiter::RateLimiter;
use crate::modules::{load_enabled_modules, Category, Module};
use crate::progress::{ModuleStatus, ProgressEvent, ProgressSender};
use crate::proxy::ProxySelector;

/// Wall-clock bound per phase. Expiry ends the phase, not the scan.
const PHASE_TIMEOUT: Duration = Duration::from_secs(300);

/// The pipeline: later phases read earlier phases' findings by scan target.
const PHASES: &[(&str, &[Category])] = &[
    (
        "Phase 1: Discovery",
        &[Category::Subdomain, Category::Github, Category::CloudBuckets],
    ),
    ("Phase 2: Port Scanning", &[Category::Portscan]),
    ("Phase 3: Service Enrichment", &[Category::Shodan]),
    ("Phase 4: HTTP Analysis", &[Category::Http]),
    ("Phase 5: Visual Capture", &[Category::Screenshot]),
];

/// Run a full scan, opening the store named by the config.
///
/// This is the CLI entry point; the scan manager uses
/// [`run_scan_with_store`] to share its own handle.
pub async fn run_scan(
    target: &str,
    config_path: Option<&str>,
    scan_id: Option<String>,
    progress: Option<ProgressSender>,
) -> Result<()> {
    let config = Config::load(config_path.unwrap_or(config::DEFAULT_CONFIG_PATH));
    config::init_logging(&config.logging);
    let store = Arc::new(Store::open(&config.database)?);
    run_scan_with_store(target, &config, store, scan_id, progress).await
}

pub async fn run_scan_with_store(
    target: &str,
    config: &Config,
    store: Arc<Store>,
    scan_id: Option<String>,
    progress: Option<ProgressSender>,
) -> Result<()> {
    let emitter = ProgressEmitter { sender: progress };
    info!(target, "Starting comprehensive scan");
    emitter.emit(ProgressEvent::Status {
        status: ScanStatus::Running,
        message: Some(format!("Initializing scan for {target}")),
        summary: None,
    });

    let scan_id = scan_id.unwrap_or_else(generate_scan_id);

    // A supervising manager may have pre-created the row as pending.
    match store.create_scan(&scan_id, target, ScanStatus::Running).await {
        Ok(()) => {}
        Err(StoreError::AlreadyExists(_)) => {
            store.update_scan_status(&scan_id, ScanStatus::Running).await?;
        }
        Err(e) => return Err(e).context("Failed to create scan record"),
    }

    let limiter = RateLimiter::new(config.rate_limit);
    let proxy = Arc::new(ProxySelector::new(&config.proxy));

    match execute_pipeline(target, config, &store, &scan_id, &limiter, &proxy, &emitter).await {
        Ok(summary) => {
            store
                .update_scan_status(&scan_id, ScanStatus::Completed)
                .await
                .context("Failed to finalize scan record")?;
            info!(target, scan_id, "Scan completed successfully");
            emitter.emit(ProgressEvent::Status {
                status: ScanStatus::Completed,
                message: None,
                summary: Some(summary),
            });
            Ok(())
        }
        Err(e) => {
            error!(target, scan_id, error = %e, "Scan failed");
            if let Err(update_err) = store.update_scan_status(&scan_id, ScanStatus::Failed).await {
                error!(scan_id, error = %update_err, "Failed to mark scan as failed");
            }
            emitter.emit(ProgressEvent::error(format!("Global engine failure: {e}")));
            Err(e)
        }
    }
}

/// `cli_` + 8 hex chars of a fresh UUID, for scans started without an id.
fn generate_scan_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("cli_{}", &uuid[..8])
}

#[allow(clippy::too_many_arguments)]
async fn execute_pipeline(
    target: &str,
    config: &Config,
    store: &Arc<Store>,
    scan_id: &str,
    limiter: &RateLimiter,
    proxy: &Arc<ProxySelector>,
    emitter: &ProgressEmitter,
) -> Result<BTreeMap<String, u64>> {
    for (label, categories) in PHASES.iter().copied() {
        execute_phase(label, categories, target, config, store, scan_id, limiter, proxy, emitter)
            .await;
    }

    let deleted = store
        .compact(target, None)
        .await
        .context("Post-scan compaction failed")?;
    if deleted > 0 {
        info!(deleted, "Purged duplicate entries from database");
    }

    // Tabulate this scan's findings for the summary
    let findings = store.get_findings(target, None, Some(scan_id)).await?;
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut subdomains = BTreeSet::new();
    for finding in &findings {
        *counts.entry(finding.kind.as_str().to_string()).or_insert(0) += 1;
        if finding.kind == FindingKind::Subdomain {
            for entry in finding.entries() {
                if let Some(sub) = entry.get("subdomain").and_then(serde_json::Value::as_str) {
                    subdomains.insert(sub.to_string());
                }
            }
        }
    }

    info!(scan_id, "Scan summary:");
    for (kind, count) in &counts {
        info!("  > {kind}: {count}");
    }
    if !subdomains.is_empty() {
        info!("  > Unique subdomains: {}", subdomains.len());
    }

    Ok(counts)
}

/// Run one phase: load its modules, launch them concurrently, and wait for
/// all of them or the phase timeout, whichever comes first.
#[allow(clippy::too_many_arguments)]
async fn execute_phase(
    label: &str,
    categories: &[Category],
    target: &str,
    config: &Config,
    store: &Arc<Store>,
    scan_id: &str,
    limiter: &RateLimiter,
    proxy: &Arc<ProxySelector>,
    emitter: &ProgressEmitter,
) {
    emitter.emit(ProgressEvent::Phase {
        phase: label.to_string(),
        modules: categories.iter().map(|c| c.as_str().to_string()).collect(),
    });

    let modules = load_enabled_modules(
        &config.modules,
        &config.api_keys,
        store.clone(),
        Some(scan_id),
        limiter,
        proxy.clone(),
        categories,
    );
    if modules.is_empty() {
        debug!(label, "No modules enabled for this phase");
        return;
    }

    info!(label, count = modules.len(), "Running phase");
    emitter.emit(ProgressEvent::log(format!(
        "{label}: Running {} modules...",
        modules.len()
    )));

    let mut running: Vec<(&'static str, JoinHandle<()>)> = modules
        .into_iter()
        .map(|module| {
            let module: Arc<dyn Module> = Arc::from(module);
            let name = module.name();
            let target = target.to_string();
            let emitter = emitter.clone();
            let handle = tokio::spawn(async move {
                run_module_safe(module, &target, &emitter).await;
            });
            (name, handle)
        })
        .collect();

    let waiter = join_all(running.iter_mut().map(|(_, handle)| handle));
    match timeout(PHASE_TIMEOUT, waiter).await {
        Ok(joins) => {
            // A panicking module never reached its own module_end event
            for ((name, _), join) in running.iter().zip(joins) {
                let name = *name;
                if let Err(e) = join {
                    if e.is_panic() {
                        error!(module = name, "Module panicked");
                        emitter.emit(ProgressEvent::ModuleEnd {
                            module: name.to_string(),
                            status: ModuleStatus::Failed,
                            error: Some("module panicked".to_string()),
                        });
                    }
                }
            }
        }
        Err(_) => {
            warn!(label, timeout = ?PHASE_TIMEOUT, "Phase timed out, continuing scan");
            emitter.emit(ProgressEvent::log(format!(
                "{label}: timed out after {}s, continuing",
                PHASE_TIMEOUT.as_secs()
            )));
            for (_, handle) in &running {
                handle.abort();
            }
        }
    }
}

/// Isolation shell: a module's failure is logged and reported, never
/// rethrown into the engine.
async fn run_module_safe(module: Arc<dyn Module>, target: &str, emitter: &ProgressEmitter) {
    debug!(module = module.name(), "Launching module");
    match module.run(target).await {
        Ok(()) => {
            debug!(module = module.name(), "Module completed successfully");
            emitter.emit(ProgressEvent::ModuleEnd {
                module: module.name().to_string(),
                status: ModuleStatus::Completed,
                error: None,
            });
        }
        Err(e) => {
            error!(module = module.name(), error = %e, "Module encountered a fault");
            emitter.emit(ProgressEvent::ModuleEnd {
                module: module.name().to_string(),
                status: ModuleStatus::Failed,
                error: Some(e.to_string()),
            });
            emitter.emit(ProgressEvent::error(format!("{} failed: {e}", module.name())));
        }
    }
}

/// Fire-and-forget event emission; nobody listening is fine.
#[derive(Clone)]
struct ProgressEmitter {
    sender: Option<ProgressSender>,
}

impl ProgressEmitter {
    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
