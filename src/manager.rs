// Scan manager — a thin supervisor over engine runs.
//
// It pre-creates the scan row (so clients can query the scan immediately),
// spawns the engine as a detached task, keeps a bounded in-memory log of
// progress events per scan, and forwards every event to the broadcaster
// for live subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db::models::{Finding, Scan, ScanStatus};
use crate::db::Store;
use crate::engine;
use crate::progress::{ProgressBroadcaster, ProgressEvent};

/// Events retained per scan for log replay.
const LOG_BUFFER: usize = 1000;

pub struct ScanManager {
    config: Config,
    store: Arc<Store>,
    broadcaster: Arc<ProgressBroadcaster>,
    scan_logs: Mutex<HashMap<String, VecDeque<ProgressEvent>>>,
    active_scans: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ScanManager {
    pub fn new(config: Config, store: Arc<Store>, broadcaster: Arc<ProgressBroadcaster>) -> Self {
        Self {
            config,
            store,
            broadcaster,
            scan_logs: Mutex::new(HashMap::new()),
            active_scans: Mutex::new(HashMap::new()),
        }
    }

    /// Start a scan in the background and return its identifier at once.
    pub async fn start_scan(self: &Arc<Self>, target: &str) -> Result<String> {
        let scan_id = Uuid::new_v4().to_string();

        // Pre-create the row so a status query can never race the engine
        self.store
            .create_scan(&scan_id, target, ScanStatus::Pending)
            .await?;
        self.scan_logs
            .lock()
            .await
            .insert(scan_id.clone(), VecDeque::new());

        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();

        // Forwarder: bounded log buffer + broadcaster fan-out
        let manager = self.clone();
        let forward_id = scan_id.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                manager.record_event(&forward_id, event.clone()).await;
                manager.broadcaster.publish(&forward_id, event).await;
            }
        });

        let manager = self.clone();
        let run_id = scan_id.clone();
        let target = target.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = engine::run_scan_with_store(
                &target,
                &manager.config,
                manager.store.clone(),
                Some(run_id.clone()),
                Some(tx),
            )
            .await
            {
                // The engine already marked the scan failed and emitted the
                // error event; just leave a trace in the server log.
                error!(scan_id = %run_id, error = %e, "Background scan failed");
            }
            manager.active_scans.lock().await.remove(&run_id);
        });
        self.active_scans
            .lock()
            .await
            .insert(scan_id.clone(), handle);

        info!(scan_id, "Scan started");
        Ok(scan_id)
    }

    async fn record_event(&self, scan_id: &str, event: ProgressEvent) {
        let mut logs = self.scan_logs.lock().await;
        let buffer = logs.entry(scan_id.to_string()).or_default();
        buffer.push_back(event);
        if buffer.len() > LOG_BUFFER {
            buffer.pop_front();
        }
    }

    /// Replay of everything a scan has reported so far.
    pub async fn get_scan_logs(&self, scan_id: &str) -> Vec<ProgressEvent> {
        self.scan_logs
            .lock()
            .await
            .get(scan_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Live subscription (replay included) via the broadcaster.
    pub async fn subscribe(&self, scan_id: &str) -> mpsc::UnboundedReceiver<ProgressEvent> {
        self.broadcaster.subscribe(scan_id).await
    }

    pub async fn list_scans(&self, limit: u32) -> Result<Vec<Scan>> {
        Ok(self.store.list_scans(limit).await?)
    }

    pub async fn get_scan(&self, scan_id: &str) -> Result<Option<Scan>> {
        Ok(self.store.get_scan(scan_id).await?)
    }

    /// Findings produced by one scan; empty when the scan is unknown.
    pub async fn get_scan_findings(&self, scan_id: &str) -> Result<Vec<Finding>> {
        let Some(scan) = self.store.get_scan(scan_id).await? else {
            return Ok(Vec::new());
        };
        Ok(self
            .store
            .get_findings(&scan.target, None, Some(scan_id))
            .await?)
    }

    /// Everything ever recorded for a target, across scans.
    pub async fn get_target_findings(&self, target: &str) -> Result<Vec<Finding>> {
        Ok(self.store.get_findings(target, None, None).await?)
    }

    /// Truncate the store and drop all in-memory log buffers.
    pub async fn clear_history(&self) -> Result<()> {
        self.store.clear_history().await?;
        self.scan_logs.lock().await.clear();
        self.broadcaster.clear().await;
        info!("Scan history and logs cleared");
        Ok(())
    }
}
