// Visual capture — renders each live HTTP service found in this scan and
// saves a PNG under reports/screenshots.
//
// Capture drives a system Chromium binary as a child process
// (`--headless --screenshot`), one process per page, bounded by a small
// semaphore. The browser path is configurable; without one on the machine
// the module skips itself.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::db::models::{FindingKind, ScreenshotRecord};
use crate::modules::{Category, Module, ModuleContext};
use crate::util::sanitize_url_filename;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ScreenshotSettings {
    /// Per-page capture timeout in seconds.
    timeout: u64,
    concurrency: usize,
    browser_path: Option<String>,
    output_dir: String,
}

impl Default for ScreenshotSettings {
    fn default() -> Self {
        Self {
            timeout: 45,
            concurrency: 5,
            browser_path: None,
            output_dir: "reports/screenshots".to_string(),
        }
    }
}

pub struct ScreenshotCapturer {
    ctx: ModuleContext,
}

impl ScreenshotCapturer {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Module for ScreenshotCapturer {
    fn name(&self) -> &'static str {
        "capturer"
    }

    fn category(&self) -> Category {
        Category::Screenshot
    }

    async fn run(&self, target: &str) -> Result<()> {
        let settings: ScreenshotSettings = self.ctx.parse_settings();

        let Some(browser) = find_browser(settings.browser_path.as_deref()) else {
            error!("No headless browser found, skipping screenshots");
            return Ok(());
        };

        // URLs identified by the HTTP phase of this scan, deduplicated
        let mut seen = HashSet::new();
        let mut urls: Vec<String> = Vec::new();
        for finding in self
            .ctx
            .store
            .get_findings(target, Some("http/detector"), self.ctx.scan_id.as_deref())
            .await?
        {
            for entry in finding.entries() {
                if let Some(url) = entry.get("url").and_then(Value::as_str) {
                    if seen.insert(url.to_string()) {
                        urls.push(url.to_string());
                    }
                }
            }
        }
        if urls.is_empty() {
            info!(target, "No active services found to capture");
            return Ok(());
        }

        std::fs::create_dir_all(&settings.output_dir)?;
        info!(target, count = urls.len(), browser, "Launching browser captures");

        let capture_timeout = Duration::from_secs(settings.timeout);
        let semaphore = Arc::new(Semaphore::new(settings.concurrency));

        let captures = urls.iter().map(|url| {
            let semaphore = semaphore.clone();
            let limiter = self.ctx.limiter.clone();
            let browser = browser.clone();
            let output_dir = settings.output_dir.clone();
            let url = url.clone();
            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                limiter.acquire().await;
                Some(capture(&browser, &url, &output_dir, capture_timeout).await)
            }
        });

        let findings: Vec<ScreenshotRecord> =
            join_all(captures).await.into_iter().flatten().collect();

        let succeeded = findings.iter().filter(|f| f.status == "success").count();
        info!(
            target,
            processed = findings.len(),
            succeeded,
            failed = findings.len() - succeeded,
            "Screenshot pass finished"
        );
        if findings.is_empty() {
            warn!("No screenshot results were generated");
        } else {
            self.ctx
                .store_findings(
                    target,
                    "screenshot_capturer",
                    FindingKind::Screenshot,
                    &findings,
                )
                .await;
        }

        Ok(())
    }
}

/// Navigate one URL in a fresh headless browser process and save a PNG.
async fn capture(
    browser: &str,
    url: &str,
    output_dir: &str,
    capture_timeout: Duration,
) -> ScreenshotRecord {
    let filename = format!("{}.png", sanitize_url_filename(url));
    let filepath = Path::new(output_dir).join(&filename);
    debug!(url, "Capturing");

    let mut command = tokio::process::Command::new(browser);
    command
        .arg("--headless")
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--hide-scrollbars")
        .arg("--window-size=1280,720")
        .arg(format!("--screenshot={}", filepath.display()))
        .arg(url)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let failed = |reason: String| ScreenshotRecord {
        url: url.to_string(),
        screenshot_path: None,
        status: "failed".to_string(),
        error: Some(reason),
    };

    match timeout(capture_timeout, command.output()).await {
        Err(_) => failed(format!("Navigation timed out after {}s", capture_timeout.as_secs())),
        Ok(Err(e)) => failed(format!("Failed to launch browser: {e}")),
        Ok(Ok(output)) => {
            if output.status.success() && filepath.exists() {
                info!(filename, "Saved screenshot");
                ScreenshotRecord {
                    url: url.to_string(),
                    screenshot_path: Some(format!("{output_dir}/{filename}")),
                    status: "success".to_string(),
                    error: None,
                }
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr
                    .lines()
                    .last()
                    .unwrap_or("Image not saved")
                    .chars()
                    .take(200)
                    .collect();
                failed(reason)
            }
        }
    }
}

/// The configured browser, or the first Chromium-family binary on PATH.
fn find_browser(configured: Option<&str>) -> Option<String> {
    if let Some(path) = configured {
        return Some(path.to_string());
    }
    let candidates = [
        "chromium",
        "chromium-browser",
        "google-chrome",
        "google-chrome-stable",
        "chrome",
    ];
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for candidate in candidates {
            let full: PathBuf = dir.join(candidate);
            if full.is_file() {
                return Some(full.to_string_lossy().into_owned());
            }
        }
    }
    None
}
