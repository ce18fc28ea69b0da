// HTTP service detection — probes discovered hosts over http and https,
// recording status, server headers, and page titles.
//
// Hosts that showed a web-ish open port in the port scan are probed first,
// then every subdomain from discovery; with nothing discovered the bare
// target is probed. The probe list is capped to keep a huge discovery
// phase from stalling the scan.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Proxy};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::db::models::{FindingKind, HttpRecord};
use crate::db::Store;
use crate::limiter::RateLimiter;
use crate::modules::{Category, Module, ModuleContext};

/// Ports that suggest a web service is listening.
const WEB_PORTS: &[u16] = &[80, 443, 8000, 8080, 8443, 8888];

/// How much of a body to read when hunting for a title.
const BODY_CAP: usize = 128 * 1024;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HttpSettings {
    probing_limit: usize,
    concurrency: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            probing_limit: 100,
            concurrency: 20,
        }
    }
}

pub struct HttpDetector {
    ctx: ModuleContext,
}

impl HttpDetector {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Module for HttpDetector {
    fn name(&self) -> &'static str {
        "detector"
    }

    fn category(&self) -> Category {
        Category::Http
    }

    async fn run(&self, target: &str) -> Result<()> {
        let settings: HttpSettings = self.ctx.parse_settings();

        let mut targets = collect_targets(&self.ctx.store, target).await?;
        if targets.len() > settings.probing_limit {
            info!(
                limit = settings.probing_limit,
                total = targets.len(),
                "Limiting HTTP probes"
            );
            targets.truncate(settings.probing_limit);
        }

        let mut builder = self
            .ctx
            .proxy
            .client_builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(3));
        if let Some(url) = self.ctx.proxy.request_proxy_url() {
            builder = builder.proxy(Proxy::all(url)?);
        }
        let client = builder.build()?;

        info!(count = targets.len(), "Starting HTTP service discovery");

        let findings: Vec<HttpRecord> = stream::iter(targets)
            .map(|host| {
                let client = client.clone();
                let limiter = self.ctx.limiter.clone();
                async move { probe_host(&client, &limiter, &host).await }
            })
            .buffer_unordered(settings.concurrency)
            .collect::<Vec<Vec<HttpRecord>>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        if findings.is_empty() {
            info!(target, "No active HTTP services discovered");
        } else {
            info!(target, count = findings.len(), "Identified HTTP services");
            self.ctx
                .store_findings(target, "http_detector", FindingKind::Http, &findings)
                .await;
        }

        Ok(())
    }
}

/// Build the probe list: hosts with open web ports first, then all
/// discovered subdomains, falling back to the bare target.
async fn collect_targets(store: &Store, target: &str) -> Result<Vec<String>> {
    let mut subdomains: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for finding in store.get_findings(target, Some("subdomain"), None).await? {
        for entry in finding.entries() {
            if let Some(sub) = entry.get("subdomain").and_then(Value::as_str) {
                if seen.insert(sub.to_string()) {
                    subdomains.push(sub.to_string());
                }
            }
        }
    }

    // Port findings carry only the resolved IP, so a web-ish open port
    // promotes the scanned host itself to the front of the list.
    let mut prioritized: Vec<String> = Vec::new();
    for finding in store.get_findings(target, Some("portscan"), None).await? {
        for entry in finding.entries() {
            let port = entry.get("port").and_then(Value::as_u64).unwrap_or(0) as u16;
            if WEB_PORTS.contains(&port) && !prioritized.iter().any(|h| h == target) {
                prioritized.push(target.to_string());
            }
        }
    }

    let mut targets = prioritized.clone();
    targets.extend(subdomains.into_iter().filter(|s| !prioritized.contains(s)));
    if targets.is_empty() {
        targets.push(target.to_string());
    }
    Ok(targets)
}

/// Probe one host over both schemes; connection failures are skipped.
async fn probe_host(client: &Client, limiter: &RateLimiter, host: &str) -> Vec<HttpRecord> {
    let mut records = Vec::new();
    for scheme in ["http", "https"] {
        let url = format!("{scheme}://{host}");
        limiter.acquire().await;
        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url, error = %e, "Probe failed");
                continue;
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("N/A")
                .to_string()
        };
        let server = header("server");
        let x_powered_by = header("x-powered-by");

        let body = read_capped(response, BODY_CAP).await;
        records.push(HttpRecord {
            url: final_url,
            status,
            server,
            title: extract_title(&body),
            x_powered_by,
        });
    }
    records
}

/// Read at most `cap` bytes of a response body.
async fn read_capped(mut response: reqwest::Response, cap: usize) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        buf.extend_from_slice(&chunk);
        if buf.len() >= cap {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// Kept synchronous: scraper's DOM is not Send, so it must never live
// across an await point.
fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").unwrap();
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "No Title".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn extracts_titles_and_falls_back() {
        assert_eq!(
            extract_title("<html><head><title> Admin Panel </title></head></html>"),
            "Admin Panel"
        );
        assert_eq!(extract_title("<html><body>no title here</body></html>"), "No Title");
        assert_eq!(extract_title(""), "No Title");
    }

    #[tokio::test]
    async fn target_collection_prioritizes_web_ports() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .store_finding(
                None,
                "example.com",
                "subdomain/crtsh",
                "crt.sh",
                FindingKind::Subdomain,
                &serde_json::json!([
                    {"subdomain": "api.example.com", "source": "crt.sh"},
                    {"subdomain": "www.example.com", "source": "crt.sh"}
                ]),
            )
            .await
            .unwrap();
        store
            .store_finding(
                None,
                "example.com",
                "portscan/scanner",
                "port_scanner",
                FindingKind::Port,
                &serde_json::json!([{"ip": "192.0.2.1", "port": 443, "state": "open"}]),
            )
            .await
            .unwrap();

        let targets = collect_targets(&store, "example.com").await.unwrap();
        assert_eq!(targets[0], "example.com");
        assert!(targets.contains(&"api.example.com".to_string()));
        assert!(targets.contains(&"www.example.com".to_string()));
    }

    #[tokio::test]
    async fn bare_target_when_nothing_discovered() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let targets = collect_targets(&store, "example.com").await.unwrap();
        assert_eq!(targets, vec!["example.com"]);
    }
}
