// TCP port scanner — resolves the target and probes a configurable port
// list with bounded concurrency. An unresolvable target yields no findings
// and the scan carries on.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info};

use crate::db::models::{FindingKind, PortRecord};
use crate::modules::{Category, Module, ModuleContext};

const DEFAULT_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 445, 993, 995, 1723, 3306, 3389, 5900,
    8080, 8443,
];

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PortscanSettings {
    ports: Vec<u16>,
    /// Per-port connect timeout in seconds.
    timeout: u64,
    concurrency: usize,
}

impl Default for PortscanSettings {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PORTS.to_vec(),
            timeout: 2,
            concurrency: 100,
        }
    }
}

pub struct PortScanner {
    ctx: ModuleContext,
}

impl PortScanner {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Module for PortScanner {
    fn name(&self) -> &'static str {
        "scanner"
    }

    fn category(&self) -> Category {
        Category::Portscan
    }

    async fn run(&self, target: &str) -> Result<()> {
        let Some(ip) = resolve(target).await else {
            error!(target, "Could not resolve target");
            return Ok(());
        };
        info!(target, ip = %ip, "Resolved target, starting port scan");

        let settings: PortscanSettings = self.ctx.parse_settings();
        let connect_timeout = Duration::from_secs(settings.timeout);
        let semaphore = Arc::new(Semaphore::new(settings.concurrency));

        let checks = settings.ports.iter().map(|&port| {
            let semaphore = semaphore.clone();
            let limiter = self.ctx.limiter.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                limiter.acquire().await;
                match timeout(connect_timeout, TcpStream::connect((ip, port))).await {
                    Ok(Ok(_stream)) => Some(port),
                    _ => None,
                }
            }
        });

        let open_ports: Vec<u16> = join_all(checks).await.into_iter().flatten().collect();

        if open_ports.is_empty() {
            info!(target, "No open ports found");
            return Ok(());
        }

        let findings: Vec<PortRecord> = open_ports
            .iter()
            .map(|&port| PortRecord {
                ip: ip.to_string(),
                port,
                state: "open".to_string(),
            })
            .collect();
        info!(target, count = findings.len(), "Open ports found");
        self.ctx
            .store_findings(target, "port_scanner", FindingKind::Port, &findings)
            .await;

        Ok(())
    }
}

/// Resolve a hostname, preferring an IPv4 address when both families exist.
async fn resolve(target: &str) -> Option<IpAddr> {
    let addrs: Vec<_> = tokio::net::lookup_host((target, 0u16)).await.ok()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_the_probe_profile() {
        let settings = PortscanSettings::default();
        assert_eq!(settings.ports.len(), 21);
        assert!(settings.ports.contains(&443));
        assert_eq!(settings.timeout, 2);
        assert_eq!(settings.concurrency, 100);
    }

    #[tokio::test]
    async fn scanner_finds_a_listening_port() {
        use crate::config::{ApiKeys, ProxyConfig};
        use crate::db::Store;
        use crate::limiter::RateLimiter;
        use crate::proxy::ProxySelector;

        // Bind an ephemeral port on localhost and scan just that port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let store = Arc::new(Store::open_in_memory().unwrap());
        let settings = serde_yaml::from_str(&format!("ports: [{port}]\ntimeout: 1")).unwrap();
        let ctx = ModuleContext::new(
            Category::Portscan,
            "scanner",
            store.clone(),
            Some("s1".to_string()),
            RateLimiter::new(0.0),
            Arc::new(ProxySelector::new(&ProxyConfig::default())),
            settings,
            ApiKeys::default(),
        );
        store
            .create_scan("s1", "localhost", crate::db::models::ScanStatus::Running)
            .await
            .unwrap();

        let scanner = PortScanner::new(ctx);
        scanner.run("localhost").await.unwrap();

        let findings = store
            .get_findings("localhost", Some("portscan/scanner"), None)
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Port);
        let entries: Vec<PortRecord> =
            serde_json::from_value(findings[0].data.clone()).unwrap();
        assert_eq!(entries[0].port, port);
        assert_eq!(entries[0].state, "open");
    }
}
