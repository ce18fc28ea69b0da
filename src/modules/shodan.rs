// Shodan enrichment — adds organization, OS, open-port, and banner metadata
// to the IPs observed during the port scan. With no scanned IPs on record
// the target is resolved directly so a bare scan still gets one lookup.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::db::models::{EnrichmentRecord, FindingKind, ServiceBanner};
use crate::modules::{Category, Module, ModuleContext};

const BANNER_CAP: usize = 500;

pub struct ShodanEnricher {
    ctx: ModuleContext,
}

impl ShodanEnricher {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct ShodanHost {
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    vulns: Vec<String>,
    #[serde(default)]
    hostnames: Vec<String>,
    #[serde(default)]
    data: Vec<ShodanService>,
}

#[derive(Debug, Deserialize)]
struct ShodanService {
    #[serde(default)]
    port: u16,
    #[serde(default)]
    data: String,
    #[serde(default)]
    product: Option<String>,
}

#[async_trait]
impl Module for ShodanEnricher {
    fn name(&self) -> &'static str {
        "enricher"
    }

    fn category(&self) -> Category {
        Category::Shodan
    }

    async fn run(&self, target: &str) -> Result<()> {
        let Some(api_key) = self.ctx.api_keys.shodan.clone() else {
            warn!("Shodan API key missing, skipping enrichment");
            return Ok(());
        };

        // IPs already observed for this target, else resolve directly
        let mut ips = BTreeSet::new();
        for finding in self
            .ctx
            .store
            .get_findings(target, Some("portscan/scanner"), None)
            .await?
        {
            for entry in finding.entries() {
                if let Some(ip) = entry.get("ip").and_then(Value::as_str) {
                    ips.insert(ip.to_string());
                }
            }
        }
        if ips.is_empty() {
            debug!(target, "No scanned IPs on record, resolving target");
            match tokio::net::lookup_host((target, 0u16)).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.next() {
                        ips.insert(addr.ip().to_string());
                    }
                }
                Err(e) => {
                    error!(target, error = %e, "Failed to resolve target for enrichment");
                    return Ok(());
                }
            }
        }

        info!(target, count = ips.len(), "Enriching IPs via Shodan");
        let client = self.ctx.proxy.http_client(Duration::from_secs(30))?;

        let mut findings = Vec::new();
        for ip in &ips {
            self.ctx.limiter.acquire().await;

            let url = format!("https://api.shodan.io/shodan/host/{ip}?key={api_key}");
            let host: ShodanHost = match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => match response.json().await {
                    Ok(host) => host,
                    Err(e) => {
                        error!(ip, error = %e, "Invalid Shodan response");
                        continue;
                    }
                },
                Ok(response) => {
                    error!(ip, status = %response.status(), "Shodan API error");
                    continue;
                }
                Err(e) => {
                    error!(ip, error = %e, "Shodan request failed");
                    continue;
                }
            };

            findings.push(EnrichmentRecord {
                ip: ip.clone(),
                org: host.org.unwrap_or_else(|| "Unknown".to_string()),
                os: host.os.unwrap_or_else(|| "Unknown".to_string()),
                ports: host.ports,
                vulns: host.vulns,
                hostnames: host.hostnames,
                data: host
                    .data
                    .into_iter()
                    .map(|service| ServiceBanner {
                        port: service.port,
                        banner: service.data.trim().chars().take(BANNER_CAP).collect(),
                        service: service.product.unwrap_or_else(|| "Unknown".to_string()),
                    })
                    .collect(),
            });
            debug!(ip, "Enriched host");
        }

        if findings.is_empty() {
            info!(target, "No Shodan data discovered");
        } else {
            info!(target, count = findings.len(), "Stored Shodan enrichment");
            self.ctx
                .store_findings(target, "shodan", FindingKind::Enrichment, &findings)
                .await;
        }

        Ok(())
    }
}
