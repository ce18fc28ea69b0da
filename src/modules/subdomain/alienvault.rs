// AlienVault OTX passive DNS records.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::models::SubdomainRecord;
use crate::modules::{Category, Module, ModuleContext};

pub struct AlienVault {
    ctx: ModuleContext,
}

impl AlienVault {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct PassiveDnsResponse {
    #[serde(default)]
    passive_dns: Vec<PassiveDnsRecord>,
}

#[derive(Debug, Deserialize)]
struct PassiveDnsRecord {
    #[serde(default)]
    hostname: String,
}

#[async_trait]
impl Module for AlienVault {
    fn name(&self) -> &'static str {
        "alienvault"
    }

    fn category(&self) -> Category {
        Category::Subdomain
    }

    async fn run(&self, target: &str) -> Result<()> {
        if !self.validate_target(target) {
            warn!(target, "Invalid target format");
            return Ok(());
        }

        let url =
            format!("https://otx.alienvault.com/api/v1/indicators/domain/{target}/passive_dns");
        info!(target, "Querying AlienVault OTX passive DNS records");

        let client = self.ctx.proxy.http_client(Duration::from_secs(30))?;
        self.ctx.limiter.acquire().await;

        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "OTX API returned non-200 status");
            return Ok(());
        }

        let body: PassiveDnsResponse = response.json().await?;
        let mut subdomains = BTreeSet::new();
        for record in &body.passive_dns {
            let hostname = record.hostname.to_lowercase();
            if hostname.ends_with(target) && hostname != target {
                subdomains.insert(hostname);
            }
        }

        let findings: Vec<SubdomainRecord> = subdomains
            .into_iter()
            .map(|subdomain| SubdomainRecord {
                subdomain,
                source: "alienvault".to_string(),
            })
            .collect();

        if findings.is_empty() {
            info!(target, "No passive DNS records found");
        } else {
            info!(target, count = findings.len(), "Discovered subdomains via OTX");
            self.ctx
                .store_findings_default_type(target, "alienvault", &findings)
                .await;
        }

        Ok(())
    }
}
