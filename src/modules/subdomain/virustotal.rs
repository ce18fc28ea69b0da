// VirusTotal v3 domain relationships. Requires `api_keys.virustotal`.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::db::models::SubdomainRecord;
use crate::modules::{Category, Module, ModuleContext};

pub struct VirusTotal {
    ctx: ModuleContext,
}

impl VirusTotal {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct DomainsResponse {
    #[serde(default)]
    data: Vec<DomainObject>,
}

#[derive(Debug, Deserialize)]
struct DomainObject {
    #[serde(default)]
    id: String,
}

#[async_trait]
impl Module for VirusTotal {
    fn name(&self) -> &'static str {
        "virustotal"
    }

    fn category(&self) -> Category {
        Category::Subdomain
    }

    async fn run(&self, target: &str) -> Result<()> {
        let Some(api_key) = self.ctx.api_keys.virustotal.clone() else {
            warn!("VirusTotal API key missing, skipping discovery");
            return Ok(());
        };

        if !self.validate_target(target) {
            warn!(target, "Invalid target format");
            return Ok(());
        }

        let url = format!("https://www.virustotal.com/api/v3/domains/{target}/subdomains?limit=40");
        info!(target, "Searching VirusTotal database");

        let client = self.ctx.proxy.http_client(Duration::from_secs(30))?;
        self.ctx.limiter.acquire().await;

        let response = client.get(&url).header("x-apikey", api_key).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => {
                error!("VirusTotal API key is invalid");
                return Ok(());
            }
            status if !status.is_success() => {
                warn!(status = %status, "VirusTotal API returned non-200 status");
                return Ok(());
            }
            _ => {}
        }

        let body: DomainsResponse = response.json().await?;
        let subdomains: BTreeSet<String> = body
            .data
            .iter()
            .map(|d| d.id.to_lowercase())
            .filter(|s| s.ends_with(target) && s != target)
            .collect();

        let findings: Vec<SubdomainRecord> = subdomains
            .into_iter()
            .map(|subdomain| SubdomainRecord {
                subdomain,
                source: "virustotal".to_string(),
            })
            .collect();

        if findings.is_empty() {
            info!(target, "No records found in VirusTotal");
        } else {
            info!(target, count = findings.len(), "Discovered subdomains via VirusTotal");
            self.ctx
                .store_findings_default_type(target, "virustotal", &findings)
                .await;
        }

        Ok(())
    }
}
