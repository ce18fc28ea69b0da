// Certificate Transparency logs via crt.sh.
//
// CT logs are a highly effective way to find subdomains that have had
// SSL/TLS certificates issued.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::models::{FindingKind, SubdomainRecord};
use crate::modules::{Category, Module, ModuleContext};

pub struct Crtsh {
    ctx: ModuleContext,
}

impl Crtsh {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct CrtshEntry {
    #[serde(default)]
    name_value: String,
}

#[async_trait]
impl Module for Crtsh {
    fn name(&self) -> &'static str {
        "crtsh"
    }

    fn category(&self) -> Category {
        Category::Subdomain
    }

    async fn run(&self, target: &str) -> Result<()> {
        if !self.validate_target(target) {
            warn!(target, "Invalid target format");
            return Ok(());
        }

        let url = format!("https://crt.sh/?q=%.{target}&output=json");
        info!(target, "Searching Certificate Transparency logs on crt.sh");

        let client = self.ctx.proxy.http_client(Duration::from_secs(60))?;
        self.ctx.limiter.acquire().await;

        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "crt.sh returned non-200 status");
            return Ok(());
        }

        // crt.sh sometimes serves an HTML error page even with JSON requested
        let entries: Vec<CrtshEntry> = match response.json().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Received invalid JSON response from crt.sh");
                return Ok(());
            }
        };

        let mut subdomains = BTreeSet::new();
        for entry in &entries {
            // name_value can contain multiple domains separated by newline
            for domain in entry.name_value.split('\n') {
                let domain = domain.trim().to_lowercase();
                let domain = domain.strip_prefix("*.").unwrap_or(&domain);
                if domain.ends_with(target) && domain != target {
                    subdomains.insert(domain.to_string());
                }
            }
        }

        let findings: Vec<SubdomainRecord> = subdomains
            .into_iter()
            .map(|subdomain| SubdomainRecord {
                subdomain,
                source: "crt.sh".to_string(),
            })
            .collect();

        if findings.is_empty() {
            info!(target, "No certificates found");
        } else {
            info!(target, count = findings.len(), "Discovered subdomains via crt.sh");
            self.ctx
                .store_findings(target, "crt.sh", FindingKind::Subdomain, &findings)
                .await;
        }

        Ok(())
    }
}
