// AnubisDB (jldc.me) — a community subdomain database with a flat JSON API.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::db::models::SubdomainRecord;
use crate::modules::{Category, Module, ModuleContext};

pub struct Anubis {
    ctx: ModuleContext,
}

impl Anubis {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Module for Anubis {
    fn name(&self) -> &'static str {
        "anubis"
    }

    fn category(&self) -> Category {
        Category::Subdomain
    }

    async fn run(&self, target: &str) -> Result<()> {
        if !self.validate_target(target) {
            warn!(target, "Invalid target format");
            return Ok(());
        }

        let url = format!("https://jldc.me/anubis/subdomains/{target}");
        info!(target, "Querying AnubisDB");

        let client = self.ctx.proxy.http_client(Duration::from_secs(30))?;
        self.ctx.limiter.acquire().await;

        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "AnubisDB returned non-200 status");
            return Ok(());
        }

        // The API answers with a bare JSON array of hostnames
        let hosts: Vec<String> = match response.json().await {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!(error = %e, "Invalid JSON response from AnubisDB");
                return Ok(());
            }
        };

        let subdomains: BTreeSet<String> = hosts
            .iter()
            .map(|h| h.to_lowercase())
            .filter(|h| h.ends_with(target) && h != target)
            .collect();

        let findings: Vec<SubdomainRecord> = subdomains
            .into_iter()
            .map(|subdomain| SubdomainRecord {
                subdomain,
                source: "anubis".to_string(),
            })
            .collect();

        if findings.is_empty() {
            info!(target, "No records found in AnubisDB");
        } else {
            info!(target, count = findings.len(), "Discovered subdomains via AnubisDB");
            self.ctx
                .store_findings_default_type(target, "anubis", &findings)
                .await;
        }

        Ok(())
    }
}
