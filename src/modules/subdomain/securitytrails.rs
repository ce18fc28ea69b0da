// SecurityTrails subdomain listing. Requires `api_keys.securitytrails`.
// The API returns bare prefixes which are expanded to full hostnames here.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::db::models::SubdomainRecord;
use crate::modules::{Category, Module, ModuleContext};

pub struct SecurityTrails {
    ctx: ModuleContext,
}

impl SecurityTrails {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct SubdomainsResponse {
    #[serde(default)]
    subdomains: Vec<String>,
}

#[async_trait]
impl Module for SecurityTrails {
    fn name(&self) -> &'static str {
        "securitytrails"
    }

    fn category(&self) -> Category {
        Category::Subdomain
    }

    async fn run(&self, target: &str) -> Result<()> {
        let Some(api_key) = self.ctx.api_keys.securitytrails.clone() else {
            warn!("SecurityTrails API key missing, skipping module");
            return Ok(());
        };

        if !self.validate_target(target) {
            warn!(target, "Invalid target format");
            return Ok(());
        }

        let url = format!("https://api.securitytrails.com/v1/domain/{target}/subdomains");
        info!(target, "Searching SecurityTrails");

        let client = self.ctx.proxy.http_client(Duration::from_secs(30))?;
        self.ctx.limiter.acquire().await;

        let response = client.get(&url).header("APIKEY", api_key).send().await?;
        match response.status() {
            StatusCode::FORBIDDEN => {
                error!("SecurityTrails API key is invalid or limit reached");
                return Ok(());
            }
            status if !status.is_success() => {
                warn!(status = %status, "SecurityTrails returned non-200 status");
                return Ok(());
            }
            _ => {}
        }

        let body: SubdomainsResponse = response.json().await?;
        let subdomains: BTreeSet<String> = body
            .subdomains
            .iter()
            .map(|prefix| format!("{}.{target}", prefix.to_lowercase()))
            .collect();

        let findings: Vec<SubdomainRecord> = subdomains
            .into_iter()
            .map(|subdomain| SubdomainRecord {
                subdomain,
                source: "securitytrails".to_string(),
            })
            .collect();

        if findings.is_empty() {
            info!(target, "No records found in SecurityTrails");
        } else {
            info!(target, count = findings.len(), "Discovered subdomains via SecurityTrails");
            self.ctx
                .store_findings_default_type(target, "securitytrails", &findings)
                .await;
        }

        Ok(())
    }
}
