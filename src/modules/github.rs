// GitHub dorking — runs templated code-search queries against the target
// domain to surface leaked configuration, keys, and references. A token
// raises the search rate limit but is optional.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::db::models::{FindingKind, GithubRecord};
use crate::modules::{Category, Module, ModuleContext};

/// Keep at most this many hits per dork to limit noise.
const RESULTS_PER_DORK: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GithubSettings {
    dorks: Vec<String>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            dorks: vec![
                "\"{domain}\"".to_string(),
                "\"{domain}\" api_key".to_string(),
                "\"{domain}\" secret".to_string(),
            ],
        }
    }
}

pub struct GithubDorker {
    ctx: ModuleContext,
}

impl GithubDorker {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct CodeSearchResponse {
    #[serde(default)]
    items: Vec<CodeSearchItem>,
}

#[derive(Debug, Deserialize)]
struct CodeSearchItem {
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    path: String,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct Repository {
    #[serde(default)]
    full_name: String,
}

#[async_trait]
impl Module for GithubDorker {
    fn name(&self) -> &'static str {
        "dorker"
    }

    fn category(&self) -> Category {
        Category::Github
    }

    async fn run(&self, target: &str) -> Result<()> {
        let settings: GithubSettings = self.ctx.parse_settings();
        let token = self.ctx.api_keys.github.clone();

        let mut builder = self
            .ctx
            .proxy
            .client_builder()
            .user_agent("dragnet-recon")
            .timeout(Duration::from_secs(30));
        if let Some(url) = self.ctx.proxy.request_proxy_url() {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        let client = builder.build()?;

        let mut findings = Vec::new();
        info!(target, "Initiating GitHub dork search");

        for template in &settings.dorks {
            let query = template.replace("{domain}", target);
            info!(query, "Executing dork");
            self.ctx.limiter.acquire().await;

            let mut request = client
                .get("https://api.github.com/search/code")
                .query(&[("q", query.as_str()), ("per_page", "10")])
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    error!(query, error = %e, "Dork request failed");
                    continue;
                }
            };

            match response.status() {
                StatusCode::FORBIDDEN => {
                    warn!("GitHub rate limit hit or search forbidden for this account");
                    break;
                }
                status if !status.is_success() => {
                    error!(query, status = %status, "GitHub API error");
                    continue;
                }
                _ => {}
            }

            let body: CodeSearchResponse = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    error!(query, error = %e, "Invalid GitHub search response");
                    continue;
                }
            };

            let count = body.items.len().min(RESULTS_PER_DORK);
            for item in body.items.into_iter().take(RESULTS_PER_DORK) {
                findings.push(GithubRecord {
                    query: query.clone(),
                    url: item.html_url,
                    repository: item.repository.full_name,
                    path: item.path,
                });
            }
            debug!(query, count, "Dork results collected");
        }

        if findings.is_empty() {
            info!(target, "No GitHub exposure discovered");
        } else {
            info!(target, count = findings.len(), "Stored dork results");
            self.ctx
                .store_findings(target, "github_dorker", FindingKind::Github, &findings)
                .await;
        }

        Ok(())
    }
}
