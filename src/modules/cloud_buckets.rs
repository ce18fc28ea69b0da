// Cloud bucket enumeration — derives candidate bucket names from the
// target's first label and probes the AWS/Azure/GCP storage endpoints.
// A 200 means publicly listable, a 403 means the bucket exists but is
// private; anything else is treated as absent.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::db::models::{CloudBucketRecord, FindingKind};
use crate::limiter::RateLimiter;
use crate::modules::{Category, Module, ModuleContext};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CloudBucketSettings {
    wordlist: Vec<String>,
    providers: Vec<String>,
}

impl Default for CloudBucketSettings {
    fn default() -> Self {
        Self {
            wordlist: vec![
                "{domain}".to_string(),
                "{domain}-backup".to_string(),
                "{domain}-assets".to_string(),
                "backup-{domain}".to_string(),
            ],
            providers: vec!["aws".to_string(), "azure".to_string(), "gcp".to_string()],
        }
    }
}

pub struct CloudBucketEnumerator {
    ctx: ModuleContext,
}

impl CloudBucketEnumerator {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Module for CloudBucketEnumerator {
    fn name(&self) -> &'static str {
        "enumerator"
    }

    fn category(&self) -> Category {
        Category::CloudBuckets
    }

    async fn run(&self, target: &str) -> Result<()> {
        let settings: CloudBucketSettings = self.ctx.parse_settings();
        let label = target.split('.').next().unwrap_or(target);
        let names: Vec<String> = settings
            .wordlist
            .iter()
            .map(|template| template.replace("{domain}", label))
            .collect();

        info!(
            target,
            candidates = names.len(),
            providers = settings.providers.len(),
            "Enumerating cloud buckets"
        );

        let client = self.ctx.proxy.http_client(Duration::from_secs(5))?;

        let providers = &settings.providers;
        let checks = names.iter().flat_map(|name| {
            let client = client.clone();
            let limiter = self.ctx.limiter.clone();
            providers.iter().map(move |provider| {
                check_bucket(client.clone(), limiter.clone(), name.clone(), provider.clone())
            })
        });
        let findings: Vec<CloudBucketRecord> =
            join_all(checks).await.into_iter().flatten().collect();

        if findings.is_empty() {
            info!(target, "No cloud buckets found");
        } else {
            info!(target, count = findings.len(), "Cloud buckets discovered");
            self.ctx
                .store_findings(
                    target,
                    "cloud_bucket_enumerator",
                    FindingKind::CloudBucket,
                    &findings,
                )
                .await;
        }

        Ok(())
    }
}

fn bucket_url(name: &str, provider: &str) -> Option<String> {
    match provider {
        "aws" => Some(format!("https://{name}.s3.amazonaws.com")),
        "azure" => Some(format!("https://{name}.blob.core.windows.net/")),
        "gcp" => Some(format!("https://storage.googleapis.com/{name}/")),
        _ => None,
    }
}

async fn check_bucket(
    client: Client,
    limiter: RateLimiter,
    name: String,
    provider: String,
) -> Option<CloudBucketRecord> {
    let url = bucket_url(&name, &provider)?;
    limiter.acquire().await;

    let response = client.head(&url).send().await.ok()?;
    let status = response.status().as_u16();
    debug!(url, status, "Bucket probe");
    match status {
        200 => Some("public"),
        403 => Some("private"),
        _ => None,
    }
    .map(|state| CloudBucketRecord {
        bucket: name,
        provider,
        url,
        status: state.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_wordlist_expands_the_first_label() {
        let settings = CloudBucketSettings::default();
        let names: Vec<String> = settings
            .wordlist
            .iter()
            .map(|t| t.replace("{domain}", "example"))
            .collect();
        assert!(names.contains(&"example-backup".to_string()));
        assert!(names.contains(&"backup-example".to_string()));
    }

    #[test]
    fn provider_urls() {
        assert_eq!(
            bucket_url("acme", "aws").unwrap(),
            "https://acme.s3.amazonaws.com"
        );
        assert_eq!(
            bucket_url("acme", "azure").unwrap(),
            "https://acme.blob.core.windows.net/"
        );
        assert_eq!(
            bucket_url("acme", "gcp").unwrap(),
            "https://storage.googleapis.com/acme/"
        );
        assert!(bucket_url("acme", "digitalocean").is_none());
    }
}
