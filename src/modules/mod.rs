// Probe modules — the plug-in surface of the scan pipeline.
//
// Every module belongs to a category, receives the shared infrastructure
// through a ModuleContext, and writes findings through helpers that stamp
// its module path, source label, and scan id. Modules are discovered
// through a compile-time registry: the config's `modules.enabled` map is
// resolved against REGISTRY at load time, so an unknown source name fails
// at load, not mid-scan.

pub mod cloud_buckets;
pub mod github;
pub mod http_probe;
pub mod portscan;
pub mod screenshot;
pub mod shodan;
pub mod subdomain;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::{ApiKeys, ModulesConfig};
use crate::db::models::FindingKind;
use crate::db::Store;
use crate::limiter::RateLimiter;
use crate::proxy::ProxySelector;

/// Module categories. Each scan phase runs the modules of one or more
/// categories as a concurrent batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Subdomain,
    Portscan,
    Http,
    Screenshot,
    Shodan,
    Github,
    CloudBuckets,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Subdomain => "subdomain",
            Category::Portscan => "portscan",
            Category::Http => "http",
            Category::Screenshot => "screenshot",
            Category::Shodan => "shodan",
            Category::Github => "github",
            Category::CloudBuckets => "cloud_buckets",
        }
    }

    /// The finding kind a category's modules produce unless they say
    /// otherwise. Note portscan maps to `port` — the category name is never
    /// a valid kind on disk.
    pub fn default_kind(&self) -> FindingKind {
        match self {
            Category::Subdomain => FindingKind::Subdomain,
            Category::Portscan => FindingKind::Port,
            Category::Http => FindingKind::Http,
            Category::Screenshot => FindingKind::Screenshot,
            Category::Shodan => FindingKind::Enrichment,
            Category::Github => FindingKind::Github,
            Category::CloudBuckets => FindingKind::CloudBucket,
        }
    }
}

/// Shared infrastructure handed to every module instance.
#[derive(Clone)]
pub struct ModuleContext {
    pub store: Arc<Store>,
    pub scan_id: Option<String>,
    pub limiter: RateLimiter,
    pub proxy: Arc<ProxySelector>,
    pub api_keys: ApiKeys,
    category: Category,
    module_path: String,
    settings: serde_yaml::Value,
}

impl ModuleContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        category: Category,
        name: &str,
        store: Arc<Store>,
        scan_id: Option<String>,
        limiter: RateLimiter,
        proxy: Arc<ProxySelector>,
        settings: serde_yaml::Value,
        api_keys: ApiKeys,
    ) -> Self {
        Self {
            store,
            scan_id,
            limiter,
            proxy,
            api_keys,
            category,
            module_path: format!("{}/{}", category.as_str(), name),
            settings,
        }
    }

    /// `<category>/<name>`, stamped on every finding this module writes.
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// Deserialize the category's settings block into a typed struct,
    /// falling back to its defaults when the block is absent or malformed.
    pub fn parse_settings<T: DeserializeOwned + Default>(&self) -> T {
        if self.settings.is_null() {
            return T::default();
        }
        match serde_yaml::from_value(self.settings.clone()) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(module = %self.module_path, error = %e,
                      "Invalid module settings, using defaults");
                T::default()
            }
        }
    }

    /// Store findings under an explicit kind. Storage failures are logged
    /// and swallowed — a lost finding must never abort a scan.
    pub async fn store_findings<T: Serialize + ?Sized>(
        &self,
        target: &str,
        source: &str,
        kind: FindingKind,
        payload: &T,
    ) {
        if let Err(e) = self
            .store
            .store_finding(
                self.scan_id.as_deref(),
                target,
                &self.module_path,
                source,
                kind,
                payload,
            )
            .await
        {
            error!(module = %self.module_path, error = %e, "Failed to store findings");
        }
    }

    /// Store findings under the module category's default kind.
    pub async fn store_findings_default_type<T: Serialize + ?Sized>(
        &self,
        target: &str,
        source: &str,
        payload: &T,
    ) {
        self.store_findings(target, source, self.category.default_kind(), payload)
            .await;
    }
}

/// The probe module contract.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> Category;

    /// Execute the probe. Errors are caught by the engine's isolation
    /// shell and reported as a failed module, never as a failed scan.
    async fn run(&self, target: &str) -> Result<()>;

    /// Cheap syntactic check before doing any work.
    fn validate_target(&self, target: &str) -> bool {
        target.contains('.') && target.len() > 3
    }
}

/// One registry entry: where a source lives and how to build it.
pub struct ModuleSpec {
    pub category: Category,
    pub name: &'static str,
    pub build: fn(ModuleContext) -> Box<dyn Module>,
}

/// Every module this binary ships. Config `modules.enabled` names resolve
/// against this table.
pub const REGISTRY: &[ModuleSpec] = &[
    ModuleSpec {
        category: Category::Subdomain,
        name: "crtsh",
        build: |ctx| Box::new(subdomain::crtsh::Crtsh::new(ctx)),
    },
    ModuleSpec {
        category: Category::Subdomain,
        name: "alienvault",
        build: |ctx| Box::new(subdomain::alienvault::AlienVault::new(ctx)),
    },
    ModuleSpec {
        category: Category::Subdomain,
        name: "anubis",
        build: |ctx| Box::new(subdomain::anubis::Anubis::new(ctx)),
    },
    ModuleSpec {
        category: Category::Subdomain,
        name: "virustotal",
        build: |ctx| Box::new(subdomain::virustotal::VirusTotal::new(ctx)),
    },
    ModuleSpec {
        category: Category::Subdomain,
        name: "securitytrails",
        build: |ctx| Box::new(subdomain::securitytrails::SecurityTrails::new(ctx)),
    },
    ModuleSpec {
        category: Category::Portscan,
        name: "scanner",
        build: |ctx| Box::new(portscan::PortScanner::new(ctx)),
    },
    ModuleSpec {
        category: Category::Http,
        name: "detector",
        build: |ctx| Box::new(http_probe::HttpDetector::new(ctx)),
    },
    ModuleSpec {
        category: Category::Shodan,
        name: "enricher",
        build: |ctx| Box::new(shodan::ShodanEnricher::new(ctx)),
    },
    ModuleSpec {
        category: Category::Github,
        name: "dorker",
        build: |ctx| Box::new(github::GithubDorker::new(ctx)),
    },
    ModuleSpec {
        category: Category::CloudBuckets,
        name: "enumerator",
        build: |ctx| Box::new(cloud_buckets::CloudBucketEnumerator::new(ctx)),
    },
    ModuleSpec {
        category: Category::Screenshot,
        name: "capturer",
        build: |ctx| Box::new(screenshot::ScreenshotCapturer::new(ctx)),
    },
];

/// Instantiate every enabled module of the given categories.
///
/// Unknown source names log an error and are skipped; a category with
/// nothing enabled is skipped quietly. Loading is never fatal.
pub fn load_enabled_modules(
    modules_config: &ModulesConfig,
    api_keys: &ApiKeys,
    store: Arc<Store>,
    scan_id: Option<&str>,
    limiter: &RateLimiter,
    proxy: Arc<ProxySelector>,
    categories: &[Category],
) -> Vec<Box<dyn Module>> {
    let mut loaded: Vec<Box<dyn Module>> = Vec::new();

    for &category in categories {
        let Some(sources) = modules_config.enabled.get(category.as_str()) else {
            debug!(category = category.as_str(), "No sources enabled");
            continue;
        };

        for source in sources {
            match REGISTRY
                .iter()
                .find(|spec| spec.category == category && spec.name == source)
            {
                Some(spec) => {
                    let ctx = ModuleContext::new(
                        category,
                        spec.name,
                        store.clone(),
                        scan_id.map(str::to_string),
                        limiter.clone(),
                        proxy.clone(),
                        modules_config.settings_for(category.as_str()),
                        api_keys.clone(),
                    );
                    debug!(module = %ctx.module_path(), scan_id = ?scan_id, "Loaded module");
                    loaded.push((spec.build)(ctx));
                }
                None => {
                    error!(
                        category = category.as_str(),
                        source, "Unknown module source, skipping"
                    );
                }
            }
        }
    }

    loaded
}
