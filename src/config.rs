// Configuration — YAML document loaded at scan start.
//
// A missing or unreadable config file is not an error: the scan runs with
// defaults and a warning, matching the "empty config" behavior the rest of
// the pipeline expects. API keys absent from the YAML fall back to
// environment variables (the .env file is loaded by the CLI via dotenvy).

use std::collections::BTreeMap;
use std::env;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.yaml";

/// Top-level configuration. Every key is optional in the YAML; unset keys
/// take the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database: String,
    /// Global outbound request rate shared by all modules (req/s).
    /// Zero or negative disables rate limiting.
    pub rate_limit: f64,
    pub proxy: ProxyConfig,
    pub logging: LoggingConfig,
    pub modules: ModulesConfig,
    pub api_keys: ApiKeys,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "recon.db".to_string(),
            rate_limit: 10.0,
            proxy: ProxyConfig::default(),
            logging: LoggingConfig::default(),
            modules: ModulesConfig::default(),
            api_keys: ApiKeys::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
    pub use_tor: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Optional plain-text log file, written in addition to stderr.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// The `modules:` section. `enabled` maps a category to the source names to
/// run; everything else under `modules:` is a category-specific settings
/// block handed verbatim to the modules of that category.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    pub enabled: BTreeMap<String, Vec<String>>,
    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
}

impl ModulesConfig {
    /// The settings block for one category (`Null` when the config has none).
    pub fn settings_for(&self, category: &str) -> serde_yaml::Value {
        self.settings
            .get(category)
            .cloned()
            .unwrap_or(serde_yaml::Value::Null)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub shodan: Option<String>,
    pub virustotal: Option<String>,
    pub securitytrails: Option<String>,
    pub github: Option<String>,
}

impl ApiKeys {
    /// Fill keys absent from the YAML from the environment.
    fn fill_from_env(&mut self) {
        fill(&mut self.shodan, "SHODAN_API_KEY");
        fill(&mut self.virustotal, "VIRUSTOTAL_API_KEY");
        fill(&mut self.securitytrails, "SECURITYTRAILS_API_KEY");
        fill(&mut self.github, "GITHUB_TOKEN");

        fn fill(slot: &mut Option<String>, var: &str) {
            if slot.is_none() {
                if let Ok(v) = env::var(var) {
                    if !v.is_empty() {
                        *slot = Some(v);
                    }
                }
            }
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Missing file or parse failure degrades to defaults with a warning —
    /// a scan must be able to run with no config on disk at all.
    pub fn load(path: &str) -> Self {
        let mut config = if Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(text) => match serde_yaml::from_str::<Config>(&text) {
                    Ok(config) => config,
                    Err(e) => {
                        error!(path, error = %e, "Failed to parse config, using defaults");
                        Config::default()
                    }
                },
                Err(e) => {
                    error!(path, error = %e, "Failed to read config, using defaults");
                    Config::default()
                }
            }
        } else {
            warn!(path, "Config file not found, using defaults");
            Config::default()
        };

        config.api_keys.fill_from_env();
        config
    }
}

/// Set up structured logging from the `logging:` section.
///
/// Safe to call more than once in the same process — only the first call
/// installs the subscriber (relevant when the engine is driven repeatedly
/// from one runtime, e.g. in tests or under the scan manager).
pub fn init_logging(settings: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dragnet={}", settings.level)));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);

    let file = settings
        .file
        .as_deref()
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());

    let result = match file {
        // Degrade to stderr-only when the file can't be opened (e.g. locked).
        Some(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false),
            )
            .try_init(),
        None => registry.try_init(),
    };
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load("does/not/exist.yaml");
        assert_eq!(config.database, "recon.db");
        assert!((config.rate_limit - 10.0).abs() < f64::EPSILON);
        assert!(config.modules.enabled.is_empty());
    }

    #[test]
    fn parses_recognized_keys() {
        let yaml = r#"
database: /tmp/dragnet-test.db
rate_limit: 2.5
proxy:
  use_tor: true
logging:
  level: debug
modules:
  enabled:
    subdomain: [crtsh, alienvault]
  portscan:
    concurrency: 50
api_keys:
  shodan: abc123
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database, "/tmp/dragnet-test.db");
        assert!((config.rate_limit - 2.5).abs() < f64::EPSILON);
        assert!(config.proxy.use_tor);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.modules.enabled.get("subdomain").unwrap(),
            &vec!["crtsh".to_string(), "alienvault".to_string()]
        );
        assert_eq!(config.api_keys.shodan.as_deref(), Some("abc123"));

        let portscan = config.modules.settings_for("portscan");
        assert_eq!(portscan.get("concurrency").and_then(|v| v.as_u64()), Some(50));
    }

    #[test]
    fn settings_for_unknown_category_is_null() {
        let modules = ModulesConfig::default();
        assert!(modules.settings_for("screenshot").is_null());
    }
}
