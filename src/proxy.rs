// Proxy selector — uniform outbound routing for all modules.
//
// Three optional inputs: an HTTP proxy URL, an HTTPS proxy URL, and a Tor
// flag that selects the local SOCKS5 endpoint. Precedence Tor > HTTPS >
// HTTP; nothing configured means direct routing.
//
// SOCKS routing lives in the client builder (reqwest's socks feature);
// plain HTTP(S) proxies are exposed as a per-request URL instead. A module
// that composes both through `http_client` can never double-proxy.

use reqwest::{Client, ClientBuilder, Proxy};
use std::time::Duration;
use tracing::{info, warn};

const TOR_SOCKS_URL: &str = "socks5://127.0.0.1:9050";

#[derive(Debug, Default)]
pub struct ProxySelector {
    selected: Option<String>,
}

impl ProxySelector {
    pub fn new(config: &crate::config::ProxyConfig) -> Self {
        let selected = if config.use_tor {
            Some(TOR_SOCKS_URL.to_string())
        } else {
            config.https.clone().or_else(|| config.http.clone())
        };
        if let Some(url) = &selected {
            info!(proxy = %url, "Outbound traffic routed through proxy");
        }
        Self { selected }
    }

    fn is_socks(&self) -> bool {
        self.selected
            .as_deref()
            .is_some_and(|url| url.starts_with("socks"))
    }

    /// Transport factory: a client builder with the SOCKS proxy installed
    /// when one is selected, a default TCP builder otherwise.
    pub fn client_builder(&self) -> ClientBuilder {
        let builder = Client::builder();
        if self.is_socks() {
            let url = self.selected.as_deref().unwrap_or_default();
            match Proxy::all(url) {
                Ok(proxy) => return builder.proxy(proxy),
                Err(e) => warn!(proxy = url, error = %e, "Invalid SOCKS proxy, going direct"),
            }
        }
        builder
    }

    /// The per-request proxy URL for non-SOCKS proxies; `None` for SOCKS
    /// (already handled by the factory) or when nothing is configured.
    pub fn request_proxy_url(&self) -> Option<&str> {
        match &self.selected {
            Some(url) if !url.starts_with("socks") => Some(url),
            _ => None,
        }
    }

    /// Build a ready HTTP client with the selected route applied exactly
    /// once and the given total timeout.
    pub fn http_client(&self, timeout: Duration) -> reqwest::Result<Client> {
        let mut builder = self.client_builder().timeout(timeout);
        if let Some(url) = self.request_proxy_url() {
            builder = builder.proxy(Proxy::all(url)?);
        }
        builder.build()
    }
}
