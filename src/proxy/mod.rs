//! Egress proxy endpoints and the pool they are drawn from.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub mod proxyscrape;
pub mod webshare;

use crate::error::{ResolverError, ResolverResult};

/// One network egress endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub region: String,
}

impl ProxyEndpoint {
    pub fn new(address: impl Into<String>, port: u16, region: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            username: None,
            password: None,
            region: region.into(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// `host:port` without credentials
    pub fn server(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Proxy URL with percent-encoded credentials when present
    pub fn proxy_url(&self) -> ResolverResult<url::Url> {
        let mut proxy_url = url::Url::parse(&format!("http://{}", self.server()))
            .map_err(|e| ResolverError::config(format!("invalid proxy endpoint {}: {}", self.server(), e)))?;

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            proxy_url
                .set_username(username)
                .and_then(|_| proxy_url.set_password(Some(password)))
                .map_err(|_| ResolverError::config(format!("cannot attach credentials to {}", self.server())))?;
        }

        Ok(proxy_url)
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.server(), self.region)
    }
}

/// External API that lists proxy endpoints
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> ResolverResult<Vec<ProxyEndpoint>>;
}

/// Current endpoint set plus the provider that refills it
pub struct ProxyPool {
    provider: Box<dyn ProxyProvider>,
    endpoints: Vec<ProxyEndpoint>,
}

impl ProxyPool {
    pub fn new(provider: Box<dyn ProxyProvider>) -> Self {
        Self {
            provider,
            endpoints: Vec::new(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.endpoints
    }

    /// Replace the endpoint set with a fresh listing
    pub async fn fetch(&mut self) -> ResolverResult<usize> {
        let endpoints = self.provider.fetch().await?;
        if endpoints.is_empty() {
            return Err(ResolverError::NoProxyAvailable {
                provider: self.provider.name().to_string(),
            });
        }

        info!("Fetched {} proxies from {}", endpoints.len(), self.provider.name());
        self.endpoints = endpoints;
        Ok(self.endpoints.len())
    }

    /// Uniform random pick, fetching first when the set is empty
    pub async fn select_endpoint(&mut self) -> ResolverResult<ProxyEndpoint> {
        if self.endpoints.is_empty() {
            self.fetch().await?;
        }

        let endpoint = self.endpoints
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| ResolverError::NoProxyAvailable {
                provider: self.provider.name().to_string(),
            })?;

        debug!("Selected proxy {}", endpoint);
        Ok(endpoint)
    }

    /// Same as `select_endpoint`; earlier picks may come back
    pub async fn rotate(&mut self) -> ResolverResult<ProxyEndpoint> {
        self.select_endpoint().await
    }
}

/// Which proxy listing to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProviderKind {
    None,
    Webshare,
    Proxyscrape,
}

impl std::str::FromStr for ProxyProviderKind {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ProxyProviderKind::None),
            "webshare" => Ok(ProxyProviderKind::Webshare),
            "proxyscrape" => Ok(ProxyProviderKind::Proxyscrape),
            other => Err(ResolverError::config(format!("unknown proxy provider '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub provider: ProxyProviderKind,
    pub api_key: Option<String>,
    pub webshare_base_url: String,
    pub proxyscrape_url: String,
    pub required_status: String,
    pub required_protocol: String,
    pub allowed_regions: Vec<String>,
    pub request_timeout_seconds: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            provider: ProxyProviderKind::None,
            api_key: None,
            webshare_base_url: webshare::DEFAULT_BASE_URL.to_string(),
            proxyscrape_url: String::new(),
            required_status: "Online".to_string(),
            required_protocol: "HTTP".to_string(),
            allowed_regions: Vec::new(),
            request_timeout_seconds: 30,
        }
    }
}

fn api_client(config: &ProxyConfig) -> ResolverResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_seconds))
        .build()?)
}

/// Build the configured pool; `None` means direct connections
pub fn build_pool(config: &ProxyConfig) -> ResolverResult<Option<ProxyPool>> {
    let provider: Box<dyn ProxyProvider> = match config.provider {
        ProxyProviderKind::None => return Ok(None),
        ProxyProviderKind::Webshare => {
            let api_key = config.api_key.clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ResolverError::config("webshare provider requires an API key"))?;
            Box::new(webshare::WebshareProvider::new(
                api_client(config)?,
                &config.webshare_base_url,
                api_key,
            ))
        }
        ProxyProviderKind::Proxyscrape => {
            let filter = proxyscrape::ListingFilter {
                required_status: Some(config.required_status.clone()).filter(|s| !s.is_empty()),
                required_protocol: Some(config.required_protocol.clone()).filter(|s| !s.is_empty()),
                allowed_regions: config.allowed_regions.clone(),
            };
            Box::new(proxyscrape::ProxyscrapeProvider::new(
                api_client(config)?,
                &config.proxyscrape_url,
                filter,
            ))
        }
    };

    Ok(Some(ProxyPool::new(provider)))
}


#[cfg(test)]
mod tests {
    use super::testing::StaticProvider;
    use super::*;
    use std::sync::atomic::Ordering;

    fn endpoints() -> Vec<ProxyEndpoint> {
        vec![
            ProxyEndpoint::new("10.0.0.1", 8080, "us"),
            ProxyEndpoint::new("10.0.0.2", 8080, "de"),
        ]
    }

    #[tokio::test]
    async fn test_select_fetches_when_empty() {
        let provider = StaticProvider::with(endpoints());
        let fetches = provider.fetches.clone();
        let mut pool = ProxyPool::new(Box::new(provider));

        let endpoint = pool.select_endpoint().await.unwrap();
        assert!(endpoints().contains(&endpoint));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Set is populated now, no refetch
        pool.rotate().await.unwrap();
        pool.rotate().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rotation_may_repeat_single_endpoint() {
        let only = ProxyEndpoint::new("10.0.0.9", 3128, "fr");
        let mut pool = ProxyPool::new(Box::new(StaticProvider::with(vec![only.clone()])));
        assert_eq!(pool.select_endpoint().await.unwrap(), only);
        assert_eq!(pool.rotate().await.unwrap(), only);
    }

    #[tokio::test]
    async fn test_empty_listing_is_an_error() {
        let mut pool = ProxyPool::new(Box::new(StaticProvider::with(Vec::new())));
        let err = pool.select_endpoint().await.unwrap_err();
        assert!(matches!(err, ResolverError::NoProxyAvailable { .. }));
        assert_eq!(err.category(), "proxy");
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let mut pool = ProxyPool::new(Box::new(StaticProvider::failing()));
        let err = pool.fetch().await.unwrap_err();
        assert!(matches!(err, ResolverError::ProxyFetch { .. }));
    }

    #[test]
    fn test_proxy_url_encodes_credentials() {
        let endpoint = ProxyEndpoint::new("198.51.100.7", 6540, "us").with_credentials("user", "p@ss:word");
        let proxy_url = endpoint.proxy_url().unwrap();
        assert_eq!(proxy_url.host_str(), Some("198.51.100.7"));
        assert_eq!(proxy_url.port(), Some(6540));
        assert_eq!(proxy_url.username(), "user");
        assert_eq!(proxy_url.password(), Some("p%40ss%3Aword"));
        assert!(endpoint.has_credentials());
    }

    #[test]
    fn test_display_hides_credentials() {
        let endpoint = ProxyEndpoint::new("198.51.100.7", 6540, "us").with_credentials("user", "secret");
        let shown = endpoint.to_string();
        assert_eq!(shown, "198.51.100.7:6540 (us)");
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_build_pool_requires_api_key() {
        let config = ProxyConfig {
            provider: ProxyProviderKind::Webshare,
            ..ProxyConfig::default()
        };
        assert!(build_pool(&config).is_err());

        let none = ProxyConfig::default();
        assert!(build_pool(&none).unwrap().is_none());
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("WebShare".parse::<ProxyProviderKind>().unwrap(), ProxyProviderKind::Webshare);
        assert!("tor".parse::<ProxyProviderKind>().is_err());
    }
}
