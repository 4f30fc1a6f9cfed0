use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ProxyEndpoint, ProxyProvider};
use crate::error::{ResolverError, ResolverResult};

pub const DEFAULT_BASE_URL: &str = "https://proxy.webshare.io/api/v2";

const PROVIDER: &str = "webshare";

/// Authenticated proxy listing (address, port, username, password, region)
pub struct WebshareProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    results: Vec<ListedProxy>,
}

#[derive(Debug, Deserialize)]
struct ListedProxy {
    proxy_address: String,
    port: u16,
    username: String,
    password: String,
    #[serde(default)]
    country_code: Option<String>,
}

impl From<ListedProxy> for ProxyEndpoint {
    fn from(proxy: ListedProxy) -> Self {
        ProxyEndpoint::new(
            proxy.proxy_address,
            proxy.port,
            proxy.country_code.unwrap_or_else(|| "unknown".to_string()),
        )
        .with_credentials(proxy.username, proxy.password)
    }
}

impl WebshareProvider {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn list_url(&self) -> String {
        format!("{}/proxy/list/?mode=direct&page=1&page_size=25", self.base_url)
    }
}

/// Parse a listing body into endpoints
pub fn parse_listing(body: &str) -> ResolverResult<Vec<ProxyEndpoint>> {
    let listing: Listing = serde_json::from_str(body)
        .map_err(|e| ResolverError::proxy_payload(PROVIDER, e.to_string()))?;
    Ok(listing.results.into_iter().map(ProxyEndpoint::from).collect())
}

#[async_trait]
impl ProxyProvider for WebshareProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self) -> ResolverResult<Vec<ProxyEndpoint>> {
        let url = self.list_url();
        debug!("Fetching proxy list from {}", url);

        let response = self.client
            .get(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .send()
            .await
            .map_err(|e| ResolverError::proxy_fetch(PROVIDER, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ResolverError::proxy_fetch(PROVIDER, e.to_string()))?;

        if !status.is_success() {
            return Err(ResolverError::proxy_fetch(
                PROVIDER,
                format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            ));
        }

        parse_listing(&body)
    }
}
