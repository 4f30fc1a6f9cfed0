use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{ProxyEndpoint, ProxyProvider};
use crate::error::{ResolverError, ResolverResult};

const PROVIDER: &str = "proxyscrape";

/// Which bulk-listing rows to keep
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub required_status: Option<String>,
    pub required_protocol: Option<String>,
    pub allowed_regions: Vec<String>,
}

impl ListingFilter {
    fn accepts(&self, protocol: &str, status: &str, region: &str) -> bool {
        if let Some(required) = &self.required_status {
            if !status.eq_ignore_ascii_case(required) {
                return false;
            }
        }
        if let Some(required) = &self.required_protocol {
            if !protocol.eq_ignore_ascii_case(required) {
                return false;
            }
        }
        self.allowed_regions.is_empty()
            || self.allowed_regions.iter().any(|r| r.eq_ignore_ascii_case(region))
    }
}

/// Unauthenticated bulk listing of `[address:port, protocol, status, region]` rows
pub struct ProxyscrapeProvider {
    client: reqwest::Client,
    api_url: String,
    filter: ListingFilter,
}

impl ProxyscrapeProvider {
    pub fn new(client: reqwest::Client, api_url: &str, filter: ListingFilter) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            filter,
        }
    }
}

/// One row, `None` when malformed or filtered out
fn parse_row(row: &Value, filter: &ListingFilter) -> Option<ProxyEndpoint> {
    let fields = row.as_array()?;
    if fields.len() < 4 {
        return None;
    }

    let address_port = fields[0].as_str()?;
    let protocol = fields[1].as_str()?;
    let status = fields[2].as_str()?;
    let region = fields[3].as_str()?;

    let (address, port) = address_port.split_once(':')?;
    let port: u16 = port.trim().parse().ok()?;
    if address.trim().is_empty() {
        return None;
    }

    if !filter.accepts(protocol, status, region) {
        return None;
    }

    Some(ProxyEndpoint::new(address.trim(), port, region.to_lowercase()))
}

/// Parse a listing body, skipping rows that do not parse
pub fn parse_listing(body: &str, filter: &ListingFilter) -> ResolverResult<Vec<ProxyEndpoint>> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| ResolverError::proxy_payload(PROVIDER, e.to_string()))?;

    let rows = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ResolverError::proxy_payload(PROVIDER, "response doesn't contain a 'data' list"))?;

    let endpoints: Vec<ProxyEndpoint> = rows.iter()
        .filter_map(|row| parse_row(row, filter))
        .collect();

    debug!("Kept {} of {} listed proxies", endpoints.len(), rows.len());
    Ok(endpoints)
}

#[async_trait]
impl ProxyProvider for ProxyscrapeProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self) -> ResolverResult<Vec<ProxyEndpoint>> {
        info!("Fetching proxy list from: {}", self.api_url);

        let response = self.client
            .get(&self.api_url)
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

        parse_listing(&body, &self.filter)
    }
}
