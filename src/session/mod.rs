//! Rendering sessions: the page-driving capability the resolver consumes.
//!
//! A session is opened for one proxy endpoint (or a direct connection) and
//! closed exactly once by its owner. Elements are returned as snapshots so
//! nothing borrowed from the page outlives a call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod browser;
pub mod http;
pub mod user_agent;

#[cfg(test)]
pub(crate) mod fake;

use crate::error::ResolverResult;
use crate::proxy::ProxyEndpoint;

/// Snapshot of a DOM element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageElement {
    pub text: String,
    pub attributes: HashMap<String, String>,
}

impl PageElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn href(&self) -> Option<&str> {
        self.attr("href")
    }

    /// Text with surrounding whitespace removed, `None` when blank
    pub fn trimmed_text(&self) -> Option<&str> {
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// One live page-rendering context
#[async_trait]
pub trait RenderingSession: Send {
    async fn navigate(&mut self, url: &str) -> ResolverResult<()>;

    /// URL of the current page after redirects
    async fn current_url(&mut self) -> ResolverResult<String>;

    async fn page_source(&mut self) -> ResolverResult<String>;

    async fn find_first(&mut self, selector: &str) -> ResolverResult<Option<PageElement>>;

    async fn find_all(&mut self, selector: &str) -> ResolverResult<Vec<PageElement>>;

    /// Click the first match; `false` when nothing matched
    async fn click(&mut self, selector: &str) -> ResolverResult<bool>;

    /// Replace the value of the first matching input
    async fn type_text(&mut self, selector: &str, text: &str) -> ResolverResult<()>;

    /// Submit the input at `selector` as if Enter was pressed
    async fn press_enter(&mut self, selector: &str) -> ResolverResult<()>;

    async fn close(&mut self) -> ResolverResult<()>;
}

/// Opens rendering sessions, optionally routed through a proxy
#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open(&self, endpoint: Option<&ProxyEndpoint>) -> ResolverResult<Box<dyn RenderingSession>>;
}

/// Which session provider to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Http,
    Browser,
}

/// Whether the browser window is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderingMode {
    Visible,
    Headless,
}

impl RenderingMode {
    pub fn is_headless(&self) -> bool {
        matches!(self, RenderingMode::Headless)
    }
}

/// Session provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    pub rendering_mode: RenderingMode,
    pub request_timeout_seconds: u64,
    pub user_agents: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Http,
            rendering_mode: RenderingMode::Visible,
            request_timeout_seconds: 30,
            user_agents: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Request timeout in milliseconds, saturating at `u32::MAX`
    pub fn timeout_millis(&self) -> u32 {
        u32::try_from(self.request_timeout_seconds.saturating_mul(1000)).unwrap_or(u32::MAX)
    }
}

/// Build the configured session provider
pub async fn build_provider(config: &SessionConfig) -> ResolverResult<Box<dyn SessionProvider>> {
    match config.backend {
        SessionBackend::Http => Ok(Box::new(http::HttpSessionProvider::new(config))),
        SessionBackend::Browser => {
            let provider = browser::BrowserSessionProvider::new(config).await?;
            Ok(Box::new(provider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_millis_saturates() {
        let mut config = SessionConfig::default();
        assert_eq!(config.timeout_millis(), 30_000);

        config.request_timeout_seconds = 5_000_000;
        assert_eq!(config.timeout_millis(), u32::MAX);

        config.request_timeout_seconds = u64::MAX;
        assert_eq!(config.timeout_millis(), u32::MAX);
    }

    #[test]
    fn test_trimmed_text() {
        assert_eq!(PageElement::new("  Jane Doe \n").trimmed_text(), Some("Jane Doe"));
        assert_eq!(PageElement::new(" \t ").trimmed_text(), None);
    }

    #[test]
    fn test_href_attribute() {
        let el = PageElement::new("Jane").with_attr("href", "https://www.linkedin.com/in/jane");
        assert_eq!(el.href(), Some("https://www.linkedin.com/in/jane"));
        assert_eq!(PageElement::new("x").href(), None);
    }

    #[test]
    fn test_backend_names_deserialize() {
        let config: SessionConfig = toml::from_str(
            "backend = \"browser\"\nrendering_mode = \"headless\"\nrequest_timeout_seconds = 10\nuser_agents = []\n",
        )
        .unwrap();
        assert_eq!(config.backend, SessionBackend::Browser);
        assert!(config.rendering_mode.is_headless());
    }
}
