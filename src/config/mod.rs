use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::extract::{SelectorChains, DEFAULT_ACCESS_WALL_MARKER};
use crate::input::{InputConfig, InputKind};
use crate::logging::LoggingConfig;
use crate::output::OutputConfig;
use crate::pacing::PacingConfig;
use crate::proxy::{ProxyConfig, ProxyProviderKind};
use crate::search::{SearchConfig, TargetMatcher};
use crate::session::{RenderingMode, SessionConfig};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub search: SearchConfig,
    pub proxy: ProxyConfig,
    pub resolver: ResolverConfig,
    pub pacing: PacingConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub access_wall_threshold: u32,
    pub access_wall_marker: String,
    pub selectors: SelectorChains,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            access_wall_threshold: 5,
            access_wall_marker: DEFAULT_ACCESS_WALL_MARKER.to_string(),
            selectors: SelectorChains::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, else the platform config file, else defaults
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path).await;
        }

        let config_path = get_config_path();
        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Cannot read configuration {}: {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid configuration {}: {}", path.display(), e))?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save configuration to `path`, or the platform config file
    pub async fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_path, content).await?;

        info!("Configuration saved to: {}", config_path.display());
        Ok(config_path)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.resolver.access_wall_threshold == 0 {
            return Err(anyhow::anyhow!("resolver.access_wall_threshold must be > 0"));
        }

        if self.search.max_attempts == 0 {
            return Err(anyhow::anyhow!("search.max_attempts must be > 0"));
        }

        TargetMatcher::new(&self.search.target_link_pattern)?;

        if self.input.column.trim().is_empty() {
            return Err(anyhow::anyhow!("input.column must not be empty"));
        }

        match self.input.kind {
            InputKind::File if self.input.path.is_none() => {
                return Err(anyhow::anyhow!("input.path is required for file input"));
            }
            InputKind::Spreadsheet if self.input.url.as_deref().map_or(true, |u| u.trim().is_empty()) => {
                return Err(anyhow::anyhow!("input.url is required for spreadsheet input"));
            }
            _ => {}
        }

        for (name, bounds) in self.pacing.all() {
            if !bounds.is_valid() {
                return Err(anyhow::anyhow!(
                    "pacing.{} has min_ms {} above max_ms {}",
                    name, bounds.min_ms, bounds.max_ms
                ));
            }
        }

        match self.proxy.provider {
            ProxyProviderKind::Webshare
                if self.proxy.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) =>
            {
                return Err(anyhow::anyhow!("proxy.api_key (or PROXY_API_KEY) is required for webshare"));
            }
            ProxyProviderKind::Proxyscrape if self.proxy.proxyscrape_url.trim().is_empty() => {
                return Err(anyhow::anyhow!("proxy.proxyscrape_url is required for proxyscrape"));
            }
            _ => {}
        }

        if self.session.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("session.request_timeout_seconds must be > 0"));
        }

        info!("Configuration validation passed");
        Ok(())
    }
}

/// Get the configuration file path
pub fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "profile-resolver", "profile-resolver")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply environment variable overrides to configuration
    pub fn apply(config: &mut AppConfig) {
        Self::apply_from(config, |key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup`
    pub fn apply_from<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Input overrides
        if let Some(path) = lookup("PRS_INPUT_PATH") {
            config.input.kind = InputKind::File;
            config.input.path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("PRS_INPUT_URL") {
            config.input.kind = InputKind::Spreadsheet;
            config.input.url = Some(url);
        }

        // Search overrides
        if let Some(engine) = lookup("PRS_SEARCH_ENGINE") {
            if let Ok(engine) = engine.parse() {
                config.search.engine = engine;
            }
        }

        // Proxy overrides
        if let Some(provider) = lookup("PRS_PROXY_PROVIDER") {
            if let Ok(provider) = provider.parse() {
                config.proxy.provider = provider;
            }
        }

        if let Some(api_key) = lookup("PROXY_API_KEY") {
            config.proxy.api_key = Some(api_key);
        }

        // Resolver overrides
        if let Some(threshold) = lookup("PRS_ACCESS_WALL_THRESHOLD") {
            if let Ok(threshold) = threshold.parse::<u32>() {
                config.resolver.access_wall_threshold = threshold;
            }
        }

        // Session overrides
        if let Some(headless) = lookup("PRS_HEADLESS") {
            config.session.rendering_mode = if headless.to_lowercase() == "true" {
                RenderingMode::Headless
            } else {
                RenderingMode::Visible
            };
        }

        // Output overrides
        if let Some(path) = lookup("PRS_OUTPUT_PATH") {
            config.output.path = PathBuf::from(path);
        }

        // Logging overrides
        if let Some(log_level) = lookup("PRS_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        info!("Applied environment variable overrides");
    }
}
