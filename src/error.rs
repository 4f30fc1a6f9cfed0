use thiserror::Error;

/// Error types for the profile resolver
#[derive(Error, Debug)]
pub enum ResolverError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Query source errors
    #[error("Input error: {message}")]
    Input { message: String },

    #[error("Input column not found: {column}")]
    InputColumnMissing { column: String },

    // Rendering session errors
    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Navigation failed: {url} - {message}")]
    Navigation { url: String, message: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    // Proxy provider errors
    #[error("Proxy fetch failed from {provider}: {message}")]
    ProxyFetch { provider: String, message: String },

    #[error("Malformed proxy payload from {provider}: {message}")]
    ProxyPayload { provider: String, message: String },

    #[error("No proxy endpoint available from {provider}")]
    NoProxyAvailable { provider: String },

    // Challenge handling
    #[error("Challenge resolver failed: {message}")]
    ChallengeResolver { message: String },

    // Output errors
    #[error("Output write failed: {path} - {message}")]
    Output { path: String, message: String },

    // Orchestration errors
    #[error("Rotation failed: {message}")]
    Rotation { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ResolverError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an input error
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input { message: message.into() }
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session { message: message.into() }
    }

    /// Create a navigation error
    pub fn navigation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation { url: url.into(), message: message.into() }
    }

    pub fn element_not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound { selector: selector.into() }
    }

    /// Create a proxy fetch error
    pub fn proxy_fetch(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProxyFetch { provider: provider.into(), message: message.into() }
    }

    /// Create a proxy payload error
    pub fn proxy_payload(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProxyPayload { provider: provider.into(), message: message.into() }
    }

    pub fn rotation(message: impl Into<String>) -> Self {
        Self::Rotation { message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Faults a search attempt may absorb and retry; anything else ends the query
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Session { .. } | Self::Navigation { .. } | Self::ElementNotFound { .. } | Self::Http(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Input { .. } | Self::InputColumnMissing { .. } => "input",
            Self::Session { .. } | Self::Navigation { .. } | Self::ElementNotFound { .. } => "session",
            Self::ProxyFetch { .. } | Self::ProxyPayload { .. } | Self::NoProxyAvailable { .. } => "proxy",
            Self::ChallengeResolver { .. } => "challenge",
            Self::Output { .. } | Self::Csv(_) => "output",
            Self::Rotation { .. } => "rotation",
            Self::Io(_) => "system",
            Self::Http(_) => "network",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for the resolver
pub type ResolverResult<T> = std::result::Result<T, ResolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = ResolverError::config("Invalid setting");
        assert_eq!(error.category(), "configuration");
        assert!(!error.is_transient());
    }

    #[test]
    fn test_transient_errors() {
        assert!(ResolverError::session("stale element").is_transient());
        assert!(ResolverError::element_not_found("[name='q']").is_transient());
        assert!(ResolverError::navigation("https://example.com", "timeout").is_transient());

        let fetch = ResolverError::proxy_fetch("webshare", "HTTP 500");
        assert!(!fetch.is_transient());
        assert_eq!(fetch.category(), "proxy");
    }
}
