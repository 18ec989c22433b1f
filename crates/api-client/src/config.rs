//! Client configuration.
//!
//! The runtime [`Environment`] picks the base URL, timeout and credential mode
//! once, at client construction. [`ClientOptions`] carries the per-client
//! overrides and is validated when resolved into a [`ClientConfig`].

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};

/// Environment variable selecting the runtime environment.
pub const ENV_VAR: &str = "QIVR_ENV";

/// Environment variable carrying the production base URL.
pub const API_URL_VAR: &str = "QIVR_API_URL";

/// Base URL used in development.
pub const DEVELOPMENT_BASE_URL: &str = "http://localhost:5000/api";

/// Base URL used in production when `QIVR_API_URL` is not set.
pub const PRODUCTION_BASE_URL: &str = "https://api.qivr.com/api";

/// Error raised while building a client. Never raised per request.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Base URL did not parse or is not http(s).
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// Timeout must be greater than zero.
    #[error("Timeout must be greater than zero")]
    ZeroTimeout,

    /// Header name or value is not valid HTTP.
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    /// The HTTP transport could not be built.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Resolve from `QIVR_ENV`. Only `production` selects production.
    pub fn from_env() -> Self {
        Self::from_mode(std::env::var(ENV_VAR).ok().as_deref())
    }

    /// Resolve from a mode string.
    pub fn from_mode(mode: Option<&str>) -> Self {
        match mode {
            Some(mode) if mode.trim().eq_ignore_ascii_case("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// Settings for this environment, reading `QIVR_API_URL` in production.
    pub fn settings(&self) -> EnvironmentConfig {
        EnvironmentConfig::resolve(*self, std::env::var(API_URL_VAR).ok().as_deref())
    }
}

/// Per-environment transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Base URL requests are resolved against.
    pub base_url: String,
    /// Per-attempt transport deadline.
    pub timeout: Duration,
    /// Whether the transport keeps and sends cookies.
    pub credentialed: bool,
}

impl EnvironmentConfig {
    /// Settings for `environment`; `api_url` applies to production only.
    pub fn resolve(environment: Environment, api_url: Option<&str>) -> Self {
        match environment {
            Environment::Development => Self {
                base_url: DEVELOPMENT_BASE_URL.to_string(),
                timeout: Duration::from_secs(30),
                credentialed: false,
            },
            Environment::Production => Self {
                base_url: api_url
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .unwrap_or(PRODUCTION_BASE_URL)
                    .to_string(),
                timeout: Duration::from_secs(60),
                credentialed: true,
            },
        }
    }
}

/// Per-client overrides.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Extra default headers; a name matching a built-in default replaces it.
    pub headers: HashMap<String, String>,
    /// Replaces the environment base URL.
    pub base_url_override: Option<String>,
    /// Replaces the environment timeout.
    pub timeout_override: Option<Duration>,
}

impl ClientOptions {
    /// Add a default header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url_override = Some(url.into());
        self
    }

    /// Override the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }
}

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Environment the settings were resolved for.
    pub environment: Environment,
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Whether cookies are stored and sent.
    pub credentialed: bool,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Pool idle timeout.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// User-Agent header value.
    pub user_agent: String,
    /// Whether to trace every request and response.
    pub enable_tracing: bool,
    /// Headers sent with every request.
    pub default_headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

impl ClientConfig {
    /// Settings for `environment` with default transport tuning.
    pub fn for_environment(environment: Environment) -> Self {
        Self::from_settings(environment, environment.settings())
    }

    /// Build from already resolved environment settings.
    pub fn from_settings(environment: Environment, settings: EnvironmentConfig) -> Self {
        Self {
            environment,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout: settings.timeout,
            credentialed: settings.credentialed,
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            user_agent: crate::USER_AGENT.to_string(),
            enable_tracing: environment == Environment::Development,
            default_headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        }
    }

    /// Create a new client config builder for the environment in `QIVR_ENV`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::for_environment(Environment::from_env()),
        }
    }

    /// Apply per-client overrides and validate the result.
    pub fn apply(mut self, options: ClientOptions) -> Result<Self, ConfigError> {
        if let Some(url) = options.base_url_override {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(timeout) = options.timeout_override {
            self.timeout = timeout;
        }

        let mut names: Vec<_> = options.headers.into_iter().collect();
        names.sort();
        for (name, value) in names {
            self.set_header(name, value);
        }

        self.validate()?;
        Ok(self)
    }

    /// Insert or replace a default header (names compare case-insensitively).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .default_headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.default_headers.push((name, value)),
        }
    }

    /// Look up a default header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.default_headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Check the base URL, timeout and headers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        for (name, value) in &self.default_headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return Err(ConfigError::InvalidHeader(name.clone()));
            }
        }

        Ok(())
    }
}

/// Builder for ClientConfig.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Start from the settings of `environment`.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.config = ClientConfig::for_environment(environment);
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Enable or disable the cookie store.
    pub fn with_credentials(mut self, enabled: bool) -> Self {
        self.config.credentialed = enabled;
        self
    }

    /// Set connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set custom User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable request/response tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.config.enable_tracing = enabled;
        self
    }

    /// Add or replace a default header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.set_header(name, value);
        self
    }

    /// Build and validate the client configuration.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
