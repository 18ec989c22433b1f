//! # qivr-api-client
//!
//! HTTP client layer shared by every Qivr portal call.
//!
//! Every request goes through one pipeline:
//! - Bearer token, tenant headers and a correlation id attached on the way out
//! - One refresh-and-replay attempt on 401, single-flight across the client
//! - Exponential backoff retry for network failures, timeouts and 5xx except 500
//! - Failures normalized into one [`ApiError`] with a user-facing message
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  (get_json, post_json, execute)                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ApiClient                            │
//! │  - Decorates each logical request once                      │
//! │  - Auth recovery through TokenManager + Navigator           │
//! │  - Retry bookkeeping keyed by correlation id                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      reqwest::Client                        │
//! │  - Per-environment timeout, cookie store, pooling           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qivr_api_client::{ApiClient, ApiError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ApiError> {
//!     let client = ApiClient::builder(Arc::new(my_token_manager))
//!         .build()
//!         .expect("valid configuration");
//!
//!     let patients: serde_json::Value = client.get_json("/patients").await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod navigation;
mod request;
mod response;
mod retry;
mod token;

pub use client::{ApiClient, ApiClientBuilder, REFRESH_PATH};
pub use config::{
    ClientConfig, ClientConfigBuilder, ClientOptions, ConfigError, Environment,
    EnvironmentConfig, API_URL_VAR, DEVELOPMENT_BASE_URL, ENV_VAR, PRODUCTION_BASE_URL,
};
pub use error::{classify, message_for, user_message, ApiError, ErrorKind, FailedAttempt, Result};
pub use navigation::{LogNavigator, Navigator, LOGIN_PATH};
pub use request::{
    generate_request_id, RequestBody, RequestBuilder, RequestMethod, CLINIC_HEADER,
    DEFAULT_TENANT_ID, REQUEST_ID_HEADER, TENANT_HEADER,
};
pub use response::Response;
pub use retry::{default_retry_condition, RetryCondition, RetryConfig};
pub use token::{RefreshResponse, TokenManager};

/// User-Agent string for the client
pub const USER_AGENT: &str = concat!("qivr-api/", env!("CARGO_PKG_VERSION"));
