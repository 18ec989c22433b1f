//! # qivr-api
//!
//! Resilient, authenticated API client for the Qivr platform.
//!
//! Every request is decorated with identity, tenancy and a correlation id;
//! expired sessions are refreshed and replayed once; transient failures are
//! retried with exponential backoff; every failure surfaces as one
//! [`ApiError`] carrying a user-facing message.
//!
//! ## Security
//!
//! - Tokens are redacted in Debug output
//! - Tracing never records the `Authorization` header or refresh tokens
//! - File-backed credentials are owner-readable only
//!
//! ## Crates
//!
//! - **qivr-api-client** - Request pipeline: decoration, auth recovery, retry, error mapping
//! - **qivr-api-auth** - Credential store and the storage-backed token manager
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = qivr_api::default_client()?;
//!
//!     let appointments: serde_json::Value = client.get_json("/appointments").await?;
//!     println!("{appointments}");
//!
//!     Ok(())
//! }
//! ```

// Re-export all crates for convenient access
#[cfg(feature = "auth")]
pub use qivr_api_auth as auth;
#[cfg(feature = "client")]
pub use qivr_api_client as client;

// Re-export commonly used types at the top level
#[cfg(feature = "auth")]
pub use qivr_api_auth::{FileStore, MemoryStore, StoredTokenManager};
#[cfg(feature = "client")]
pub use qivr_api_client::{ApiClient, ApiError, ClientOptions, Environment, ErrorKind, RetryConfig};

/// Failure while wiring the default client.
#[cfg(feature = "auth")]
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The credential store could not be opened.
    #[error("Credential store unavailable: {0}")]
    Store(#[from] qivr_api_auth::Error),

    /// The client configuration was rejected.
    #[error(transparent)]
    Config(#[from] qivr_api_client::ConfigError),
}

/// Build a client for the environment in `QIVR_ENV`, reading credentials
/// from `~/.qivr/credentials/` and refreshing expired sessions.
#[cfg(feature = "auth")]
pub fn default_client() -> Result<ApiClient, SetupError> {
    let tokens = StoredTokenManager::from_default_store()?.with_refresh_listener(|_| {
        tracing::info!("Stored session refreshed");
    });

    Ok(ApiClient::builder(std::sync::Arc::new(tokens)).build()?)
}
