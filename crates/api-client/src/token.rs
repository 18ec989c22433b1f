//! Credential capability consumed by the client.
//!
//! The client never assumes a storage mechanism; it only calls
//! [`TokenManager`]. `qivr-api-auth` provides a storage-backed implementation.

use serde::{Deserialize, Serialize};

/// Pluggable access to access/refresh tokens and tenant scope.
///
/// Methods are infallible at this boundary: an implementation that cannot
/// read its backing store reports the token as absent.
pub trait TokenManager: Send + Sync {
    /// Current access token.
    fn access_token(&self) -> Option<String>;

    /// Current refresh token.
    fn refresh_token(&self) -> Option<String>;

    /// Persist a new token pair. A `None` refresh token leaves the stored one untouched.
    fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>);

    /// Forget every stored token.
    fn clear_tokens(&self);

    /// Tenant the user is scoped to, if known.
    fn tenant_id(&self) -> Option<String> {
        None
    }

    /// Whether this manager wants refresh notifications. When false the
    /// client never calls the refresh endpoint and treats a 401 as final.
    fn supports_refresh(&self) -> bool {
        true
    }

    /// Called after a refreshed access token has been persisted.
    fn on_token_refresh(&self, _access_token: &str) {}
}

/// Body sent to `POST {base}/auth/refresh`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Body returned by the refresh endpoint.
///
/// Tokens are redacted in Debug output.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// New access token.
    pub access_token: String,
    /// Rotated refresh token, if the server issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for RefreshResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshResponse")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}
