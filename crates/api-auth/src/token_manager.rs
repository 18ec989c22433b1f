//! [`TokenManager`] backed by a [`CredentialStore`].
//!
//! Tokens written by older portal builds live under several keys; reads
//! probe them in a fixed order and treat empty or malformed entries as absent.

use std::sync::Arc;

use qivr_api_client::TokenManager;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::{CredentialStore, FileStore};

/// Storage keys.
pub mod keys {
    /// Current access token.
    pub const ACCESS_TOKEN: &str = "accessToken";
    /// Legacy identity token, read as an access token.
    pub const ID_TOKEN: &str = "idToken";
    /// JSON bag with `accessToken` and `refreshToken`.
    pub const AUTH_TOKENS: &str = "authTokens";
    /// Current refresh token.
    pub const REFRESH_TOKEN: &str = "refreshToken";
    /// Tenant id.
    pub const TENANT_ID: &str = "tenantId";
    /// Legacy name of the tenant id.
    pub const CLINIC_ID: &str = "clinicId";
    /// JSON profile of the signed-in user.
    pub const CURRENT_USER: &str = "currentUser";
    /// Tenant claim inside [`CURRENT_USER`].
    pub const TENANT_CLAIM: &str = "custom:tenant_id";
}

/// Callback invoked with the new access token after a refresh.
pub type RefreshListener = Box<dyn Fn(&str) + Send + Sync>;

/// Token manager reading and writing a credential store.
///
/// Refresh is only attempted when a listener is installed with
/// [`with_refresh_listener`](Self::with_refresh_listener).
pub struct StoredTokenManager {
    store: Arc<dyn CredentialStore>,
    refresh_listener: Option<RefreshListener>,
}

impl std::fmt::Debug for StoredTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokenManager")
            .field("refresh_listener", &self.refresh_listener.is_some())
            .finish_non_exhaustive()
    }
}

impl StoredTokenManager {
    /// Create a token manager over `store`.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            refresh_listener: None,
        }
    }

    /// Create a token manager over the default file store.
    pub fn from_default_store() -> Result<Self> {
        Ok(Self::new(Arc::new(FileStore::new()?)))
    }

    /// Install a refresh listener and opt into session refresh.
    pub fn with_refresh_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.refresh_listener = Some(Box::new(listener));
        self
    }

    /// The backing store.
    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|value| !value.is_empty()),
            Err(err) => {
                warn!(key, error = %err, "Credential store read failed");
                None
            }
        }
    }

    fn read_field(&self, key: &str, field: &str) -> Option<String> {
        let raw = self.read(key)?;
        let bag: Value = match serde_json::from_str(&raw) {
            Ok(bag) => bag,
            Err(_) => {
                debug!(key, "Ignoring malformed credential entry");
                return None;
            }
        };
        bag.get(field)?
            .as_str()
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(err) = self.store.set(key, value) {
            warn!(key, error = %err, "Credential store write failed");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            warn!(key, error = %err, "Credential store remove failed");
        }
    }
}

impl TokenManager for StoredTokenManager {
    fn access_token(&self) -> Option<String> {
        self.read(keys::ACCESS_TOKEN)
            .or_else(|| self.read(keys::ID_TOKEN))
            .or_else(|| self.read_field(keys::AUTH_TOKENS, "accessToken"))
    }

    fn refresh_token(&self) -> Option<String> {
        self.read(keys::REFRESH_TOKEN)
            .or_else(|| self.read_field(keys::AUTH_TOKENS, "refreshToken"))
    }

    fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
        self.write(keys::ACCESS_TOKEN, access_token);
        if let Some(refresh_token) = refresh_token {
            self.write(keys::REFRESH_TOKEN, refresh_token);
        }
    }

    fn clear_tokens(&self) {
        for key in [
            keys::ACCESS_TOKEN,
            keys::REFRESH_TOKEN,
            keys::AUTH_TOKENS,
            keys::ID_TOKEN,
        ] {
            self.remove(key);
        }
    }

    fn tenant_id(&self) -> Option<String> {
        self.read(keys::TENANT_ID)
            .or_else(|| self.read(keys::CLINIC_ID))
            .or_else(|| self.read_field(keys::CURRENT_USER, keys::TENANT_CLAIM))
    }

    fn supports_refresh(&self) -> bool {
        self.refresh_listener.is_some()
    }

    fn on_token_refresh(&self, access_token: &str) {
        if let Some(listener) = &self.refresh_listener {
            listener(access_token);
        }
    }
}
