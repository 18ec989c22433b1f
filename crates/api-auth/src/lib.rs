//! # qivr-api-auth
//!
//! Credential storage for the Qivr API client.
//!
//! ## Security
//!
//! - Token values are never written to logs or Debug output
//! - File-backed credentials are created with owner-only permissions
//! - Store failures degrade to "signed out" instead of failing requests
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qivr_api_auth::{FileStore, StoredTokenManager};
//! use qivr_api_client::ApiClient;
//!
//! let tokens = StoredTokenManager::new(Arc::new(FileStore::new()?))
//!     .with_refresh_listener(|_| tracing::info!("session refreshed"));
//! let client = ApiClient::builder(Arc::new(tokens)).build()?;
//! ```

mod error;
mod store;
mod token_manager;

pub use error::{Error, ErrorKind, Result};
pub use store::{default_credentials_dir, CredentialStore, FileStore, MemoryStore};
pub use token_manager::{keys, RefreshListener, StoredTokenManager};
