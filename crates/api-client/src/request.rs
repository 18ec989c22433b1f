//! HTTP request building and outbound decoration.

use std::collections::HashMap;

use bytes::Bytes;
use rand::Rng;
use serde::Serialize;

use crate::error::{ApiError, Result};
use crate::token::TokenManager;

/// Tenant scope header.
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Legacy name of the tenant header, still read by older server revisions.
pub const CLINIC_HEADER: &str = "X-Clinic-Id";

/// Correlation id header.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Tenant used when no tenant can be resolved.
pub const DEFAULT_TENANT_ID: &str = "11111111-1111-1111-1111-111111111111";

const AUTHORIZATION_HEADER: &str = "Authorization";

const REQUEST_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const REQUEST_ID_SUFFIX_LEN: usize = 9;

/// Generate a correlation id: `<epoch-millis>-<9 base-36 chars>`.
pub fn generate_request_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..REQUEST_ID_SUFFIX_LEN)
        .map(|_| REQUEST_ID_ALPHABET[rng.gen_range(0..REQUEST_ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl RequestMethod {
    /// Convert to reqwest::Method.
    pub fn to_reqwest(&self) -> reqwest::Method {
        match self {
            RequestMethod::Get => reqwest::Method::GET,
            RequestMethod::Post => reqwest::Method::POST,
            RequestMethod::Patch => reqwest::Method::PATCH,
            RequestMethod::Put => reqwest::Method::PUT,
            RequestMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Request body content.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
    Bytes(Bytes),
}

/// Builder for one logical request.
///
/// The same builder is replayed on every recovery path, so it is kept
/// intact between attempts; only the bearer token may be rewritten.
#[derive(Clone)]
pub struct RequestBuilder {
    pub(crate) method: RequestMethod,
    pub(crate) url: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) query_params: Vec<(String, String)>,
    pub(crate) body: Option<RequestBody>,
    pub(crate) bearer_token: Option<String>,
    pub(crate) request_id: Option<String>,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("query_params", &self.query_params)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl RequestBuilder {
    /// Create a new request builder. `url` may be relative to the client base URL.
    pub fn new(method: RequestMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            query_params: Vec::new(),
            body: None,
            bearer_token: None,
            request_id: None,
        }
    }

    /// Add a header, replacing any header with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name.into(), value.into());
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    /// Set JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(ApiError::unexpected)?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    /// Set raw JSON body.
    pub fn json_value(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    /// Set text body.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self.set_header("Content-Type".to_string(), "text/plain".to_string());
        self
    }

    /// Set bytes body.
    pub fn bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    /// Correlation id, once the request has been decorated.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Attach identity, tenancy and correlation headers.
    ///
    /// Runs once per logical request: replays keep the same correlation id.
    /// `Authorization` comes only from the token manager; a caller-set value
    /// is dropped so the refreshed bearer is the one sent on replay.
    pub(crate) fn decorate(mut self, tokens: &dyn TokenManager) -> Self {
        self.headers
            .retain(|name, _| !name.eq_ignore_ascii_case(AUTHORIZATION_HEADER));
        self.bearer_token = tokens.access_token().filter(|token| !token.is_empty());

        let tenant_id = tokens
            .tenant_id()
            .filter(|tenant| !tenant.is_empty())
            .unwrap_or_else(|| DEFAULT_TENANT_ID.to_string());
        self.set_header(TENANT_HEADER.to_string(), tenant_id.clone());
        self.set_header(CLINIC_HEADER.to_string(), tenant_id);

        let request_id = self.request_id.take().unwrap_or_else(generate_request_id);
        self.set_header(REQUEST_ID_HEADER.to_string(), request_id.clone());
        self.request_id = Some(request_id);

        self
    }

    /// Rewrite the bearer token after a refresh.
    pub(crate) fn set_bearer(&mut self, token: impl Into<String>) {
        self.bearer_token = Some(token.into());
    }

    fn set_header(&mut self, name: String, value: String) {
        self.headers
            .retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value);
    }
}
