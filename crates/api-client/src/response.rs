//! Successful HTTP responses.

use serde::de::DeserializeOwned;

use crate::error::{ApiError, Result};

/// Wrapper around a 2xx response.
#[derive(Debug)]
pub struct Response {
    inner: reqwest::Response,
    request_id: String,
}

impl Response {
    pub(crate) fn new(inner: reqwest::Response, request_id: impl Into<String>) -> Self {
        Self {
            inner,
            request_id: request_id.into(),
        }
    }

    /// Get the HTTP status code.
    pub fn status(&self) -> u16 {
        self.inner.status().as_u16()
    }

    /// Returns true if the response status is successful (2xx).
    pub fn is_success(&self) -> bool {
        self.inner.status().is_success()
    }

    /// Correlation id the request was sent with.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name)?.to_str().ok()
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the response body as text.
    pub async fn text(self) -> Result<String> {
        self.inner.text().await.map_err(ApiError::unexpected)
    }

    /// Get the response body as bytes.
    pub async fn bytes(self) -> Result<bytes::Bytes> {
        self.inner.bytes().await.map_err(ApiError::unexpected)
    }

    /// Deserialize the response body as JSON. An empty body reads as `null`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let body = self.bytes().await?;
        decode_json(&body)
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(ApiError::unexpected)
}
