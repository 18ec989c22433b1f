//! Authenticated HTTP client with session recovery and transient retry.
//!
//! Each call to [`ApiClient::execute`] is one logical request:
//!
//! 1. The request is decorated once (bearer token, tenant headers, correlation id).
//! 2. Each attempt either succeeds, which clears the retry bookkeeping for
//!    its correlation id, or fails and is classified.
//! 3. A 401 triggers auth recovery at most once per logical request:
//!    refresh the session, rewrite the bearer token, replay.
//! 4. Otherwise, a failure accepted by the retry condition is replayed after
//!    `base_delay * 2^n`, up to `max_retries` times.
//! 5. Anything else is terminal and surfaces as a single [`ApiError`].

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, ClientOptions, ConfigError, Environment};
use crate::error::{classify, ApiError, ErrorKind, FailedAttempt, Result};
use crate::navigation::{redirect_to_login, LogNavigator, Navigator};
use crate::request::{RequestBody, RequestBuilder, RequestMethod};
use crate::response::Response;
use crate::retry::{RetryConfig, RetryLedger};
use crate::token::{RefreshRequest, RefreshResponse, TokenManager};

/// Path of the session refresh endpoint, relative to the base URL.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// HTTP client that decorates, recovers and retries every request.
///
/// Clones share the transport, the retry bookkeeping and the refresh gate.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    retry: RetryConfig,
    tokens: Arc<dyn TokenManager>,
    navigator: Arc<dyn Navigator>,
    ledger: Arc<RetryLedger>,
    /// Auth recovery is single-flight: concurrent 401s queue here, and a
    /// request that finds the session already refreshed by another request
    /// replays with the current token instead of refreshing again.
    refresh_gate: Arc<Mutex<()>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("environment", &self.config.environment)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Start building a client around a token manager.
    pub fn builder(tokens: Arc<dyn TokenManager>) -> ApiClientBuilder {
        ApiClientBuilder {
            tokens,
            retry: RetryConfig::default(),
            navigator: Arc::new(LogNavigator),
            environment: None,
            config: None,
            options: ClientOptions::default(),
        }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Build the full URL for a path.
    ///
    /// If the path starts with `/`, it's appended to the base URL.
    /// Absolute http(s) URLs pass through unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}/{}", self.config.base_url, path)
        }
    }

    /// Create a GET request builder.
    pub fn get(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Get, path)
    }

    /// Create a POST request builder.
    pub fn post(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Post, path)
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Patch, path)
    }

    /// Create a PUT request builder.
    pub fn put(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Put, path)
    }

    /// Create a DELETE request builder.
    pub fn delete_request(&self, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(RequestMethod::Delete, path)
    }

    /// Execute a logical request, recovering and retrying as policy allows.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    pub async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let mut request = request.decorate(self.tokens.as_ref());
        let request_id = request.request_id().unwrap_or_default().to_string();
        // Clears bookkeeping on every exit, including a dropped future
        let _bookkeeping = LedgerEntry {
            ledger: Arc::clone(&self.ledger),
            request_id: request_id.clone(),
        };
        let mut auth_recovery_attempted = false;

        loop {
            let attempt = match self.execute_once(&request, &request_id).await {
                Ok(response) => return Ok(response),
                Err(attempt) => attempt,
            };

            let kind = classify(&attempt);

            if kind == ErrorKind::Unauthorized && !auth_recovery_attempted {
                auth_recovery_attempted = true;
                if let Some(token) = self.recover_session(request.bearer_token.as_deref()).await {
                    request.set_bearer(token);
                    continue;
                }
                return Err(ApiError::from_attempt(attempt));
            }

            if self.retry.should_retry(&attempt) {
                if let Some(retries_so_far) =
                    self.ledger.reserve(&request_id, self.retry.max_retries)
                {
                    let delay = self.retry.backoff_delay(retries_so_far);
                    warn!(
                        attempt = retries_so_far + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        kind = kind.as_str(),
                        request_id = %request_id,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            let err = ApiError::from_attempt(attempt);
            warn!(
                kind = err.kind.as_str(),
                status = ?err.status,
                request_id = %request_id,
                "Request failed"
            );
            return Err(err);
        }
    }

    /// Send a single attempt without any recovery.
    async fn execute_once(
        &self,
        request: &RequestBuilder,
        request_id: &str,
    ) -> std::result::Result<Response, FailedAttempt> {
        let url = self.url(&request.url);
        let mut req = self.http.request(request.method.to_reqwest(), &url);

        if let Some(ref token) = request.bearer_token {
            req = req.bearer_auth(token);
        }

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        // Client defaults apply unless the request set the same header
        for (name, value) in &self.config.default_headers {
            if request.header_value(name).is_none() {
                req = req.header(name.as_str(), value.as_str());
            }
        }

        if !request.query_params.is_empty() {
            req = req.query(&request.query_params);
        }

        if let Some(ref body) = request.body {
            req = match body {
                RequestBody::Json(value) => req.json(value),
                RequestBody::Text(text) => req.body(text.clone()),
                RequestBody::Bytes(bytes) => req.body(bytes.clone()),
            };
        }

        if self.config.enable_tracing {
            debug!(
                method = ?request.method,
                url = %url,
                request_id,
                headers = ?request.headers.keys().collect::<Vec<_>>(),
                authenticated = request.bearer_token.is_some(),
                "Sending request"
            );
        }

        let response = req.send().await.map_err(FailedAttempt::from_transport)?;
        let status = response.status().as_u16();

        if response.status().is_success() {
            if self.config.enable_tracing {
                debug!(
                    status,
                    request_id,
                    content_length = ?response.content_length(),
                    "Response received"
                );
            }
            return Ok(Response::new(response, request_id));
        }

        let data = response
            .bytes()
            .await
            .ok()
            .filter(|body| !body.is_empty())
            .map(|body| {
                serde_json::from_slice::<Value>(&body)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
            });

        if self.config.enable_tracing {
            info!(status, request_id, "Non-success response");
        }

        Err(FailedAttempt::with_status(status, data))
    }

    /// Try to obtain a fresh access token after a 401.
    ///
    /// Returns the token to replay with, or `None` after ending the session.
    async fn recover_session(&self, sent_token: Option<&str>) -> Option<String> {
        let _gate = self.refresh_gate.lock().await;

        if let Some(current) = self.tokens.access_token().filter(|token| !token.is_empty()) {
            if sent_token.is_some_and(|sent| sent != current) {
                info!("Session already refreshed by a concurrent request, replaying");
                return Some(current);
            }
        }

        let refresh_token = self
            .tokens
            .refresh_token()
            .filter(|token| !token.is_empty());

        match refresh_token {
            Some(refresh_token) if self.tokens.supports_refresh() => {
                match self.refresh_session(&refresh_token).await {
                    Ok(refreshed) => {
                        self.tokens.set_tokens(
                            &refreshed.access_token,
                            refreshed.refresh_token.as_deref(),
                        );
                        self.tokens.on_token_refresh(&refreshed.access_token);
                        info!("Session refreshed, replaying request");
                        Some(refreshed.access_token)
                    }
                    Err(err) => {
                        warn!(
                            kind = err.kind.as_str(),
                            status = ?err.status,
                            "Session refresh failed"
                        );
                        self.end_session();
                        None
                    }
                }
            }
            _ => {
                info!("No refresh token available, ending session");
                self.end_session();
                None
            }
        }
    }

    fn end_session(&self) {
        self.tokens.clear_tokens();
        redirect_to_login(self.navigator.as_ref());
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// Any non-2xx status or malformed body is a failure. The refresh token
    /// is not logged.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshResponse> {
        let response = self
            .http
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| ApiError::from_attempt(FailedAttempt::from_transport(e)))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(ApiError::unexpected)?;

        if !(200..300).contains(&status) {
            let data = serde_json::from_slice::<Value>(&body).ok();
            return Err(ApiError::from_attempt(FailedAttempt::with_status(status, data)));
        }

        let refreshed: RefreshResponse =
            serde_json::from_slice(&body).map_err(ApiError::unexpected)?;
        if refreshed.access_token.is_empty() {
            return Err(ApiError::new(
                ErrorKind::Unknown,
                "Refresh response did not include an access token",
            ));
        }

        Ok(refreshed)
    }

    // =========================================================================
    // Typed JSON Methods
    // =========================================================================

    /// Execute a request and deserialize the JSON response.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.execute(request).await?.json().await
    }

    /// GET a path and deserialize the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(self.get(path)).await
    }

    /// POST a JSON body and deserialize the JSON response.
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(self.post(path).json(body)?).await
    }

    /// PUT a JSON body and deserialize the JSON response.
    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(self.put(path).json(body)?).await
    }

    /// PATCH a JSON body and deserialize the JSON response.
    pub async fn patch_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(self.patch(path).json(body)?).await
    }

    /// DELETE a path, discarding the response body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute(self.delete_request(path)).await?;
        Ok(())
    }
}

/// Retry bookkeeping for one logical request, removed when dropped.
struct LedgerEntry {
    ledger: Arc<RetryLedger>,
    request_id: String,
}

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        self.ledger.clear(&self.request_id);
    }
}

/// Client factory.
pub struct ApiClientBuilder {
    tokens: Arc<dyn TokenManager>,
    retry: RetryConfig,
    navigator: Arc<dyn Navigator>,
    environment: Option<Environment>,
    config: Option<ClientConfig>,
    options: ClientOptions,
}

impl ApiClientBuilder {
    /// Set the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the navigation sink used when a session cannot be recovered.
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    /// Select the environment instead of reading `QIVR_ENV`.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Use a fully specified configuration. Options are still applied on top.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Per-client overrides.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the configuration and build the client.
    pub fn build(self) -> std::result::Result<ApiClient, ConfigError> {
        let config = self.config.unwrap_or_else(|| {
            ClientConfig::for_environment(self.environment.unwrap_or_else(Environment::from_env))
        });
        let config = config.apply(self.options)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .cookie_store(config.credentialed)
            .gzip(true)
            .deflate(true)
            .build()?;

        debug!(
            base_url = %config.base_url,
            environment = ?config.environment,
            timeout_ms = config.timeout.as_millis() as u64,
            credentialed = config.credentialed,
            "API client ready"
        );

        Ok(ApiClient {
            http,
            config: Arc::new(config),
            retry: self.retry,
            tokens: self.tokens,
            navigator: self.navigator,
            ledger: Arc::new(RetryLedger::default()),
            refresh_gate: Arc::new(Mutex::new(())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CLINIC_HEADER, DEFAULT_TENANT_ID, REQUEST_ID_HEADER, TENANT_HEADER};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct MemoryTokens {
        access: StdMutex<Option<String>>,
        refresh: StdMutex<Option<String>>,
        tenant: Option<String>,
        no_refresh_support: bool,
        cleared: AtomicU32,
        notified: StdMutex<Vec<String>>,
    }

    impl MemoryTokens {
        fn new(access: Option<&str>, refresh: Option<&str>) -> Self {
            Self {
                access: StdMutex::new(access.map(str::to_string)),
                refresh: StdMutex::new(refresh.map(str::to_string)),
                ..Default::default()
            }
        }
    }

    impl TokenManager for MemoryTokens {
        fn access_token(&self) -> Option<String> {
            self.access.lock().unwrap().clone()
        }

        fn refresh_token(&self) -> Option<String> {
            self.refresh.lock().unwrap().clone()
        }

        fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
            *self.access.lock().unwrap() = Some(access_token.to_string());
            if let Some(refresh_token) = refresh_token {
                *self.refresh.lock().unwrap() = Some(refresh_token.to_string());
            }
        }

        fn clear_tokens(&self) {
            *self.access.lock().unwrap() = None;
            *self.refresh.lock().unwrap() = None;
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }

        fn tenant_id(&self) -> Option<String> {
            self.tenant.clone()
        }

        fn supports_refresh(&self) -> bool {
            !self.no_refresh_support
        }

        fn on_token_refresh(&self, access_token: &str) {
            self.notified.lock().unwrap().push(access_token.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        path: Option<String>,
        redirects: StdMutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn current_path(&self) -> Option<String> {
            self.path.clone()
        }

        fn redirect(&self, path: &str) {
            self.redirects.lock().unwrap().push(path.to_string());
        }
    }

    fn client(
        base_url: &str,
        tokens: Arc<MemoryTokens>,
        navigator: Arc<RecordingNavigator>,
        retry: RetryConfig,
    ) -> ApiClient {
        ApiClient::builder(tokens)
            .navigator(navigator)
            .retry(retry)
            .environment(Environment::Development)
            .options(ClientOptions::default().with_base_url(base_url))
            .build()
            .unwrap()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(10))
    }

    fn unused_base_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/api")
    }

    #[test]
    fn test_url_resolution() {
        let tokens = Arc::new(MemoryTokens::default());
        let client = client(
            "http://localhost:5000/api/",
            tokens,
            Arc::new(RecordingNavigator::default()),
            RetryConfig::no_retry(),
        );

        assert_eq!(client.url("/patients"), "http://localhost:5000/api/patients");
        assert_eq!(client.url("patients"), "http://localhost:5000/api/patients");
        assert_eq!(client.url("https://cdn.qivr.com/x"), "https://cdn.qivr.com/x");
    }

    #[tokio::test]
    async fn test_decorates_outbound_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .and(header("Authorization", "Bearer access-1"))
            .and(header(TENANT_HEADER, "22222222-2222-2222-2222-222222222222"))
            .and(header(CLINIC_HEADER, "22222222-2222-2222-2222-222222222222"))
            .and(header("Content-Type", "application/json"))
            .and(header_exists(REQUEST_ID_HEADER))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"id": "p-1"}])),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens {
            tenant: Some("22222222-2222-2222-2222-222222222222".to_string()),
            ..MemoryTokens::new(Some("access-1"), None)
        });
        let client = client(
            &mock_server.uri(),
            tokens,
            Arc::new(RecordingNavigator::default()),
            RetryConfig::no_retry(),
        );

        let patients: Vec<Value> = client.get_json("/patients").await.unwrap();
        assert_eq!(patients[0]["id"], "p-1");
    }

    #[tokio::test]
    async fn test_anonymous_request_uses_default_tenant() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .and(header(TENANT_HEADER, DEFAULT_TENANT_ID))
            .and(header(CLINIC_HEADER, DEFAULT_TENANT_ID))
            .respond_with(move |request: &wiremock::Request| {
                if request.headers.contains_key("authorization") {
                    ResponseTemplate::new(400)
                } else {
                    ResponseTemplate::new(204)
                }
            })
            .mount(&mock_server)
            .await;

        let client = client(
            &mock_server.uri(),
            Arc::new(MemoryTokens::default()),
            Arc::new(RecordingNavigator::default()),
            RetryConfig::no_retry(),
        );

        let response = client.execute(client.get("/health")).await.unwrap();
        assert_eq!(response.status(), 204);
        assert!(!response.request_id().is_empty());
    }

    #[tokio::test]
    async fn test_network_error_retries_with_backoff() {
        let tokens = Arc::new(MemoryTokens::new(Some("access-1"), None));
        let client = client(
            &unused_base_url(),
            tokens,
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let started = Instant::now();
        let err = client.execute(client.get("/patients")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert_eq!(err.status, None);
        assert_eq!(err.message, crate::error::NETWORK_MESSAGE);
        // 10ms + 20ms + 40ms of backoff before the fourth attempt
        assert!(started.elapsed() >= Duration::from_millis(70));
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_retry_bound_is_respected() {
        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(move |_: &wiremock::Request| {
                call_count_clone.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(503)
            })
            .mount(&mock_server)
            .await;

        let client = client(
            &mock_server.uri(),
            Arc::new(MemoryTokens::default()),
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let err = client.execute(client.get("/patients")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.status, Some(503));
        assert_eq!(call_count.load(Ordering::SeqCst), 4);
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_retry_then_success_clears_bookkeeping() {
        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        Mock::given(method("GET"))
            .and(path("/appointments"))
            .respond_with(move |_: &wiremock::Request| {
                let count = call_count_clone.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    ResponseTemplate::new(502)
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"total": 3}))
                }
            })
            .mount(&mock_server)
            .await;

        let client = client(
            &mock_server.uri(),
            Arc::new(MemoryTokens::default()),
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let body: Value = client.get_json("/appointments").await.unwrap();
        assert_eq!(body["total"], 3);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_replays_reuse_request_id() {
        let mock_server = MockServer::start().await;
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(move |request: &wiremock::Request| {
                let id = request
                    .headers
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let mut seen = seen_clone.lock().unwrap();
                seen.push(id);
                if seen.len() < 3 {
                    ResponseTemplate::new(504)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .mount(&mock_server)
            .await;

        let client = client(
            &mock_server.uri(),
            Arc::new(MemoryTokens::default()),
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let response = client.execute(client.get("/patients")).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|id| id == response.request_id()));
    }

    #[tokio::test]
    async fn test_plain_500_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"message": "boom"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client(
            &mock_server.uri(),
            Arc::new(MemoryTokens::default()),
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let err = client.execute(client.get("/patients")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.status, Some(500));
        assert_eq!(err.data, Some(serde_json::json!({"message": "boom"})));
        assert_eq!(err.message, crate::error::SERVER_MESSAGE);
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let client = ApiClient::builder(Arc::new(MemoryTokens::default()))
            .retry(RetryConfig::no_retry())
            .environment(Environment::Development)
            .options(
                ClientOptions::default()
                    .with_base_url(mock_server.uri())
                    .with_timeout(Duration::from_millis(100)),
            )
            .build()
            .unwrap();

        let err = client.execute(client.get("/slow")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.message, crate::error::TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_validation_error_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/patients"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({"errors": {"email": ["invalid"]}})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client(
            &mock_server.uri(),
            Arc::new(MemoryTokens::default()),
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let err = client
            .post_json::<Value, _>("/patients", &serde_json::json!({"email": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert_eq!(err.message, "invalid");
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_and_replays_once() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .and(body_json(serde_json::json!({"refreshToken": "refresh-1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "new"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .and(header("Authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .and(header("Authorization", "Bearer expired"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens::new(Some("expired"), Some("refresh-1")));
        let navigator = Arc::new(RecordingNavigator::default());
        let client = client(&mock_server.uri(), tokens.clone(), navigator.clone(), fast_retry());

        let body: Value = client.get_json("/patients").await.unwrap();

        assert_eq!(body["ok"], true);
        assert_eq!(tokens.access_token().as_deref(), Some("new"));
        // No rotated refresh token in the response: the old one stays
        assert_eq!(tokens.refresh_token().as_deref(), Some("refresh-1"));
        assert_eq!(*tokens.notified.lock().unwrap(), vec!["new".to_string()]);
        assert_eq!(tokens.cleared.load(Ordering::SeqCst), 0);
        assert!(navigator.redirects.lock().unwrap().is_empty());
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_auth_recovery_is_single_shot() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "accessToken": "new",
                        "refreshToken": "refresh-2"
                    })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens::new(Some("expired"), Some("refresh-1")));
        let client = client(
            &mock_server.uri(),
            tokens.clone(),
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let err = client.execute(client.get("/patients")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.status, Some(401));
        assert_eq!(tokens.refresh_token().as_deref(), Some("refresh-2"));
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_without_refresh_token_ends_session() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens::new(Some("expired"), None));
        let navigator = Arc::new(RecordingNavigator {
            path: Some("/patients".to_string()),
            ..Default::default()
        });
        let client = client(&mock_server.uri(), tokens.clone(), navigator.clone(), fast_retry());

        let err = client.execute(client.get("/patients")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.message, crate::error::UNAUTHORIZED_MESSAGE);
        assert_eq!(tokens.cleared.load(Ordering::SeqCst), 1);
        assert!(tokens.access_token().is_none());
        assert_eq!(*navigator.redirects.lock().unwrap(), vec!["/login".to_string()]);
    }

    #[tokio::test]
    async fn test_redirect_suppressed_on_login_route() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens::default());
        let navigator = Arc::new(RecordingNavigator {
            path: Some("/login".to_string()),
            ..Default::default()
        });
        let client = client(&mock_server.uri(), tokens.clone(), navigator.clone(), fast_retry());

        let err = client
            .execute(client.post("/auth/login").json_value(serde_json::json!({"email": "a@b.c"})))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(tokens.cleared.load(Ordering::SeqCst), 1);
        assert!(navigator.redirects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_ends_session() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"message": "revoked"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens::new(Some("expired"), Some("refresh-1")));
        let navigator = Arc::new(RecordingNavigator::default());
        let client = client(&mock_server.uri(), tokens.clone(), navigator.clone(), fast_retry());

        let err = client.execute(client.get("/patients")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(tokens.cleared.load(Ordering::SeqCst), 1);
        assert!(tokens.notified.lock().unwrap().is_empty());
        assert_eq!(navigator.redirects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_refresh_response_is_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"token": "new"})),
            )
            .mount(&mock_server)
            .await;

        let client = client(
            &mock_server.uri(),
            Arc::new(MemoryTokens::default()),
            Arc::new(RecordingNavigator::default()),
            RetryConfig::no_retry(),
        );

        let err = client.refresh_session("refresh-1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn test_refresh_skipped_without_notification_support() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "new"})),
            )
            .expect(0)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens {
            no_refresh_support: true,
            ..MemoryTokens::new(Some("expired"), Some("refresh-1"))
        });
        let navigator = Arc::new(RecordingNavigator::default());
        let client = client(&mock_server.uri(), tokens.clone(), navigator.clone(), fast_retry());

        let err = client.execute(client.get("/patients")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(tokens.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(navigator.redirects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_unauthorized_share_one_refresh() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "new"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .and(header("Authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens::new(Some("expired"), Some("refresh-1")));
        let client = client(
            &mock_server.uri(),
            tokens.clone(),
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.get_json::<Value>("/patients").await })
            })
            .collect();

        for task in tasks {
            let body = task.await.unwrap().unwrap();
            assert_eq!(body["ok"], true);
        }

        assert_eq!(tokens.notified.lock().unwrap().len(), 1);
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_request_releases_bookkeeping() {
        let tokens = Arc::new(MemoryTokens::default());
        let client = client(
            &unused_base_url(),
            tokens,
            Arc::new(RecordingNavigator::default()),
            RetryConfig::default().with_base_delay(Duration::from_secs(5)),
        );

        // Cancelled while waiting out the first backoff
        let outcome = tokio::time::timeout(
            Duration::from_millis(300),
            client.execute(client.get("/patients")),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_single_authorization_header() {
        let mock_server = MockServer::start().await;
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(move |request: &wiremock::Request| {
                let values: Vec<String> = request
                    .headers
                    .get_all("authorization")
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .map(str::to_string)
                    .collect();
                seen_clone.lock().unwrap().push(values);
                ResponseTemplate::new(200)
            })
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client(
            &mock_server.uri(),
            Arc::new(MemoryTokens::new(Some("t1"), None)),
            Arc::new(RecordingNavigator::default()),
            RetryConfig::no_retry(),
        );

        client
            .execute(client.get("/patients").header("Authorization", "Bearer caller"))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![vec!["Bearer t1".to_string()]]);
    }

    #[tokio::test]
    async fn test_transient_retry_after_auth_replay() {
        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "new"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/patients"))
            .respond_with(move |_: &wiremock::Request| {
                match call_count_clone.fetch_add(1, Ordering::SeqCst) {
                    0 => ResponseTemplate::new(401),
                    1 => ResponseTemplate::new(503),
                    _ => ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({"ok": true})),
                }
            })
            .mount(&mock_server)
            .await;

        let tokens = Arc::new(MemoryTokens::new(Some("expired"), Some("refresh-1")));
        let client = client(
            &mock_server.uri(),
            tokens.clone(),
            Arc::new(RecordingNavigator::default()),
            fast_retry(),
        );

        let body: Value = client.get_json("/patients").await.unwrap();

        assert_eq!(body["ok"], true);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        assert_eq!(*tokens.notified.lock().unwrap(), vec!["new".to_string()]);
        assert_eq!(client.ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_options_override_content_type() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/notes/1"))
            .and(header("Content-Type", "application/merge-patch+json"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ApiClient::builder(Arc::new(MemoryTokens::default()))
            .retry(RetryConfig::no_retry())
            .environment(Environment::Development)
            .options(
                ClientOptions::default()
                    .with_base_url(mock_server.uri())
                    .with_header("content-type", "application/merge-patch+json"),
            )
            .build()
            .unwrap();

        let body: Option<Value> = client
            .put_json("/notes/1", &serde_json::json!({"text": "x"}))
            .await
            .unwrap();
        assert!(body.is_none());
    }

    #[test]
    fn test_builder_rejects_invalid_options() {
        let err = ApiClient::builder(Arc::new(MemoryTokens::default()))
            .environment(Environment::Development)
            .options(ClientOptions::default().with_base_url("localhost"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));
    }
}
