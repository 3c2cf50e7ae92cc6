//! HTTP client for the directory service.
//!
//! This module provides [`DirectoryClient`], the entry point every resource
//! operation goes through. The client owns the credential lifecycle, URL
//! construction, retries with backoff, the one-shot refresh on 401 and
//! cooperative cancellation.
//!
//! # Examples
//!
//! ## From the environment
//! ```rust,no_run
//! use entra_admin_core::client::DirectoryClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Reads TENANT_ID, CLIENT_ID, CLIENT_SECRET and the optional overrides.
//! let client = DirectoryClient::from_env()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Explicit credentials
//! ```rust,no_run
//! use entra_admin_core::auth::ServiceCredential;
//! use entra_admin_core::client::{DirectoryClient, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DirectoryClient::builder()
//!     .credential(ServiceCredential::new("tenant-id", "client-id", "client-secret")?)
//!     .accepted_domains(["contoso.com"])
//!     .retry_policy(RetryPolicy::default())
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client as HttpClient, Method};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{CredentialManager, ServiceCredential, DEFAULT_AUTHORITY_HOST, DEFAULT_SCOPE};
use crate::config::{self, DirectoryConfig};
use crate::error::{map_error_response, DirectoryError, DirectoryResult};
use crate::validation::Validator;

/// Default directory API endpoint.
pub const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0/";

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read/response timeout (60 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Header asking the service for eventually consistent reads.
///
/// Required by `$search` and `$count` queries.
pub const CONSISTENCY_LEVEL_HEADER: &str = "ConsistencyLevel";

/// Determines if an HTTP status code represents a transient error.
///
/// - 429 Too Many Requests
/// - 503 Service Unavailable
/// - 504 Gateway Timeout
#[inline]
pub fn is_retriable_status(status: u16) -> bool {
    matches!(status, 429 | 503 | 504)
}

/// Configuration for automatic retry behavior on transient errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial request).
    pub max_retries: u32,
    /// Initial backoff duration before the first retry.
    /// Subsequent retries use exponential backoff (2^attempt * initial_backoff).
    pub initial_backoff: Duration,
    /// Upper bound for a computed backoff, before jitter.
    pub max_backoff: Duration,
    /// Upper bound for a delay requested through `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_retry_after: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt + 1`, with ±25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.max_backoff);
        let jitter = 0.75 + fastrand::f64() * 0.5; // 0.75 to 1.25
        base.mul_f64(jitter)
    }

    /// Delay before the next attempt, preferring a provider hint on throttling.
    fn delay_for(&self, status: u16, retry_after: Option<Duration>, attempt: u32) -> Duration {
        match (status, retry_after) {
            (429 | 503, Some(hint)) => hint.min(self.max_retry_after),
            _ => self.backoff(attempt),
        }
    }
}

/// Whether repeating a request is safe after an ambiguous failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Idempotency {
    /// Reads, updates, deletes and reference changes.
    #[default]
    Idempotent,
    /// Creates. Only retried when the service provably did not apply them.
    NonIdempotent,
}

/// A single request to the directory service.
#[derive(Debug, Clone)]
pub struct GraphRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    eventual_consistency: bool,
    idempotency: Idempotency,
}

impl GraphRequest {
    /// A request for `path`, relative to the endpoint or an absolute continuation link.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            eventual_consistency: false,
            idempotency: Idempotency::Idempotent,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A POST. Treated as non-idempotent unless overridden.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path)
            .body(body)
            .idempotency(Idempotency::NonIdempotent)
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PATCH, path).body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set the JSON body.
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Send `ConsistencyLevel: eventual`.
    pub fn eventual_consistency(mut self, enabled: bool) -> Self {
        self.eventual_consistency = enabled;
        self
    }

    /// Override the idempotency classification.
    pub fn idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path or continuation link.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Percent-encode a value for use as a single URL path segment.
///
/// Needed for principal names, which may contain `#` for guest accounts.
pub fn escape_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// The client for the directory service.
///
/// Cheaply cloneable and shareable across tasks; clones share one credential
/// manager and therefore one cached token.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    pub(crate) http: HttpClient,
    pub(crate) endpoint: Url,
    pub(crate) credentials: Arc<CredentialManager>,
    pub(crate) validator: Arc<Validator>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) cancellation: Option<CancellationToken>,
}

/// Builder for constructing a [`DirectoryClient`].
///
/// Use [`DirectoryClient::builder()`] to create a new builder. Explicit
/// setters take precedence over a supplied [`DirectoryConfig`], which takes
/// precedence over the environment.
#[derive(Debug, Default)]
pub struct DirectoryClientBuilder {
    config: Option<DirectoryConfig>,
    credential: Option<ServiceCredential>,
    endpoint: Option<String>,
    authority_host: Option<String>,
    scope: Option<String>,
    accepted_domains: Option<Vec<String>>,
    http_client: Option<HttpClient>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    refresh_margin: Option<Duration>,
}

impl DirectoryClient {
    /// Create a new builder for configuring a `DirectoryClient`.
    pub fn builder() -> DirectoryClientBuilder {
        DirectoryClientBuilder::default()
    }

    /// Build a client entirely from the environment.
    pub fn from_env() -> DirectoryResult<Self> {
        Self::builder().config(DirectoryConfig::from_env()?).build()
    }

    /// Get the base endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Get the retry policy configuration.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// The credential manager shared by all clones of this client.
    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// The payload validator configured for this tenant.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// A clone of this client whose calls abort once `token` is cancelled.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..self.clone()
        }
    }

    /// The cancellation token, if one is attached.
    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Whether the attached cancellation token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Build a full URL for an API path.
    ///
    /// Relative paths are joined to the endpoint. Absolute URLs (continuation
    /// links) are accepted only when they share the endpoint's origin, so the
    /// bearer token is never sent to another host.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined or points elsewhere.
    pub fn url(&self, path: &str) -> DirectoryResult<Url> {
        if path.starts_with("https://") || path.starts_with("http://") {
            let url = Url::parse(path).map_err(|e| {
                DirectoryError::invalid_endpoint_with_source("invalid continuation link", e)
            })?;
            if url.origin() != self.endpoint.origin() {
                return Err(DirectoryError::InvalidEndpoint {
                    message: format!(
                        "continuation link host '{}' does not match the configured endpoint",
                        url.host_str().unwrap_or_default()
                    ),
                });
            }
            return Ok(url);
        }

        self.endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| DirectoryError::invalid_endpoint_with_source("failed to construct URL", e))
    }

    /// Send a GET request with automatic retry.
    pub async fn get(&self, path: &str) -> DirectoryResult<reqwest::Response> {
        self.execute(GraphRequest::get(path)).await
    }

    /// Send a non-idempotent POST with a JSON body.
    pub async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> DirectoryResult<reqwest::Response> {
        self.execute(GraphRequest::post(path, serde_json::to_value(body)?))
            .await
    }

    /// Send a PATCH with a JSON body.
    pub async fn patch<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> DirectoryResult<reqwest::Response> {
        self.execute(GraphRequest::patch(path, serde_json::to_value(body)?))
            .await
    }

    /// Send a PUT with a JSON body.
    pub async fn put<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> DirectoryResult<reqwest::Response> {
        self.execute(GraphRequest::put(path, serde_json::to_value(body)?))
            .await
    }

    /// Send a DELETE.
    pub async fn delete(&self, path: &str) -> DirectoryResult<reqwest::Response> {
        self.execute(GraphRequest::delete(path)).await
    }

    /// Execute a request and decode the JSON response body.
    pub async fn execute_json<T: serde::de::DeserializeOwned>(
        &self,
        request: GraphRequest,
    ) -> DirectoryResult<T> {
        let response = self.execute(request).await?;
        let body = self.cancellable(response.json::<T>()).await??;
        Ok(body)
    }

    /// Execute a request with authentication, retries and cancellation.
    ///
    /// - Transient statuses (429, 503, 504) and connection failures are
    ///   retried up to [`RetryPolicy::max_retries`] times with exponential
    ///   backoff; `Retry-After` on 429/503 overrides the computed delay.
    /// - A 401 triggers one token refresh and retry outside the retry budget.
    /// - For [`Idempotency::NonIdempotent`] requests, a timeout after the
    ///   request was sent or a 504 yields
    ///   [`ConflictPossible`](DirectoryError::ConflictPossible).
    ///
    /// # Errors
    ///
    /// Returns the mapped provider error, [`DirectoryError::Cancelled`] or the
    /// transport error once retries are exhausted.
    #[tracing::instrument(
        name = "entra::http::execute",
        skip(self, request),
        fields(method = %request.method, path = %request.path)
    )]
    pub async fn execute(&self, request: GraphRequest) -> DirectoryResult<reqwest::Response> {
        let mut url = self.url(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let mut attempt: u32 = 0;
        let mut refreshed_after_unauthorized = false;

        loop {
            if self.is_cancelled() {
                return Err(DirectoryError::Cancelled);
            }

            let token = self
                .cancellable(self.credentials.acquire_token())
                .await??;

            let mut builder = self
                .http
                .request(request.method.clone(), url.clone())
                .header(AUTHORIZATION, token.authorization_header());
            if request.eventual_consistency {
                builder = builder.header(CONSISTENCY_LEVEL_HEADER, "eventual");
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = match self.cancellable(builder.send()).await? {
                Ok(response) => response,
                Err(err) => {
                    let nothing_sent = err.is_connect();
                    if request.idempotency == Idempotency::NonIdempotent
                        && !nothing_sent
                        && (err.is_timeout() || err.is_request())
                    {
                        return Err(DirectoryError::ConflictPossible(format!(
                            "{} {} failed after it was sent: {}",
                            request.method, request.path, err
                        )));
                    }
                    if !(nothing_sent || err.is_timeout()) || attempt >= self.retry_policy.max_retries {
                        return Err(err.into());
                    }

                    let delay = self.retry_policy.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transport failure, retrying"
                    );
                    self.sleep(delay).await?;
                    attempt += 1;
                    continue;
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                tracing::debug!(status, "request succeeded");
                return Ok(response);
            }

            if status == 401 && !refreshed_after_unauthorized {
                tracing::warn!("access token rejected, refreshing once");
                refreshed_after_unauthorized = true;
                self.credentials.invalidate(&token).await;
                continue;
            }

            let retry_after = parse_retry_after(response.headers());

            if status == 504 && request.idempotency == Idempotency::NonIdempotent {
                return Err(DirectoryError::ConflictPossible(format!(
                    "{} {} timed out at the gateway",
                    request.method, request.path
                )));
            }

            if !is_retriable_status(status) || attempt >= self.retry_policy.max_retries {
                return Err(self.error_from_response(response, retry_after).await);
            }

            let delay = self.retry_policy.delay_for(status, retry_after, attempt);
            tracing::warn!(
                status,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "transient response, retrying"
            );
            self.sleep(delay).await?;
            attempt += 1;
        }
    }

    async fn error_from_response(
        &self,
        response: reqwest::Response,
        retry_after: Option<Duration>,
    ) -> DirectoryError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let err = map_error_response(status, retry_after, &body);
        tracing::debug!(status, kind = ?err.kind(), "request failed");
        err
    }

    /// Await `fut`, aborting with [`DirectoryError::Cancelled`] when the token fires.
    async fn cancellable<F: Future>(&self, fut: F) -> DirectoryResult<F::Output> {
        match &self.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(DirectoryError::Cancelled),
                out = fut => Ok(out),
            },
            None => Ok(fut.await),
        }
    }

    async fn sleep(&self, delay: Duration) -> DirectoryResult<()> {
        self.cancellable(tokio::time::sleep(delay)).await
    }
}

/// Parse a `Retry-After` header given in seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl DirectoryClientBuilder {
    /// Use a loaded configuration as the fallback for unset values.
    pub fn config(mut self, config: DirectoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the service identity credential.
    ///
    /// If neither this nor [`config`](Self::config) is set, the builder reads
    /// `TENANT_ID`, `CLIENT_ID` and `CLIENT_SECRET`.
    pub fn credential(mut self, credential: ServiceCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Set the directory API endpoint.
    ///
    /// Falls back to `GRAPH_ENDPOINT`, then [`DEFAULT_GRAPH_ENDPOINT`].
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the token authority host.
    ///
    /// Falls back to `AUTHORITY_HOST`, then [`DEFAULT_AUTHORITY_HOST`].
    pub fn authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = Some(host.into());
        self
    }

    /// Set the token scope. Defaults to [`DEFAULT_SCOPE`].
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Restrict user principal names to these domains.
    pub fn accepted_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = domains
            .into_iter()
            .map(|d| d.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.accepted_domains = Some(config::parse_domain_list(&joined));
        self
    }

    /// Set a custom HTTP client.
    ///
    /// **Note:** If you provide a custom HTTP client, any timeout configuration
    /// via [`connect_timeout`](Self::connect_timeout) will be ignored.
    pub fn http_client(mut self, client: HttpClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the read timeout, covering the whole request/response cycle.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the retry policy for transient errors.
    ///
    /// Defaults to 3 retries with 500ms initial backoff.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set how long before expiry a cached token is refreshed.
    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = Some(margin);
        self
    }

    /// Build the `DirectoryClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No credential is supplied and the environment lacks one
    /// - The endpoint or authority URL is invalid
    pub fn build(self) -> DirectoryResult<DirectoryClient> {
        let http = match self.http_client {
            Some(http) => http,
            None => HttpClient::builder()
                .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
                .timeout(self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT))
                .build()?,
        };

        let (config_credential, config_domains, config_endpoint, config_authority) =
            match self.config {
                Some(c) => (
                    Some(c.credential),
                    Some(c.accepted_domains),
                    c.graph_endpoint,
                    c.authority_host,
                ),
                None => (None, None, None, None),
            };

        let credential = match self.credential.or(config_credential) {
            Some(credential) => credential,
            None => ServiceCredential::from_env()?,
        };

        let endpoint_str = self
            .endpoint
            .or(config_endpoint)
            .or_else(|| config::non_empty_env(config::GRAPH_ENDPOINT_ENV))
            .unwrap_or_else(|| DEFAULT_GRAPH_ENDPOINT.to_string());
        let endpoint = parse_base_url(&endpoint_str, "invalid endpoint URL")?;

        let authority_str = self
            .authority_host
            .or(config_authority)
            .or_else(|| config::non_empty_env(config::AUTHORITY_HOST_ENV))
            .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string());
        let authority = parse_base_url(&authority_str, "invalid authority host")?;

        let accepted_domains = self
            .accepted_domains
            .or(config_domains)
            .unwrap_or_else(config::accepted_domains_from_env);

        let mut credentials = CredentialManager::new(
            credential,
            http.clone(),
            &authority,
            self.scope.unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
        )?;
        if let Some(margin) = self.refresh_margin {
            credentials = credentials.with_refresh_margin(margin);
        }

        tracing::debug!(endpoint = %endpoint, "directory client configured");

        Ok(DirectoryClient {
            http,
            endpoint,
            credentials: Arc::new(credentials),
            validator: Arc::new(Validator::new(accepted_domains)),
            retry_policy: self.retry_policy.unwrap_or_default(),
            cancellation: None,
        })
    }
}

/// Parse a base URL, ensuring a trailing slash so relative joins append.
fn parse_base_url(raw: &str, what: &str) -> DirectoryResult<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| DirectoryError::invalid_endpoint_with_source(what, e))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
