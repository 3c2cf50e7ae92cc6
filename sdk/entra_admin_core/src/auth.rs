//! Service-identity credential lifecycle.
//!
//! [`CredentialManager`] acquires access tokens through the OAuth2 client
//! credentials grant and caches them until shortly before expiry. Concurrent
//! callers that find the cache empty or stale share a single refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use url::Url;

use crate::error::{DirectoryError, DirectoryResult};

/// Default authority host for the public cloud.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

/// Default scope requested for Microsoft Graph.
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Default margin before expiry at which a cached token is refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Client-credentials material for the service identity.
#[derive(Clone)]
pub struct ServiceCredential {
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
}

impl ServiceCredential {
    /// Create a credential, rejecting missing or malformed values.
    ///
    /// Returns [`DirectoryError::Config`] naming every missing value.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> DirectoryResult<Self> {
        let tenant_id = tenant_id.into().trim().to_string();
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into();

        let mut missing = Vec::new();
        if tenant_id.is_empty() {
            missing.push("tenant_id");
        }
        if client_id.is_empty() {
            missing.push("client_id");
        }
        if client_secret.trim().is_empty() {
            missing.push("client_secret");
        }
        if !missing.is_empty() {
            return Err(DirectoryError::Config(format!(
                "missing required credentials: {}",
                missing.join(", ")
            )));
        }

        // The tenant is interpolated into the token URL path.
        if tenant_id
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'))
        {
            return Err(DirectoryError::Config(format!(
                "tenant_id '{tenant_id}' is not a valid tenant identifier"
            )));
        }

        Ok(Self {
            tenant_id,
            client_id,
            client_secret: SecretString::from(client_secret),
        })
    }

    /// Create a credential from `TENANT_ID`, `CLIENT_ID` and `CLIENT_SECRET`.
    pub fn from_env() -> DirectoryResult<Self> {
        let read = |name: &str| std::env::var(name).unwrap_or_default();
        Self::new(read("TENANT_ID"), read("CLIENT_ID"), read("CLIENT_SECRET"))
    }

    /// The target tenant.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The service identity's client (application) id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl std::fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .finish()
    }
}

/// A bearer token with its expiry.
#[derive(Clone)]
pub struct AccessToken {
    secret: SecretString,
    expires_at: Instant,
}

impl AccessToken {
    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.secret.expose_secret())
    }

    /// When the provider considers the token expired.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the token expires within `margin` of `now`.
    fn is_stale(&self, now: Instant, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    fn same_as(&self, other: &AccessToken) -> bool {
        self.expires_at == other.expires_at
            && self.secret.expose_secret() == other.secret.expose_secret()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"****")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint success body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Token endpoint error body.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Owns the service identity's token and its refresh.
///
/// Shared by reference (normally behind an `Arc` inside the client); there is
/// no process-global token state.
#[derive(Debug)]
pub struct CredentialManager {
    credential: ServiceCredential,
    http: reqwest::Client,
    token_url: Url,
    scope: String,
    refresh_margin: Duration,
    cached: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
    refresh_count: AtomicU64,
}

impl CredentialManager {
    /// Create a manager for `credential` against `authority_host`.
    pub fn new(
        credential: ServiceCredential,
        http: reqwest::Client,
        authority_host: &Url,
        scope: impl Into<String>,
    ) -> DirectoryResult<Self> {
        let token_url = authority_host
            .join(&format!("{}/oauth2/v2.0/token", credential.tenant_id))
            .map_err(|e| {
                DirectoryError::invalid_endpoint_with_source("failed to construct token URL", e)
            })?;

        Ok(Self {
            credential,
            http,
            token_url,
            scope: scope.into(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refresh_count: AtomicU64::new(0),
        })
    }

    /// Override the proactive refresh margin.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// The credential this manager authenticates with.
    pub fn credential(&self) -> &ServiceCredential {
        &self.credential
    }

    /// Number of refreshes that reached the token endpoint.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Return a token valid for at least the refresh margin.
    ///
    /// Uses a single-flight pattern: callers arriving while a refresh is in
    /// flight wait for it and receive its token.
    #[tracing::instrument(
        name = "entra::auth::acquire_token",
        skip(self),
        fields(tenant_id = %self.credential.tenant_id)
    )]
    pub async fn acquire_token(&self) -> DirectoryResult<AccessToken> {
        if let Some(token) = self.cached_fresh().await {
            return Ok(token);
        }

        let _refresh_guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached_fresh().await {
            return Ok(token);
        }

        let token = self.request_token().await?;
        *self.cached.write().await = Some(token.clone());
        Ok(token)
    }

    /// Discard `stale` so the next [`acquire_token`](Self::acquire_token) refreshes.
    ///
    /// A no-op if the cache already holds a different token, so concurrent
    /// 401s against the same stale token trigger one refresh.
    pub async fn invalidate(&self, stale: &AccessToken) {
        let mut cache = self.cached.write().await;
        if cache.as_ref().is_some_and(|current| current.same_as(stale)) {
            tracing::debug!("invalidating cached access token");
            *cache = None;
        }
    }

    async fn cached_fresh(&self) -> Option<AccessToken> {
        let cache = self.cached.read().await;
        cache
            .as_ref()
            .filter(|t| !t.is_stale(Instant::now(), self.refresh_margin))
            .cloned()
    }

    async fn request_token(&self) -> DirectoryResult<AccessToken> {
        tracing::debug!("requesting access token");
        self.refresh_count.fetch_add(1, Ordering::SeqCst);

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credential.client_id.as_str()),
            ("client_secret", self.credential.client_secret.expose_secret()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => body,
            };
            return Err(DirectoryError::Auth(format!(
                "token request rejected with status {}: {}",
                status.as_u16(),
                crate::error::truncate_message(&detail)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Auth(format!("failed to parse token response: {e}")))?;

        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        tracing::debug!(expires_in = token.expires_in, "access token acquired");

        Ok(AccessToken {
            secret: SecretString::from(token.access_token),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> ServiceCredential {
        ServiceCredential::new("contoso-tenant", "client-123", "secret-xyz").unwrap()
    }

    fn manager(server: &MockServer) -> CredentialManager {
        let authority = Url::parse(&format!("{}/", server.uri())).unwrap();
        CredentialManager::new(credential(), reqwest::Client::new(), &authority, DEFAULT_SCOPE)
            .unwrap()
    }

    fn token_body(token: &str, expires_in: u64) -> serde_json::Value {
        serde_json::json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": expires_in
        })
    }

    #[test]
    fn credential_reports_all_missing_values() {
        let err = ServiceCredential::new("", " ", "").unwrap_err();
        match err {
            DirectoryError::Config(msg) => {
                assert!(msg.contains("tenant_id"));
                assert!(msg.contains("client_id"));
                assert!(msg.contains("client_secret"));
            }
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn credential_rejects_path_characters_in_tenant() {
        let err = ServiceCredential::new("contoso/../x", "client", "secret").unwrap_err();
        assert!(matches!(err, DirectoryError::Config(_)));
    }

    #[test]
    fn credential_debug_redacts_secret() {
        let debug = format!("{:?}", credential());
        assert!(!debug.contains("secret-xyz"));
        assert!(debug.contains("****"));
    }

    #[test]
    #[serial]
    fn credential_from_env() {
        std::env::set_var("TENANT_ID", "env-tenant");
        std::env::set_var("CLIENT_ID", "env-client");
        std::env::set_var("CLIENT_SECRET", "env-secret");

        let cred = ServiceCredential::from_env().expect("should load");
        assert_eq!(cred.tenant_id(), "env-tenant");
        assert_eq!(cred.client_id(), "env-client");

        std::env::remove_var("CLIENT_SECRET");
        assert!(matches!(
            ServiceCredential::from_env(),
            Err(DirectoryError::Config(_))
        ));

        std::env::remove_var("TENANT_ID");
        std::env::remove_var("CLIENT_ID");
    }

    #[test]
    fn token_staleness_honors_margin() {
        let now = Instant::now();
        let token = AccessToken {
            secret: SecretString::from("t".to_string()),
            expires_at: now + Duration::from_secs(600),
        };

        assert!(!token.is_stale(now, Duration::from_secs(300)));
        assert!(token.is_stale(now, Duration::from_secs(900)));
        assert!(token.is_stale(now + Duration::from_secs(601), Duration::ZERO));
    }

    #[tokio::test]
    async fn acquires_and_caches_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/contoso-tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server);
        let first = manager.acquire_token().await.expect("should acquire");
        let second = manager.acquire_token().await.expect("should reuse");

        assert_eq!(first.authorization_header(), "Bearer tok-1");
        assert_eq!(second.authorization_header(), "Bearer tok-1");
        assert_eq!(manager.refresh_count(), 1);
    }

    #[tokio::test]
    async fn short_lived_token_is_refreshed_proactively() {
        let server = MockServer::start().await;

        // Lifetime shorter than the default margin: every call must refresh.
        Mock::given(method("POST"))
            .and(path("/contoso-tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("short", 60)))
            .expect(2)
            .mount(&server)
            .await;

        let manager = manager(&server);
        manager.acquire_token().await.unwrap();
        manager.acquire_token().await.unwrap();

        assert_eq!(manager.refresh_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/contoso-tenant/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("shared", 3600))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let manager = Arc::new(manager(&server));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.acquire_token().await }));
        }

        for handle in handles {
            let token = handle.await.unwrap().expect("should acquire");
            assert_eq!(token.authorization_header(), "Bearer shared");
        }
        assert_eq!(manager.refresh_count(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh_once() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/contoso-tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok", 3600)))
            .expect(2)
            .mount(&server)
            .await;

        let manager = manager(&server);
        let stale = manager.acquire_token().await.unwrap();

        manager.invalidate(&stale).await;
        let fresh = manager.acquire_token().await.unwrap();

        // A late invalidation with the old token must not discard the new one.
        manager.invalidate(&stale).await;
        let again = manager.acquire_token().await.unwrap();

        assert_eq!(fresh.expires_at(), again.expires_at());
        assert_eq!(manager.refresh_count(), 2);
    }

    #[tokio::test]
    async fn rejected_credentials_surface_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/contoso-tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .mount(&server)
            .await;

        let err = manager(&server).acquire_token().await.unwrap_err();
        match err {
            DirectoryError::Auth(msg) => {
                assert!(msg.contains("invalid_client"));
                assert!(msg.contains("AADSTS7000215"));
                assert!(!msg.contains("secret-xyz"));
            }
            other => panic!("Expected Auth error, got {:?}", other),
        }
    }
}
