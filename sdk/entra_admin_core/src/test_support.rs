//! Mock-server helpers shared by the workspace's tests.
//!
//! Enabled for this crate's own tests and, for sibling crates, through the
//! `test-support` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use crate::auth::ServiceCredential;
use crate::client::{DirectoryClient, DirectoryClientBuilder, RetryPolicy};

/// Tenant used by mock clients (not a real tenant).
pub const TEST_TENANT_ID: &str = "00000000-0000-0000-0000-0000000000aa";

/// Client id used by mock clients.
pub const TEST_CLIENT_ID: &str = "11111111-1111-1111-1111-1111111111bb";

/// Access token issued by the mock token endpoint.
pub const TEST_ACCESS_TOKEN: &str = "test-access-token";

/// Retry policy with millisecond backoff for tests.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
        max_retry_after: Duration::from_secs(120),
    }
}

/// Mount a token endpoint that always issues [`TEST_ACCESS_TOKEN`].
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{TEST_TENANT_ID}/oauth2/v2.0/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(
            TEST_ACCESS_TOKEN,
            3600,
        )))
        .mount(server)
        .await;
}

/// A builder pointed at `server` for both the API and the token authority.
pub fn mock_client_builder(server: &MockServer) -> DirectoryClientBuilder {
    let credential = ServiceCredential::new(TEST_TENANT_ID, TEST_CLIENT_ID, "test-secret")
        .expect("test credential is valid");

    DirectoryClient::builder()
        .credential(credential)
        .endpoint(server.uri())
        .authority_host(server.uri())
        .accepted_domains(Vec::<String>::new())
        .retry_policy(fast_retry_policy())
}

/// Create a test client connected to a mock server with a token endpoint.
pub async fn setup_mock_client(server: &MockServer) -> DirectoryClient {
    mount_token_endpoint(server).await;
    mock_client_builder(server)
        .build()
        .expect("should build client")
}

/// Token endpoint success body.
pub fn token_response(access_token: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

/// Wrap items in an OData collection response.
pub fn odata_page(items: Vec<Value>, next_link: Option<&str>) -> Value {
    let mut response = json!({ "value": items });
    if let Some(link) = next_link {
        response["@odata.nextLink"] = json!(link);
    }
    response
}

/// An OData error body.
pub fn odata_error(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// A user as the service returns it.
pub fn test_user(id: &str, name: &str) -> Value {
    json!({
        "@odata.type": "#microsoft.graph.user",
        "id": id,
        "displayName": format!("Test User {name}"),
        "userPrincipalName": format!("{name}@contoso.com"),
        "mailNickname": name,
        "accountEnabled": true
    })
}

/// A security group as the service returns it.
pub fn test_group(id: &str, name: &str) -> Value {
    json!({
        "@odata.type": "#microsoft.graph.group",
        "id": id,
        "displayName": name,
        "mailNickname": name.replace(' ', ""),
        "mailEnabled": false,
        "securityEnabled": true,
        "groupTypes": []
    })
}

/// Serves a fixed sequence of pages, one per request.
///
/// Requests beyond the last page receive an empty collection.
pub struct PaginatedResponder {
    pages: Vec<Value>,
    served: Arc<AtomicUsize>,
}

impl PaginatedResponder {
    pub fn new(pages: Vec<Value>) -> Self {
        Self {
            pages,
            served: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of requests served so far.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.served)
    }
}

impl Respond for PaginatedResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let index = self.served.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(index) {
            Some(page) => ResponseTemplate::new(200).set_body_json(page.clone()),
            None => ResponseTemplate::new(200).set_body_json(odata_page(Vec::new(), None)),
        }
    }
}
