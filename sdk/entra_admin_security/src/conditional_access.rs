//! Conditional Access policies.
//!
//! Policies can be listed, read, patched and switched between states.
//! Creating policies is not supported; their condition trees are left
//! untyped and are best authored in the admin portal.

use entra_admin_core::client::{escape_segment, DirectoryClient, GraphRequest};
use entra_admin_core::error::{DirectoryError, DirectoryResult, OperationContext, ResultExt};
use entra_admin_core::models::{EntityFamily, OperationKind, PropertyMap};
use entra_admin_core::pagination::{self, EntityStream};
use entra_admin_directory::ListOptions;
use serde_json::json;

use crate::models::{ConditionalAccessPolicy, PolicyState};

const FAMILY: EntityFamily = EntityFamily::ConditionalAccessPolicy;

fn policy_path(context: &OperationContext, policy_id: &str) -> DirectoryResult<String> {
    let policy_id = policy_id.trim();
    if policy_id.is_empty() {
        return Err(DirectoryError::validation("policy id must not be empty")).context(context.clone());
    }
    Ok(FAMILY.item_path(&escape_segment(policy_id)))
}

/// List policies.
///
/// # Tracing
///
/// Emits a span named `entra::conditional_access::list`.
#[tracing::instrument(name = "entra::conditional_access::list", skip(client, options))]
pub fn list(client: &DirectoryClient, options: ListOptions) -> EntityStream<ConditionalAccessPolicy> {
    pagination::list(client, options.into_request(FAMILY.collection_path()))
}

/// Get a policy by id.
///
/// # Tracing
///
/// Emits a span named `entra::conditional_access::get` with field
/// `policy_id`.
#[tracing::instrument(name = "entra::conditional_access::get", skip(client))]
pub async fn get(client: &DirectoryClient, policy_id: &str) -> DirectoryResult<ConditionalAccessPolicy> {
    let context = OperationContext::new(FAMILY, "get").with_id(policy_id);
    let path = policy_path(&context, policy_id)?;
    client.execute_json(GraphRequest::get(path)).await.context(context)
}

/// Patch a policy. Only `displayName`, `state`, `conditions`,
/// `grantControls` and `sessionControls` are accepted.
///
/// # Tracing
///
/// Emits a span named `entra::conditional_access::update` with field
/// `policy_id`.
#[tracing::instrument(name = "entra::conditional_access::update", skip(client, properties))]
pub async fn update(client: &DirectoryClient, policy_id: &str, properties: &PropertyMap) -> DirectoryResult<()> {
    let context = OperationContext::new(FAMILY, "update").with_id(policy_id);
    let path = policy_path(&context, policy_id)?;
    let normalized = client
        .validator()
        .validate(FAMILY, OperationKind::Update, properties)
        .context(context.clone())?;

    client
        .execute(GraphRequest::patch(path, serde_json::Value::Object(normalized.payload())))
        .await
        .context(context)?;
    Ok(())
}

/// Move a policy to `state`. Returns `false` when it already was there.
///
/// # Example
///
/// ```rust,no_run
/// use entra_admin_core::client::DirectoryClient;
/// use entra_admin_security::conditional_access;
/// use entra_admin_security::models::PolicyState;
///
/// # async fn example(client: &DirectoryClient) -> entra_admin_core::error::DirectoryResult<()> {
/// conditional_access::set_state(client, "policy-id", PolicyState::EnabledForReportingButNotEnforced).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Tracing
///
/// Emits a span named `entra::conditional_access::set_state` with fields
/// `policy_id` and `state`.
#[tracing::instrument(name = "entra::conditional_access::set_state", skip(client), fields(state = %state))]
pub async fn set_state(client: &DirectoryClient, policy_id: &str, state: PolicyState) -> DirectoryResult<bool> {
    let context = OperationContext::new(FAMILY, "set_state").with_id(policy_id);
    let path = policy_path(&context, policy_id)?;

    #[derive(serde::Deserialize)]
    struct CurrentState {
        state: Option<PolicyState>,
    }

    let current: CurrentState = client
        .execute_json(GraphRequest::get(path.clone()).query("$select", "id,state"))
        .await
        .context(context.clone())?;
    if current.state == Some(state) {
        tracing::debug!("policy already in requested state");
        return Ok(false);
    }

    client
        .execute(GraphRequest::patch(path, json!({ "state": state.as_str() })))
        .await
        .context(context)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{odata_page, setup_mock_client};
    use entra_admin_core::error::ErrorKind;
    use futures::TryStreamExt;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const POLICY_PATH: &str = "/identity/conditionalAccess/policies/p-1";

    fn policy(state: &str) -> serde_json::Value {
        json!({
            "id": "p-1",
            "displayName": "Require MFA for admins",
            "state": state,
            "conditions": {"users": {"includeRoles": ["62e90394-69f5-4237-9190-012177145e10"]}},
            "grantControls": {"operator": "OR", "builtInControls": ["mfa"]}
        })
    }

    #[tokio::test]
    async fn lists_policies() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/identity/conditionalAccess/policies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(vec![policy("enabled")], None)))
            .mount(&server)
            .await;

        let policies: Vec<_> = list(&client, ListOptions::new()).try_collect().await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].state, Some(PolicyState::Enabled));
        assert!(policies[0].grant_controls.is_some());
    }

    #[tokio::test]
    async fn set_state_patches_when_different() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path(POLICY_PATH))
            .and(query_param("$select", "id,state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(policy("enabled")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(POLICY_PATH))
            .and(body_json(json!({"state": "enabledForReportingButNotEnforced"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let changed = set_state(&client, "p-1", PolicyState::EnabledForReportingButNotEnforced)
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn set_state_is_idempotent() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path(POLICY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(policy("disabled")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        assert!(!set_state(&client, "p-1", PolicyState::Disabled).await.unwrap());
    }

    #[tokio::test]
    async fn update_rejects_unknown_state_locally() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        let mut properties = PropertyMap::new();
        properties.insert("state".into(), json!("on"));

        let err = update(&client, "p-1", &properties).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
