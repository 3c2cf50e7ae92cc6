//! Authentication methods and MFA registration status.
//!
//! A user counts as MFA-registered when any method other than the password
//! is registered. This reflects registration, not enforcement; whether MFA
//! is actually required is decided by Conditional Access.

use entra_admin_core::client::{escape_segment, DirectoryClient};
use entra_admin_core::error::{DirectoryError, DirectoryResult, ErrorKind, OperationContext, ResultExt};
use entra_admin_core::models::EntityFamily;
use entra_admin_core::pagination::{self, ListRequest};
use entra_admin_directory::{groups, ListOptions};

use crate::models::{AuthenticationMethod, MemberMfaStatus, MfaStatus};

const FAMILY: EntityFamily = EntityFamily::AuthenticationMethod;

fn require_user(user_id: &str) -> DirectoryResult<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(DirectoryError::validation("user id must not be empty"));
    }
    Ok(user_id)
}

/// Every authentication method registered for a user.
///
/// # Tracing
///
/// Emits a span named `entra::auth_methods::list_methods` with field
/// `user_id`.
#[tracing::instrument(name = "entra::auth_methods::list_methods", skip(client))]
pub async fn list_methods(client: &DirectoryClient, user_id: &str) -> DirectoryResult<Vec<AuthenticationMethod>> {
    let context = OperationContext::new(FAMILY, "list_methods").with_id(user_id);
    let user_id = require_user(user_id).context(context.clone())?;

    let path = format!(
        "{}/{}",
        EntityFamily::User.item_path(&escape_segment(user_id)),
        FAMILY.collection_path()
    );
    pagination::collect_all(pagination::list(client, ListRequest::new(path)))
        .await
        .context(context)
}

/// MFA registration status of one user.
///
/// # Example
///
/// ```rust,no_run
/// use entra_admin_core::client::DirectoryClient;
/// use entra_admin_security::auth_methods;
///
/// # async fn example(client: &DirectoryClient) -> entra_admin_core::error::DirectoryResult<()> {
/// let status = auth_methods::mfa_status(client, "ada@contoso.com").await?;
/// if !status.mfa_enabled {
///     println!("{} has only a password", status.user_id);
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Tracing
///
/// Emits a span named `entra::auth_methods::mfa_status` with field
/// `user_id`.
#[tracing::instrument(name = "entra::auth_methods::mfa_status", skip(client))]
pub async fn mfa_status(client: &DirectoryClient, user_id: &str) -> DirectoryResult<MfaStatus> {
    let methods = list_methods(client, user_id).await?;
    let status = MfaStatus::from_methods(user_id.trim(), methods);
    tracing::debug!(
        mfa_enabled = status.mfa_enabled,
        methods = status.method_count,
        "mfa status resolved"
    );
    Ok(status)
}

/// MFA status of every user directly in a group.
///
/// Non-user members (devices, service principals, nested groups) are
/// skipped. A member whose methods cannot be read gets an entry carrying the
/// error; the remaining members are still processed. Failing to list the
/// members, or a cancelled client, fails the whole call.
///
/// # Tracing
///
/// Emits a span named `entra::auth_methods::group_mfa_status` with field
/// `group_id`.
#[tracing::instrument(name = "entra::auth_methods::group_mfa_status", skip(client))]
pub async fn group_mfa_status(client: &DirectoryClient, group_id: &str) -> DirectoryResult<Vec<MemberMfaStatus>> {
    let context = OperationContext::new(EntityFamily::Group, "group_mfa_status").with_id(group_id);
    let members = pagination::collect_all(groups::members(client, group_id, ListOptions::new()))
        .await
        .context(context.clone())?;

    let mut statuses = Vec::new();
    for member in members.into_iter().filter(|m| m.is_type("user")) {
        let status = match mfa_status(client, &member.id).await {
            Err(err) if err.kind() == ErrorKind::Cancelled => return Err(err).context(context),
            Err(err) => {
                tracing::warn!(user_id = %member.id, error = %err, "could not read mfa status");
                Err(err)
            }
            ok => ok,
        };
        statuses.push(MemberMfaStatus {
            display_name: member.str_property("displayName").map(str::to_string),
            user_principal_name: member.str_property("userPrincipalName").map(str::to_string),
            mail: member.str_property("mail").map(str::to_string),
            user_id: member.id,
            status,
        });
    }

    tracing::debug!(
        members = statuses.len(),
        failed = statuses.iter().filter(|s| s.status.is_err()).count(),
        "group mfa status resolved"
    );
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PASSWORD_METHOD_TYPE;
    use crate::test_utils::{odata_error, odata_page, setup_mock_client, test_group, test_user};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn password_method() -> serde_json::Value {
        json!({"id": "pw", "@odata.type": PASSWORD_METHOD_TYPE})
    }

    fn authenticator_method() -> serde_json::Value {
        json!({"id": "app", "@odata.type": "#microsoft.graph.microsoftAuthenticatorAuthenticationMethod"})
    }

    async fn mount_methods(server: &MockServer, user_id: &str, methods: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path(format!("/users/{user_id}/authentication/methods")))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(methods, None)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn password_only_user_has_no_mfa() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;
        mount_methods(&server, "u-1", vec![password_method()]).await;

        let status = mfa_status(&client, "u-1").await.unwrap();
        assert!(!status.mfa_enabled);
        assert_eq!(status.method_count, 1);
    }

    #[tokio::test]
    async fn authenticator_enables_mfa() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;
        mount_methods(&server, "u-1", vec![password_method(), authenticator_method()]).await;

        let status = mfa_status(&client, "u-1").await.unwrap();
        assert!(status.mfa_enabled);
        assert_eq!(status.methods[1].id, "app");
    }

    #[tokio::test]
    async fn group_status_isolates_member_failures() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/groups/g-1/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
                vec![
                    test_user("u-1", "ada"),
                    test_group("g-2", "Nested"),
                    test_user("u-2", "grace"),
                    test_user("u-3", "linus"),
                ],
                None,
            )))
            .mount(&server)
            .await;
        mount_methods(&server, "u-1", vec![password_method(), authenticator_method()]).await;
        Mock::given(method("GET"))
            .and(path("/users/u-2/authentication/methods"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(odata_error("Request_ResourceNotFound", "gone")),
            )
            .mount(&server)
            .await;
        mount_methods(&server, "u-3", vec![password_method()]).await;

        let statuses = group_mfa_status(&client, "g-1").await.unwrap();

        let summary: Vec<_> = statuses
            .iter()
            .map(|s| (s.user_id.as_str(), s.mfa_enabled()))
            .collect();
        assert_eq!(summary, [("u-1", Some(true)), ("u-2", None), ("u-3", Some(false))]);
        assert_eq!(statuses[0].user_principal_name.as_deref(), Some("ada@contoso.com"));
        let failure = statuses[1].status.as_ref().unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_member_failure_is_logged() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/groups/g-1/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(vec![test_user("u-2", "grace")], None)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/u-2/authentication/methods"))
            .respond_with(ResponseTemplate::new(403).set_body_json(odata_error("Forbidden", "denied")))
            .mount(&server)
            .await;

        let statuses = group_mfa_status(&client, "g-1").await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(logs_contain("entra::auth_methods::group_mfa_status"));
        assert!(logs_contain("could not read mfa status"));
    }

    #[tokio::test]
    async fn unknown_group_fails_whole_call() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/groups/missing/members"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(odata_error("Request_ResourceNotFound", "no group")),
            )
            .mount(&server)
            .await;

        let err = group_mfa_status(&client, "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.context().unwrap().family, EntityFamily::Group);
    }
}
