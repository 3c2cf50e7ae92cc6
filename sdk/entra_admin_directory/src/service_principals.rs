//! Service principals: applications instantiated in this tenant.

use entra_admin_core::client::{DirectoryClient, GraphRequest};
use entra_admin_core::error::{DirectoryResult, OperationContext, ResultExt};
use entra_admin_core::models::{EntityFamily, PropertyMap};
use entra_admin_core::pagination::EntityStream;

use crate::entity::{self, odata_literal, require_id, ListOptions};
use crate::models::ServicePrincipal;

const FAMILY: EntityFamily = EntityFamily::ServicePrincipal;

/// List service principals lazily.
#[tracing::instrument(name = "entra::service_principals::list", skip(client, options))]
pub fn list(client: &DirectoryClient, options: ListOptions) -> EntityStream<ServicePrincipal> {
    entity::list(client, FAMILY, options)
}

/// Get a service principal by object id.
#[tracing::instrument(name = "entra::service_principals::get", skip(client), fields(sp_id = %sp_id))]
pub async fn get(client: &DirectoryClient, sp_id: &str) -> DirectoryResult<ServicePrincipal> {
    entity::get(client, FAMILY, sp_id).await
}

/// Get the service principal of an application by its `appId`.
///
/// # Tracing
///
/// Emits a span named `entra::service_principals::get_by_app_id` with field
/// `app_id`.
#[tracing::instrument(name = "entra::service_principals::get_by_app_id", skip(client), fields(app_id = %app_id))]
pub async fn get_by_app_id(client: &DirectoryClient, app_id: &str) -> DirectoryResult<ServicePrincipal> {
    let context = OperationContext::new(FAMILY, "get_by_app_id").with_id(app_id);
    let app_id = require_id(FAMILY, app_id).context(context.clone())?;

    // Addressing by alternate key answers 404 when no principal exists.
    let path = format!("{}(appId={})", FAMILY.collection_path(), odata_literal(&app_id));
    client
        .execute_json(GraphRequest::get(path))
        .await
        .context(context)
}

/// Instantiate an application in this tenant. Requires `appId`.
///
/// # Tracing
///
/// Emits a span named `entra::service_principals::create`.
#[tracing::instrument(name = "entra::service_principals::create", skip(client, properties))]
pub async fn create(client: &DirectoryClient, properties: &PropertyMap) -> DirectoryResult<ServicePrincipal> {
    let (sp, _) = entity::create::<ServicePrincipal>(client, FAMILY, properties).await?;
    tracing::debug!(sp_id = %sp.id, "service principal created");
    Ok(sp)
}

#[tracing::instrument(name = "entra::service_principals::update", skip(client, properties), fields(sp_id = %sp_id))]
pub async fn update(client: &DirectoryClient, sp_id: &str, properties: &PropertyMap) -> DirectoryResult<()> {
    entity::update(client, FAMILY, sp_id, properties).await.map(|_| ())
}

#[tracing::instrument(name = "entra::service_principals::delete", skip(client), fields(sp_id = %sp_id))]
pub async fn delete(client: &DirectoryClient, sp_id: &str) -> DirectoryResult<()> {
    entity::delete(client, FAMILY, sp_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{odata_error, setup_mock_client};
    use entra_admin_core::error::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lookup_by_app_id_uses_alternate_key() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/servicePrincipals(appId='app-1')"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sp-1",
                "appId": "app-1",
                "displayName": "Payroll",
                "tags": ["WindowsAzureActiveDirectoryIntegratedApp"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sp = get_by_app_id(&client, "app-1").await.unwrap();
        assert_eq!(sp.id, "sp-1");
        assert_eq!(sp.tags.len(), 1);
    }

    #[tokio::test]
    async fn unknown_app_id_is_not_found() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/servicePrincipals(appId='missing')"))
            .respond_with(ResponseTemplate::new(404).set_body_json(odata_error(
                "Request_ResourceNotFound",
                "Resource 'missing' does not exist",
            )))
            .mount(&server)
            .await;

        let err = get_by_app_id(&client, "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create_requires_app_id() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        let properties = json!({"displayName": "Payroll"});
        let err = create(&client, properties.as_object().unwrap()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
