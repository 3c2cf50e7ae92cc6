//! Application registrations.

use entra_admin_core::client::DirectoryClient;
use entra_admin_core::error::DirectoryResult;
use entra_admin_core::models::{EntityFamily, PropertyMap};
use entra_admin_core::pagination::EntityStream;

use crate::entity::{self, ListOptions};
use crate::models::Application;

const FAMILY: EntityFamily = EntityFamily::Application;

/// List application registrations lazily.
#[tracing::instrument(name = "entra::applications::list", skip(client, options))]
pub fn list(client: &DirectoryClient, options: ListOptions) -> EntityStream<Application> {
    entity::list(client, FAMILY, options)
}

/// Get an application by object id (not the `appId`).
///
/// # Tracing
///
/// Emits a span named `entra::applications::get` with field `application_id`.
#[tracing::instrument(name = "entra::applications::get", skip(client), fields(application_id = %application_id))]
pub async fn get(client: &DirectoryClient, application_id: &str) -> DirectoryResult<Application> {
    entity::get(client, FAMILY, application_id).await
}

/// Register an application. The service assigns its `appId`.
///
/// # Tracing
///
/// Emits a span named `entra::applications::create`.
#[tracing::instrument(name = "entra::applications::create", skip(client, properties))]
pub async fn create(client: &DirectoryClient, properties: &PropertyMap) -> DirectoryResult<Application> {
    tracing::debug!("registering application");
    let (application, _) = entity::create::<Application>(client, FAMILY, properties).await?;
    tracing::debug!(application_id = %application.id, app_id = ?application.app_id, "application registered");
    Ok(application)
}

/// Update an application. `appId` cannot change.
#[tracing::instrument(name = "entra::applications::update", skip(client, properties), fields(application_id = %application_id))]
pub async fn update(client: &DirectoryClient, application_id: &str, properties: &PropertyMap) -> DirectoryResult<()> {
    entity::update(client, FAMILY, application_id, properties).await.map(|_| ())
}

/// Delete an application registration.
#[tracing::instrument(name = "entra::applications::delete", skip(client), fields(application_id = %application_id))]
pub async fn delete(client: &DirectoryClient, application_id: &str) -> DirectoryResult<()> {
    entity::delete(client, FAMILY, application_id).await
}
