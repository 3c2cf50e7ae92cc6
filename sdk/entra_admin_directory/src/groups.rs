//! Groups and group membership.
//!
//! ## Example
//!
//! ```rust,no_run
//! use entra_admin_core::client::DirectoryClient;
//! use entra_admin_directory::groups;
//! use serde_json::json;
//!
//! # async fn example(client: &DirectoryClient) -> entra_admin_core::error::DirectoryResult<()> {
//! let properties = json!({"displayName": "Platform Engineering"});
//! let group = groups::create(client, properties.as_object().unwrap()).await?;
//!
//! groups::add_member(client, &group.id, "user-id").await?;
//! for found in groups::search_by_name(client, "platform", 10).await? {
//!     println!("{} {}", found.id, found.display_name.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

use entra_admin_core::client::{escape_segment, DirectoryClient, GraphRequest, Idempotency};
use entra_admin_core::error::{
    DirectoryError, DirectoryResult, ErrorKind, OperationContext, ResultExt,
};
use entra_admin_core::models::{DirectoryObject, EntityFamily, EntityRef, PropertyMap};
use entra_admin_core::pagination::{self, EntityStream};
use serde_json::json;

use crate::entity::{self, item_path, odata_literal, require_id, ListOptions};
use crate::models::Group;

const FAMILY: EntityFamily = EntityFamily::Group;

/// List groups lazily.
///
/// # Tracing
///
/// Emits a span named `entra::groups::list`.
#[tracing::instrument(name = "entra::groups::list", skip(client, options))]
pub fn list(client: &DirectoryClient, options: ListOptions) -> EntityStream<Group> {
    entity::list(client, FAMILY, options)
}

/// Get a group by id.
///
/// # Tracing
///
/// Emits a span named `entra::groups::get` with field `group_id`.
#[tracing::instrument(name = "entra::groups::get", skip(client), fields(group_id = %group_id))]
pub async fn get(client: &DirectoryClient, group_id: &str) -> DirectoryResult<Group> {
    tracing::debug!("getting group");
    entity::get(client, FAMILY, group_id).await
}

/// Groups whose display name starts with `prefix`, case-insensitively.
///
/// # Tracing
///
/// Emits a span named `entra::groups::search_by_name` with fields `prefix`
/// and `limit`.
#[tracing::instrument(name = "entra::groups::search_by_name", skip(client))]
pub async fn search_by_name(
    client: &DirectoryClient,
    prefix: &str,
    limit: usize,
) -> DirectoryResult<Vec<Group>> {
    let context = OperationContext::new(FAMILY, "search_by_name");
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(DirectoryError::validation("group name prefix must not be empty")).context(context);
    }

    let options = ListOptions::new()
        .filter(format!("startswith(displayName,{})", odata_literal(prefix)))
        .limit(limit);
    let groups = pagination::collect_all(list(client, options))
        .await
        .context(context)?;

    tracing::debug!(count = groups.len(), "groups found");
    Ok(groups)
}

/// Create a group. Creates a security group unless told otherwise.
///
/// # Tracing
///
/// Emits a span named `entra::groups::create`.
#[tracing::instrument(name = "entra::groups::create", skip(client, properties))]
pub async fn create(client: &DirectoryClient, properties: &PropertyMap) -> DirectoryResult<Group> {
    tracing::debug!("creating group");
    let (group, _) = entity::create::<Group>(client, FAMILY, properties).await?;
    tracing::debug!(group_id = %group.id, "group created");
    Ok(group)
}

/// Update a group's properties.
#[tracing::instrument(name = "entra::groups::update", skip(client, properties), fields(group_id = %group_id))]
pub async fn update(client: &DirectoryClient, group_id: &str, properties: &PropertyMap) -> DirectoryResult<()> {
    entity::update(client, FAMILY, group_id, properties).await.map(|_| ())
}

/// Delete a group.
#[tracing::instrument(name = "entra::groups::delete", skip(client), fields(group_id = %group_id))]
pub async fn delete(client: &DirectoryClient, group_id: &str) -> DirectoryResult<()> {
    entity::delete(client, FAMILY, group_id).await
}

/// Direct members of a group. Members may be users, devices, service
/// principals or other groups.
///
/// # Tracing
///
/// Emits a span named `entra::groups::members` with field `group_id`.
#[tracing::instrument(name = "entra::groups::members", skip(client, options), fields(group_id = %group_id))]
pub fn members(client: &DirectoryClient, group_id: &str, options: ListOptions) -> EntityStream<DirectoryObject> {
    let path = format!("{}/members", item_path(FAMILY, group_id.trim()));
    pagination::list(client, options.into_request(path))
}

/// Add a member. Returns `false` when it already was one.
///
/// # Tracing
///
/// Emits a span named `entra::groups::add_member` with fields `group_id`
/// and `member_id`.
#[tracing::instrument(
    name = "entra::groups::add_member",
    skip(client, member),
    fields(group_id = %group_id, member_id = tracing::field::Empty)
)]
pub async fn add_member(
    client: &DirectoryClient,
    group_id: &str,
    member: impl Into<EntityRef>,
) -> DirectoryResult<bool> {
    let context = OperationContext::new(FAMILY, "add_member").with_id(group_id);
    let group_id = require_id(FAMILY, group_id).context(context.clone())?;
    let member_id = require_id(EntityFamily::User, member.into().id()).context(context.clone())?;
    tracing::Span::current().record("member_id", member_id.as_str());

    let body = json!({
        "@odata.id": format!("{}directoryObjects/{}", client.endpoint(), escape_segment(&member_id)),
    });
    // Re-adding is harmless, so the request may be retried like a read.
    let request = GraphRequest::post(format!("{}/members/$ref", item_path(FAMILY, &group_id)), body)
        .idempotency(Idempotency::Idempotent);

    match client.execute(request).await {
        Ok(_) => {
            tracing::debug!("member added");
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::Conflict => {
            tracing::debug!("already a member");
            Ok(false)
        }
        Err(err) => Err(err).context(context),
    }
}

/// Remove a member. Returns `false` when it was not a member.
///
/// # Tracing
///
/// Emits a span named `entra::groups::remove_member` with fields `group_id`
/// and `member_id`.
#[tracing::instrument(name = "entra::groups::remove_member", skip(client), fields(group_id = %group_id, member_id = %member_id))]
pub async fn remove_member(client: &DirectoryClient, group_id: &str, member_id: &str) -> DirectoryResult<bool> {
    let context = OperationContext::new(FAMILY, "remove_member").with_id(group_id);
    let group_id = require_id(FAMILY, group_id).context(context.clone())?;
    let member_id = require_id(EntityFamily::User, member_id).context(context.clone())?;

    let path = format!(
        "{}/members/{}/$ref",
        item_path(FAMILY, &group_id),
        escape_segment(&member_id)
    );
    match client.execute(GraphRequest::delete(path)).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            // Distinguish "not a member" from "no such group".
            let probe = GraphRequest::get(item_path(FAMILY, &group_id)).query("$select", "id");
            client.execute(probe).await.context(context)?;
            Ok(false)
        }
        Err(err) => Err(err).context(context),
    }
}
