//! Single entry point for agent-issued operations.
//!
//! An [`OperationRequest`] names a family, an operation kind and its inputs;
//! [`perform`] routes it to the matching module function and returns the
//! result as JSON. Every error carries an
//! [`OperationContext`](entra_admin_core::error::OperationContext).
//!
//! Sign-in logs, audit logs, authentication methods and conditional access
//! are served by `entra_admin_security`, whose own `perform` falls back to
//! this one for the families here.
//!
//! ```rust,no_run
//! use entra_admin_core::client::DirectoryClient;
//! use entra_admin_core::models::{EntityFamily, OperationKind};
//! use entra_admin_directory::operation::{self, OperationRequest};
//!
//! # async fn example(client: &DirectoryClient) -> entra_admin_core::error::DirectoryResult<()> {
//! let request = OperationRequest::new(EntityFamily::User, OperationKind::Update)
//!     .target("ada@contoso.com")
//!     .property("jobTitle", "Principal Engineer");
//! let result = operation::perform(client, request).await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

use entra_admin_core::client::DirectoryClient;
use entra_admin_core::error::{DirectoryError, DirectoryResult, OperationContext, ResultExt};
use entra_admin_core::models::{EntityFamily, OperationKind, PropertyMap};
use entra_admin_core::pagination::{self, EntityStream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::entity::ListOptions;
use crate::{applications, devices, groups, service_principals, users};

/// Items returned by a list operation when the request sets no limit.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// The relationship a [`OperationKind::RelationshipChange`] acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relationship {
    /// A user's manager.
    Manager,
    /// A group's members.
    Member,
}

/// One operation against the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub family: EntityFamily,
    pub kind: OperationKind,
    #[serde(default)]
    pub properties: PropertyMap,
    /// The entity acted on; required for everything but create and list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Relationship>,
    /// The other end of the relationship.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    /// Remove the relationship instead of establishing it.
    #[serde(default)]
    pub detach: bool,
    /// `$filter` for list operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Maximum items for list operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl OperationRequest {
    pub fn new(family: EntityFamily, kind: OperationKind) -> Self {
        Self {
            family,
            kind,
            properties: PropertyMap::new(),
            target_id: None,
            relationship: None,
            related_id: None,
            detach: false,
            filter: None,
            limit: None,
        }
    }

    pub fn target(mut self, id: impl Into<String>) -> Self {
        self.target_id = Some(id.into());
        self
    }

    pub fn properties(mut self, properties: PropertyMap) -> Self {
        self.properties = properties;
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Establish `relationship` with `related_id`.
    pub fn attach(mut self, relationship: Relationship, related_id: impl Into<String>) -> Self {
        self.relationship = Some(relationship);
        self.related_id = Some(related_id.into());
        self.detach = false;
        self
    }

    /// Remove `relationship`; `related_id` is needed for members only.
    pub fn detach(mut self, relationship: Relationship, related_id: Option<String>) -> Self {
        self.relationship = Some(relationship);
        self.related_id = related_id;
        self.detach = true;
        self
    }

    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(expression.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The context attached to errors from this request.
    pub fn context(&self) -> OperationContext {
        let context = OperationContext::new(self.family, kind_label(self.kind));
        match &self.target_id {
            Some(id) => context.with_id(id.clone()),
            None => context,
        }
    }

    /// The target id, or a validation error naming the operation.
    pub fn require_target(&self) -> DirectoryResult<&str> {
        self.target_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                DirectoryError::validation(format!(
                    "{} on {} requires a target id",
                    kind_label(self.kind),
                    self.family
                ))
            })
    }

    /// Listing options derived from `filter` and `limit`.
    pub fn list_options(&self) -> ListOptions {
        let mut options = ListOptions::new().limit(self.limit.unwrap_or(DEFAULT_LIST_LIMIT));
        if let Some(filter) = &self.filter {
            options = options.filter(filter.clone());
        }
        options
    }
}

/// Operation names used in error contexts.
pub fn kind_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Create => "create",
        OperationKind::Read => "read",
        OperationKind::Update => "update",
        OperationKind::Delete => "delete",
        OperationKind::List => "list",
        OperationKind::RelationshipChange => "relationship_change",
    }
}

/// Perform `request` and return its result as JSON.
///
/// Writes without a natural result return `{"id": .., "status": ..}`.
///
/// # Tracing
///
/// Emits a span named `entra::operation::perform` with fields `family` and
/// `kind`.
#[tracing::instrument(
    name = "entra::operation::perform",
    skip(client, request),
    fields(family = %request.family, kind = kind_label(request.kind))
)]
pub async fn perform(client: &DirectoryClient, request: OperationRequest) -> DirectoryResult<Value> {
    let context = request.context();
    let result = match request.family {
        EntityFamily::User => perform_user(client, &request).await,
        EntityFamily::Group => perform_group(client, &request).await,
        EntityFamily::Application => perform_application(client, &request).await,
        EntityFamily::ServicePrincipal => perform_service_principal(client, &request).await,
        EntityFamily::Device => perform_device(client, &request).await,
        other => Err(DirectoryError::validation(format!(
            "{other} operations are not handled by the directory module"
        ))),
    };
    result.context(context)
}

async fn perform_user(client: &DirectoryClient, request: &OperationRequest) -> DirectoryResult<Value> {
    match request.kind {
        OperationKind::Create => {
            let created = users::create(client, &request.properties).await?;
            let mut body = to_json(&created.user)?;
            if created.generated_password.is_some() {
                body["initialPasswordGenerated"] = json!(true);
            }
            if let Some(err) = &created.manager_error {
                body["managerError"] = json!(err.to_string());
            }
            Ok(body)
        }
        OperationKind::Read => {
            let target = request.require_target()?;
            let user = if target.contains('@') {
                users::get_by_principal_name(client, target).await?
            } else {
                users::get(client, target).await?
            };
            to_json(&user)
        }
        OperationKind::Update => {
            let target = request.require_target()?;
            if let Some(enabled) = account_toggle(request) {
                let changed = if enabled {
                    users::enable(client, target).await?
                } else {
                    users::disable(client, target).await?
                };
                return Ok(toggle_status(target, enabled, changed));
            }
            users::update(client, target, &request.properties).await?;
            Ok(status(target, "updated"))
        }
        OperationKind::Delete => {
            let target = request.require_target()?;
            users::delete(client, target).await?;
            Ok(status(target, "deleted"))
        }
        OperationKind::List => collect_json(users::list(client, request.list_options())).await,
        OperationKind::RelationshipChange => {
            let target = request.require_target()?;
            match (request.relationship, request.detach) {
                (Some(Relationship::Manager), false) => {
                    let manager = related(request)?;
                    users::set_manager(client, target, manager).await?;
                    Ok(status(target, "manager_set"))
                }
                (Some(Relationship::Manager), true) => {
                    let removed = users::remove_manager(client, target).await?;
                    Ok(status(target, if removed { "manager_removed" } else { "unchanged" }))
                }
                _ => Err(DirectoryError::validation(
                    "users support only the manager relationship",
                )),
            }
        }
    }
}

async fn perform_group(client: &DirectoryClient, request: &OperationRequest) -> DirectoryResult<Value> {
    match request.kind {
        OperationKind::Create => to_json(&groups::create(client, &request.properties).await?),
        OperationKind::Read => to_json(&groups::get(client, request.require_target()?).await?),
        OperationKind::Update => {
            let target = request.require_target()?;
            groups::update(client, target, &request.properties).await?;
            Ok(status(target, "updated"))
        }
        OperationKind::Delete => {
            let target = request.require_target()?;
            groups::delete(client, target).await?;
            Ok(status(target, "deleted"))
        }
        OperationKind::List => collect_json(groups::list(client, request.list_options())).await,
        OperationKind::RelationshipChange => {
            let target = request.require_target()?;
            if request.relationship != Some(Relationship::Member) {
                return Err(DirectoryError::validation(
                    "groups support only the member relationship",
                ));
            }
            let member = related(request)?;
            let changed = if request.detach {
                groups::remove_member(client, target, member).await?
            } else {
                groups::add_member(client, target, member).await?
            };
            let outcome = match (changed, request.detach) {
                (false, _) => "unchanged",
                (true, false) => "member_added",
                (true, true) => "member_removed",
            };
            Ok(status(target, outcome))
        }
    }
}

async fn perform_application(client: &DirectoryClient, request: &OperationRequest) -> DirectoryResult<Value> {
    match request.kind {
        OperationKind::Create => to_json(&applications::create(client, &request.properties).await?),
        OperationKind::Read => to_json(&applications::get(client, request.require_target()?).await?),
        OperationKind::Update => {
            let target = request.require_target()?;
            applications::update(client, target, &request.properties).await?;
            Ok(status(target, "updated"))
        }
        OperationKind::Delete => {
            let target = request.require_target()?;
            applications::delete(client, target).await?;
            Ok(status(target, "deleted"))
        }
        OperationKind::List => collect_json(applications::list(client, request.list_options())).await,
        OperationKind::RelationshipChange => Err(no_relationships(request.family)),
    }
}

async fn perform_service_principal(
    client: &DirectoryClient,
    request: &OperationRequest,
) -> DirectoryResult<Value> {
    match request.kind {
        OperationKind::Create => to_json(&service_principals::create(client, &request.properties).await?),
        // Without a target, an `appId` property selects the principal by application.
        OperationKind::Read => {
            let sp = match (&request.target_id, request.properties.get("appId").and_then(Value::as_str)) {
                (None, Some(app_id)) => service_principals::get_by_app_id(client, app_id).await?,
                _ => service_principals::get(client, request.require_target()?).await?,
            };
            to_json(&sp)
        }
        OperationKind::Update => {
            let target = request.require_target()?;
            service_principals::update(client, target, &request.properties).await?;
            Ok(status(target, "updated"))
        }
        OperationKind::Delete => {
            let target = request.require_target()?;
            service_principals::delete(client, target).await?;
            Ok(status(target, "deleted"))
        }
        OperationKind::List => collect_json(service_principals::list(client, request.list_options())).await,
        OperationKind::RelationshipChange => Err(no_relationships(request.family)),
    }
}

async fn perform_device(client: &DirectoryClient, request: &OperationRequest) -> DirectoryResult<Value> {
    match request.kind {
        OperationKind::Create => Err(DirectoryError::validation("devices cannot be created")),
        OperationKind::Read => to_json(&devices::get(client, request.require_target()?).await?),
        OperationKind::Update => {
            let target = request.require_target()?;
            if let Some(enabled) = account_toggle(request) {
                let changed = if enabled {
                    devices::enable(client, target).await?
                } else {
                    devices::disable(client, target).await?
                };
                return Ok(toggle_status(target, enabled, changed));
            }
            devices::update(client, target, &request.properties).await?;
            Ok(status(target, "updated"))
        }
        OperationKind::Delete => {
            let target = request.require_target()?;
            devices::delete(client, target).await?;
            Ok(status(target, "deleted"))
        }
        OperationKind::List => collect_json(devices::list(client, request.list_options())).await,
        OperationKind::RelationshipChange => Err(no_relationships(request.family)),
    }
}

fn related(request: &OperationRequest) -> DirectoryResult<&str> {
    request
        .related_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DirectoryError::validation("relationship change requires a related id"))
}

/// The requested sign-in state when the update changes nothing else.
///
/// Accepts a lone boolean `accountEnabled`, `enable` or `disable`.
fn account_toggle(request: &OperationRequest) -> Option<bool> {
    if request.properties.len() != 1 {
        return None;
    }
    let (key, value) = request.properties.iter().next()?;
    let flag = value.as_bool()?;
    match key.as_str() {
        "accountEnabled" | "enable" => Some(flag),
        "disable" => Some(!flag),
        _ => None,
    }
}

fn toggle_status(id: &str, enabled: bool, changed: bool) -> Value {
    match (changed, enabled) {
        (false, _) => status(id, "unchanged"),
        (true, true) => status(id, "enabled"),
        (true, false) => status(id, "disabled"),
    }
}

fn no_relationships(family: EntityFamily) -> DirectoryError {
    DirectoryError::validation(format!("{family} entities have no editable relationships"))
}

fn status(id: &str, status: &str) -> Value {
    json!({ "id": id, "status": status })
}

fn to_json<T: Serialize>(value: &T) -> DirectoryResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Drain a listing into a JSON array.
pub async fn collect_json<T: Serialize>(stream: EntityStream<T>) -> DirectoryResult<Value> {
    let items = pagination::collect_all(stream).await?;
    Ok(Value::Array(
        items
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?,
    ))
}
