//! User lifecycle and relationships.
//!
//! ## Example
//!
//! ```rust,no_run
//! use entra_admin_core::client::DirectoryClient;
//! use entra_admin_directory::users::{self, UserCreateRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DirectoryClient::from_env()?;
//!
//! let request = UserCreateRequest::builder()
//!     .display_name("Ada Lovelace")
//!     .user_principal_name("ada@contoso.com")
//!     .usage_location("GB")
//!     .build()?;
//!
//! let created = users::create(&client, request.properties()).await?;
//! users::set_manager(&client, &created.user.id, "manager-id").await?;
//! users::disable(&client, &created.user.id).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use entra_admin_core::client::{escape_segment, DirectoryClient, GraphRequest};
use entra_admin_core::error::{
    DirectoryError, DirectoryResult, ErrorKind, OperationContext, ResultExt,
};
use entra_admin_core::models::{DirectoryObject, EntityFamily, EntityRef, PropertyMap};
use entra_admin_core::pagination::{self, EntityStream, ListRequest};
use entra_admin_core::validation::{ManagerChange, Validator};
use futures::TryStreamExt;
use secrecy::SecretString;
use serde_json::{json, Value};

use crate::bulk::{self, BulkOptions, BulkReport};
use crate::entity::{self, item_path, require_id, ListOptions};
use crate::models::{DirectoryRole, Group, PrivilegedUser, User};

const FAMILY: EntityFamily = EntityFamily::User;

/// Properties matched by [`search`].
const SEARCH_FIELDS: &[&str] = &[
    "displayName",
    "mail",
    "userPrincipalName",
    "givenName",
    "surname",
    "otherMails",
];

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Properties for a new user.
///
/// The builder checks presence only; formats are checked by the client's
/// validator when the request is sent.
///
/// ```rust
/// use entra_admin_directory::users::UserCreateRequest;
///
/// let request = UserCreateRequest::builder()
///     .display_name("Ada Lovelace")
///     .user_principal_name("ada@contoso.com")
///     .property("department", "Engineering")
///     .build()
///     .expect("valid request");
/// assert_eq!(request.properties()["department"], "Engineering");
/// ```
#[derive(Debug, Clone)]
pub struct UserCreateRequest {
    properties: PropertyMap,
}

impl UserCreateRequest {
    pub fn builder() -> UserCreateRequestBuilder {
        UserCreateRequestBuilder::default()
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn into_properties(self) -> PropertyMap {
        self.properties
    }
}

/// Builder for [`UserCreateRequest`].
#[derive(Debug, Default)]
pub struct UserCreateRequestBuilder {
    properties: PropertyMap,
}

impl UserCreateRequestBuilder {
    /// **Required.**
    pub fn display_name(self, name: impl Into<String>) -> Self {
        self.property("displayName", name.into())
    }

    /// **Required.** Must use one of the tenant's accepted domains.
    pub fn user_principal_name(self, upn: impl Into<String>) -> Self {
        self.property("userPrincipalName", upn.into())
    }

    /// Initial password. A random one is generated when omitted.
    pub fn password(self, password: impl Into<String>) -> Self {
        self.property("password", password.into())
    }

    pub fn force_change_password(self, force: bool) -> Self {
        self.property("forceChangePasswordNextSignIn", force)
    }

    pub fn mail_nickname(self, nickname: impl Into<String>) -> Self {
        self.property("mailNickname", nickname.into())
    }

    /// Two-letter country code; required before licences can be assigned.
    pub fn usage_location(self, code: impl Into<String>) -> Self {
        self.property("usageLocation", code.into())
    }

    pub fn job_title(self, title: impl Into<String>) -> Self {
        self.property("jobTitle", title.into())
    }

    pub fn department(self, department: impl Into<String>) -> Self {
        self.property("department", department.into())
    }

    pub fn account_enabled(self, enabled: bool) -> Self {
        self.property("accountEnabled", enabled)
    }

    /// Manager to assign once the user exists.
    pub fn manager(self, manager_id: impl Into<String>) -> Self {
        self.property("manager", manager_id.into())
    }

    /// Any other property, including tenant extension attributes.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> DirectoryResult<UserCreateRequest> {
        for required in ["displayName", "userPrincipalName"] {
            let present = self
                .properties
                .get(required)
                .and_then(Value::as_str)
                .is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(DirectoryError::validation(format!("{required} is required")));
            }
        }
        Ok(UserCreateRequest {
            properties: self.properties,
        })
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Result of [`create`].
#[derive(Debug)]
pub struct CreatedUser {
    pub user: User,
    /// The initial password, when none was supplied and one was generated.
    pub generated_password: Option<SecretString>,
    /// Why the requested manager could not be assigned. The user exists
    /// either way; retry with [`set_manager`].
    pub manager_error: Option<DirectoryError>,
}

// ---------------------------------------------------------------------------
// API functions
// ---------------------------------------------------------------------------

/// List users lazily.
///
/// # Tracing
///
/// Emits a span named `entra::users::list`.
#[tracing::instrument(name = "entra::users::list", skip(client, options))]
pub fn list(client: &DirectoryClient, options: ListOptions) -> EntityStream<User> {
    tracing::debug!(limit = ?options.item_limit(), "listing users");
    entity::list(client, FAMILY, options)
}

/// Search users by name, mail or principal name.
///
/// Matches `query` as a token prefix across display name, given name,
/// surname, mail, other mails and principal name. Returns at most `limit`
/// users.
///
/// # Tracing
///
/// Emits a span named `entra::users::search` with fields `query` and `limit`.
#[tracing::instrument(name = "entra::users::search", skip(client))]
pub async fn search(client: &DirectoryClient, query: &str, limit: usize) -> DirectoryResult<Vec<User>> {
    let context = OperationContext::new(FAMILY, "search");
    let term = query.trim().replace('"', "");
    if term.is_empty() {
        return Err(DirectoryError::validation("search query must not be empty")).context(context);
    }

    let expression = SEARCH_FIELDS
        .iter()
        .map(|field| format!("\"{field}:{term}\""))
        .collect::<Vec<_>>()
        .join(" OR ");

    let users = pagination::collect_all(list(client, ListOptions::new().search(expression).limit(limit)))
        .await
        .context(context)?;

    tracing::debug!(count = users.len(), "users found");
    Ok(users)
}

/// Get a user by id.
///
/// # Tracing
///
/// Emits a span named `entra::users::get` with field `user_id`.
#[tracing::instrument(name = "entra::users::get", skip(client), fields(user_id = %user_id))]
pub async fn get(client: &DirectoryClient, user_id: &str) -> DirectoryResult<User> {
    tracing::debug!("getting user");
    entity::get(client, FAMILY, user_id).await
}

/// Get a user by principal name.
///
/// Only the syntax of `upn` is checked; lookups are not restricted to the
/// accepted domains, so guests can be found.
#[tracing::instrument(name = "entra::users::get_by_principal_name", skip(client), fields(upn = %upn))]
pub async fn get_by_principal_name(client: &DirectoryClient, upn: &str) -> DirectoryResult<User> {
    let context = OperationContext::new(FAMILY, "get_by_principal_name").with_id(upn);
    let upn = Validator::default().principal_name(upn).context(context.clone())?;

    client
        .execute_json(GraphRequest::get(item_path(FAMILY, &upn)))
        .await
        .context(context)
}

/// Create a user.
///
/// The payload is validated locally first; see
/// [`Validator`](entra_admin_core::validation::Validator) for the defaults
/// applied. A `manager` property is assigned after the user exists; if that
/// fails the user is still returned, with the failure in
/// [`CreatedUser::manager_error`].
///
/// A duplicate principal name surfaces as
/// [`ErrorKind::Conflict`]. A create whose outcome is unknown (timeout after
/// sending) surfaces as [`ErrorKind::ConflictPossible`]; look the user up by
/// principal name before retrying.
///
/// # Tracing
///
/// Emits a span named `entra::users::create`.
#[tracing::instrument(name = "entra::users::create", skip(client, properties))]
pub async fn create(client: &DirectoryClient, properties: &PropertyMap) -> DirectoryResult<CreatedUser> {
    tracing::debug!("creating user");

    let (user, normalized) = entity::create::<User>(client, FAMILY, properties).await?;
    tracing::debug!(user_id = %user.id, "user created");

    let mut manager_error = None;
    if let Some(ManagerChange::Set(manager)) = &normalized.references.manager {
        if let Err(err) = set_manager(client, &user.id, manager.as_str()).await {
            tracing::warn!(user_id = %user.id, error = %err, "user created without manager");
            manager_error = Some(err);
        }
    }

    Ok(CreatedUser {
        user,
        generated_password: normalized.generated_password,
        manager_error,
    })
}

/// Update a user.
///
/// Besides regular properties this accepts `manager` (an id, `{ "id": .. }`
/// or null to remove), `enable`/`disable` and `password`.
///
/// # Tracing
///
/// Emits a span named `entra::users::update` with field `user_id`.
#[tracing::instrument(name = "entra::users::update", skip(client, properties), fields(user_id = %user_id))]
pub async fn update(client: &DirectoryClient, user_id: &str, properties: &PropertyMap) -> DirectoryResult<()> {
    tracing::debug!("updating user");

    let normalized = entity::update(client, FAMILY, user_id, properties).await?;
    match normalized.references.manager {
        Some(ManagerChange::Set(manager)) => set_manager(client, user_id, manager.as_str()).await?,
        Some(ManagerChange::Remove) => {
            remove_manager(client, user_id).await?;
        }
        None => {}
    }
    Ok(())
}

/// Delete a user. Deleted users stay restorable for 30 days.
#[tracing::instrument(name = "entra::users::delete", skip(client), fields(user_id = %user_id))]
pub async fn delete(client: &DirectoryClient, user_id: &str) -> DirectoryResult<()> {
    tracing::debug!("deleting user");
    entity::delete(client, FAMILY, user_id).await
}

/// Enable sign-in. Returns `false` when the account was already enabled.
///
/// # Tracing
///
/// Emits a span named `entra::users::enable` with field `user_id`.
#[tracing::instrument(name = "entra::users::enable", skip(client), fields(user_id = %user_id))]
pub async fn enable(client: &DirectoryClient, user_id: &str) -> DirectoryResult<bool> {
    entity::set_account_enabled(client, FAMILY, user_id, true).await
}

/// Block sign-in. Returns `false` when the account was already disabled.
///
/// # Tracing
///
/// Emits a span named `entra::users::disable` with field `user_id`.
#[tracing::instrument(name = "entra::users::disable", skip(client), fields(user_id = %user_id))]
pub async fn disable(client: &DirectoryClient, user_id: &str) -> DirectoryResult<bool> {
    entity::set_account_enabled(client, FAMILY, user_id, false).await
}

/// Point a user's manager reference at `manager`.
///
/// The last write wins. Managing oneself and direct two-person cycles are
/// rejected; longer cycles are not detected. Either side may be given as a
/// principal name.
///
/// # Tracing
///
/// Emits a span named `entra::users::set_manager` with fields `user_id` and
/// `manager_id`.
#[tracing::instrument(
    name = "entra::users::set_manager",
    skip(client, manager),
    fields(user_id = %user_id, manager_id = tracing::field::Empty)
)]
pub async fn set_manager(
    client: &DirectoryClient,
    user_id: &str,
    manager: impl Into<EntityRef>,
) -> DirectoryResult<()> {
    let manager = manager.into();
    let context = OperationContext::new(FAMILY, "set_manager").with_id(user_id);

    let user_id = resolve_user_id(client, user_id).await.context(context.clone())?;
    let manager_id = resolve_user_id(client, manager.id()).await.context(context.clone())?;
    tracing::Span::current().record("manager_id", manager_id.as_str());

    if user_id.eq_ignore_ascii_case(&manager_id) {
        return Err(DirectoryError::validation("a user cannot be their own manager")).context(context);
    }

    match manager_of(client, &manager_id).await {
        Ok(Some(grand_manager)) if grand_manager.id.eq_ignore_ascii_case(&user_id) => {
            return Err(DirectoryError::validation(format!(
                "{manager_id} is managed by {user_id}; assigning would create a cycle"
            )))
            .context(context);
        }
        Ok(_) => {}
        Err(err) => return Err(err).context(context),
    }

    let body = json!({
        "@odata.id": format!("{}directoryObjects/{}", client.endpoint(), escape_segment(&manager_id)),
    });
    client
        .execute(GraphRequest::put(
            format!("{}/manager/$ref", item_path(FAMILY, &user_id)),
            body,
        ))
        .await
        .context(context)?;

    tracing::debug!("manager assigned");
    Ok(())
}

/// Clear a user's manager reference.
///
/// Succeeds without a change (returning `false`) when the user has no
/// manager. Fails with [`ErrorKind::NotFound`] when the user does not exist.
///
/// # Tracing
///
/// Emits a span named `entra::users::remove_manager` with field `user_id`.
#[tracing::instrument(name = "entra::users::remove_manager", skip(client), fields(user_id = %user_id))]
pub async fn remove_manager(client: &DirectoryClient, user_id: &str) -> DirectoryResult<bool> {
    let context = OperationContext::new(FAMILY, "remove_manager").with_id(user_id);
    let id = require_id(FAMILY, user_id).context(context.clone())?;

    let result = client
        .execute(GraphRequest::delete(format!("{}/manager/$ref", item_path(FAMILY, &id))))
        .await;

    match result {
        Ok(_) => {
            tracing::debug!("manager removed");
            Ok(true)
        }
        // The service answers 404 both for "no manager" and "no such user".
        Err(err) if err.kind() == ErrorKind::NotFound => {
            ensure_exists(client, &id).await.context(context)?;
            tracing::debug!("user has no manager");
            Ok(false)
        }
        Err(err) => Err(err).context(context),
    }
}

/// The user's manager, or `None` when none is assigned.
///
/// # Tracing
///
/// Emits a span named `entra::users::get_manager` with field `user_id`.
#[tracing::instrument(name = "entra::users::get_manager", skip(client), fields(user_id = %user_id))]
pub async fn get_manager(client: &DirectoryClient, user_id: &str) -> DirectoryResult<Option<DirectoryObject>> {
    let context = OperationContext::new(FAMILY, "get_manager").with_id(user_id);
    let id = require_id(FAMILY, user_id).context(context.clone())?;

    let manager = manager_of(client, &id).await.context(context.clone())?;
    if manager.is_none() {
        ensure_exists(client, &id).await.context(context)?;
    }
    Ok(manager)
}

/// Groups the user belongs to, directly or through nested groups.
///
/// # Tracing
///
/// Emits a span named `entra::users::groups` with field `user_id`.
#[tracing::instrument(name = "entra::users::groups", skip(client, options), fields(user_id = %user_id))]
pub fn groups(client: &DirectoryClient, user_id: &str, options: ListOptions) -> EntityStream<Group> {
    let path = format!(
        "{}/transitiveMemberOf/microsoft.graph.group",
        item_path(FAMILY, user_id.trim())
    );
    pagination::list(client, options.into_request(path))
}

/// Directory roles held by the user.
///
/// # Tracing
///
/// Emits a span named `entra::users::roles` with field `user_id`.
#[tracing::instrument(name = "entra::users::roles", skip(client), fields(user_id = %user_id))]
pub async fn roles(client: &DirectoryClient, user_id: &str) -> DirectoryResult<Vec<DirectoryRole>> {
    let context = OperationContext::new(FAMILY, "roles").with_id(user_id);
    let id = require_id(FAMILY, user_id).context(context.clone())?;

    let path = format!("{}/memberOf/microsoft.graph.directoryRole", item_path(FAMILY, &id));
    pagination::collect_all(pagination::list(client, ListRequest::new(path)))
        .await
        .context(context)
}

/// Every user holding an activated directory role.
///
/// Users appear once, with the names of all their roles. Non-user role
/// holders (groups, service principals) are skipped.
///
/// # Tracing
///
/// Emits a span named `entra::users::privileged_users`.
#[tracing::instrument(name = "entra::users::privileged_users", skip(client))]
pub async fn privileged_users(client: &DirectoryClient) -> DirectoryResult<Vec<PrivilegedUser>> {
    let context = OperationContext::new(FAMILY, "privileged_users");

    let roles: Vec<DirectoryRole> =
        pagination::collect_all(pagination::list(client, ListRequest::new("directoryRoles")))
            .await
            .context(context.clone())?;

    let mut users: Vec<PrivilegedUser> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for role in roles {
        let role_name = role.display_name.clone().unwrap_or_else(|| role.id.clone());
        let path = format!("directoryRoles/{}/members", escape_segment(&role.id));
        let mut members = pagination::list::<DirectoryObject>(client, ListRequest::new(path));

        while let Some(member) = members.try_next().await.context(context.clone())? {
            if !member.is_type("user") {
                continue;
            }
            let slot = *index.entry(member.id.clone()).or_insert_with(|| {
                users.push(PrivilegedUser {
                    id: member.id.clone(),
                    display_name: member.str_property("displayName").map(String::from),
                    user_principal_name: member.str_property("userPrincipalName").map(String::from),
                    mail: member.str_property("mail").map(String::from),
                    job_title: member.str_property("jobTitle").map(String::from),
                    roles: Vec::new(),
                });
                users.len() - 1
            });
            if !users[slot].roles.contains(&role_name) {
                users[slot].roles.push(role_name.clone());
            }
        }
    }

    tracing::debug!(count = users.len(), "privileged users collected");
    Ok(users)
}

/// Disable every user matching `options`.
///
/// # Tracing
///
/// Emits a span named `entra::users::disable_matching`.
#[tracing::instrument(name = "entra::users::disable_matching", skip_all)]
pub async fn disable_matching(
    client: &DirectoryClient,
    options: ListOptions,
    bulk_options: BulkOptions,
) -> DirectoryResult<BulkReport> {
    let matches = list(client, options);
    bulk::run(client, matches, bulk_options, |client, user: User| async move {
        disable(&client, &user.id).await.map(|_| ())
    })
    .await
}

/// Enable every user matching `options`.
///
/// # Tracing
///
/// Emits a span named `entra::users::enable_matching`.
#[tracing::instrument(name = "entra::users::enable_matching", skip_all)]
pub async fn enable_matching(
    client: &DirectoryClient,
    options: ListOptions,
    bulk_options: BulkOptions,
) -> DirectoryResult<BulkReport> {
    let matches = list(client, options);
    bulk::run(client, matches, bulk_options, |client, user: User| async move {
        enable(&client, &user.id).await.map(|_| ())
    })
    .await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn resolve_user_id(client: &DirectoryClient, reference: &str) -> DirectoryResult<String> {
    if reference.contains('@') {
        Ok(get_by_principal_name(client, reference).await?.id)
    } else {
        require_id(FAMILY, reference)
    }
}

async fn manager_of(client: &DirectoryClient, user_id: &str) -> DirectoryResult<Option<DirectoryObject>> {
    let request = GraphRequest::get(format!("{}/manager", item_path(FAMILY, user_id)))
        .query("$select", "id,displayName,userPrincipalName");
    match client.execute_json::<DirectoryObject>(request).await {
        Ok(manager) => Ok(Some(manager)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

async fn ensure_exists(client: &DirectoryClient, user_id: &str) -> DirectoryResult<()> {
    let request = GraphRequest::get(item_path(FAMILY, user_id)).query("$select", "id");
    client.execute(request).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{odata_error, odata_page, setup_mock_client, test_user};
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn props(value: Value) -> PropertyMap {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn builder_requires_principal_name() {
        let err = UserCreateRequest::builder()
            .display_name("Ada")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("userPrincipalName"));
    }

    #[tokio::test]
    async fn create_then_get_returns_normalized_properties() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;
        let stored: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));

        let on_create = Arc::clone(&stored);
        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(move |req: &wiremock::Request| {
                let mut body: Value = serde_json::from_slice(&req.body).unwrap();
                body["id"] = json!("u-new");
                body.as_object_mut().unwrap().remove("passwordProfile");
                *on_create.lock().unwrap() = Some(body.clone());
                ResponseTemplate::new(201).set_body_json(body)
            })
            .expect(1)
            .mount(&server)
            .await;

        let on_get = Arc::clone(&stored);
        Mock::given(method("GET"))
            .and(path("/users/u-new"))
            .respond_with(move |_req: &wiremock::Request| {
                let body = on_get.lock().unwrap().clone().unwrap();
                ResponseTemplate::new(200).set_body_json(body)
            })
            .mount(&server)
            .await;

        let request = UserCreateRequest::builder()
            .display_name(" Ada Lovelace ")
            .user_principal_name("Ada@Contoso.com")
            .usage_location("gb")
            .department("Engineering")
            .build()
            .unwrap();

        let created = create(&client, request.properties()).await.unwrap();
        assert!(created.generated_password.is_some());

        let fetched = get(&client, &created.user.id).await.unwrap();
        assert_eq!(fetched, created.user);
        assert_eq!(fetched.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(fetched.user_principal_name.as_deref(), Some("ada@contoso.com"));
        assert_eq!(fetched.mail_nickname.as_deref(), Some("ada"));
        assert_eq!(fetched.usage_location.as_deref(), Some("GB"));
        assert_eq!(fetched.account_enabled, Some(true));
        assert_eq!(fetched.department.as_deref(), Some("Engineering"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failed_manager_assignment_keeps_created_user() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(201).set_body_json(test_user("u-new", "ada")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/m-gone/manager"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(odata_error("Request_ResourceNotFound", "no manager")),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/users/u-new/manager/$ref"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(odata_error("Request_ResourceNotFound", "m-gone")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let created = create(
            &client,
            &props(json!({
                "displayName": "Ada Lovelace",
                "userPrincipalName": "ada@contoso.com",
                "manager": "m-gone",
            })),
        )
        .await
        .unwrap();

        assert_eq!(created.user.id, "u-new");
        assert!(created.generated_password.is_some());
        let err = created.manager_error.expect("manager failure reported");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.context().unwrap().operation, "set_manager");
        assert!(logs_contain("user created without manager"));
    }

    #[tokio::test]
    async fn invalid_create_sends_no_requests() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        let err = create(
            &client,
            &props(json!({"displayName": "Ada", "userPrincipalName": "not-an-address"})),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.context().map(|c| c.operation), Some("create"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_principal_name_is_a_conflict() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(400).set_body_json(odata_error(
                "Request_BadRequest",
                "Another object with the same value for property userPrincipalName already exists.",
            )))
            .mount(&server)
            .await;

        let err = create(
            &client,
            &props(json!({"displayName": "Ada", "userPrincipalName": "ada@contoso.com"})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn disable_twice_patches_once() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;
        let disabled = Arc::new(Mutex::new(false));

        let read_state = Arc::clone(&disabled);
        Mock::given(method("GET"))
            .and(path("/users/u-1"))
            .respond_with(move |_req: &wiremock::Request| {
                let enabled = !*read_state.lock().unwrap();
                ResponseTemplate::new(200).set_body_json(json!({"id": "u-1", "accountEnabled": enabled}))
            })
            .mount(&server)
            .await;

        let write_state = Arc::clone(&disabled);
        Mock::given(method("PATCH"))
            .and(path("/users/u-1"))
            .and(body_json(json!({"accountEnabled": false})))
            .respond_with(move |_req: &wiremock::Request| {
                *write_state.lock().unwrap() = true;
                ResponseTemplate::new(204)
            })
            .expect(1)
            .mount(&server)
            .await;

        assert!(disable(&client, "u-1").await.unwrap());
        assert!(!disable(&client, "u-1").await.unwrap());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_disable_emits_span() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/users/u-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u-1", "accountEnabled": false})))
            .mount(&server)
            .await;

        let _ = disable(&client, "u-1").await;
        assert!(logs_contain("entra::users::disable"));
        assert!(logs_contain("account already in requested state"));
    }

    #[tokio::test]
    async fn enable_already_enabled_is_a_no_op() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/users/u-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_user("u-1", "ada")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        assert!(!enable(&client, "u-1").await.unwrap());
    }

    #[tokio::test]
    async fn remove_manager_without_manager_succeeds() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/users/u-1/manager/$ref"))
            .respond_with(ResponseTemplate::new(404).set_body_json(odata_error(
                "Request_ResourceNotFound",
                "Resource 'manager' does not exist or one of its queried reference-property objects are not present.",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/u-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u-1"})))
            .mount(&server)
            .await;

        assert!(!remove_manager(&client, "u-1").await.unwrap());
    }

    #[tokio::test]
    async fn remove_manager_for_missing_user_is_not_found() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/users/ghost/manager/$ref"))
            .respond_with(ResponseTemplate::new(404).set_body_json(odata_error(
                "Request_ResourceNotFound",
                "Resource 'ghost' does not exist.",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(odata_error(
                "Request_ResourceNotFound",
                "Resource 'ghost' does not exist.",
            )))
            .mount(&server)
            .await;

        let err = remove_manager(&client, "ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.context().and_then(|c| c.id.as_deref()), Some("ghost"));
    }

    #[tokio::test]
    async fn self_management_is_rejected_locally() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        let err = set_manager(&client, "u-1", "u-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_cycle_is_rejected() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/users/m-1/manager"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u-1"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let err = set_manager(&client, "u-1", "m-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn set_manager_puts_reference() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/users/m-1/manager"))
            .respond_with(ResponseTemplate::new(404).set_body_json(odata_error(
                "Request_ResourceNotFound",
                "no manager",
            )))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/users/u-1/manager/$ref"))
            .and(body_json(json!({
                "@odata.id": format!("{}/directoryObjects/m-1", server.uri())
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        set_manager(&client, "u-1", "m-1").await.unwrap();
    }

    #[tokio::test]
    async fn update_with_only_manager_removal_skips_patch() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/users/u-1/manager/$ref"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        update(&client, "u-1", &props(json!({"manager": null}))).await.unwrap();
    }

    #[tokio::test]
    async fn update_patches_normalized_properties() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/users/u-1"))
            .and(body_json(json!({"jobTitle": "Engineer", "accountEnabled": false})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        update(
            &client,
            "u-1",
            &props(json!({"jobTitle": "  Engineer ", "disable": true})),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn lookup_by_principal_name_escapes_the_segment() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/users/ada%40contoso.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_user("u-1", "ada")))
            .expect(1)
            .mount(&server)
            .await;

        let user = get_by_principal_name(&client, "Ada@Contoso.com").await.unwrap();
        assert_eq!(user.id, "u-1");
    }

    #[tokio::test]
    async fn search_uses_eventual_consistency() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/users"))
            .and(header("ConsistencyLevel", "eventual"))
            .and(query_param("$top", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
                vec![test_user("u-1", "ada"), test_user("u-2", "adam"), test_user("u-3", "adele")],
                None,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let users = search(&client, "ad\"a", 2).await.unwrap();
        assert_eq!(users.len(), 2);

        let requests = server.received_requests().await.unwrap();
        let search_request = requests.iter().find(|r| r.url.path() == "/users").unwrap();
        let search_param = search_request
            .url
            .query_pairs()
            .find(|(k, _)| k == "$search")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(search_param.starts_with("\"displayName:ada\" OR \"mail:ada\""));
    }

    #[tokio::test]
    async fn privileged_users_are_deduplicated() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/directoryRoles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
                vec![
                    json!({"id": "r-1", "displayName": "Global Administrator"}),
                    json!({"id": "r-2", "displayName": "User Administrator"}),
                ],
                None,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/directoryRoles/r-1/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
                vec![
                    test_user("u-1", "ada"),
                    json!({"@odata.type": "#microsoft.graph.servicePrincipal", "id": "sp-1"}),
                ],
                None,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/directoryRoles/r-2/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
                vec![test_user("u-1", "ada"), test_user("u-2", "grace")],
                None,
            )))
            .mount(&server)
            .await;

        let users = privileged_users(&client).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, "u-1");
        assert_eq!(users[0].roles, vec!["Global Administrator", "User Administrator"]);
        assert_eq!(users[1].user_principal_name.as_deref(), Some("grace@contoso.com"));
    }

    #[tokio::test]
    async fn transitive_groups_are_listed() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/users/u-1/transitiveMemberOf/microsoft.graph.group"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
                vec![json!({"id": "g-1", "displayName": "Engineering"})],
                None,
            )))
            .mount(&server)
            .await;

        let groups = pagination::collect_all(groups(&client, "u-1", ListOptions::new()))
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].display_name.as_deref(), Some("Engineering"));
    }
}
