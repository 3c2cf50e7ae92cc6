//! Family-generic entity operations shared by the resource modules.
//!
//! Every write passes through the client's validator first, so a rejected
//! payload never produces a request. Errors leaving this module carry an
//! [`OperationContext`].

use entra_admin_core::client::{escape_segment, DirectoryClient, GraphRequest};
use entra_admin_core::error::{DirectoryError, DirectoryResult, OperationContext, ResultExt};
use entra_admin_core::models::{EntityFamily, OperationKind, ProgressHook, PropertyMap};
use entra_admin_core::pagination::{self, EntityStream, ListRequest};
use entra_admin_core::validation::NormalizedProperties;
use serde::de::DeserializeOwned;

/// Options for listing a collection.
///
/// ```rust
/// use entra_admin_directory::ListOptions;
///
/// let options = ListOptions::new()
///     .filter("accountEnabled eq false")
///     .limit(25);
/// assert_eq!(options.item_limit(), Some(25));
/// ```
#[derive(Clone, Default)]
pub struct ListOptions {
    filter: Option<String>,
    search: Option<String>,
    select: Option<Vec<String>>,
    order_by: Option<String>,
    page_size: Option<u32>,
    limit: Option<usize>,
    count: bool,
    progress: Option<ProgressHook>,
}

impl std::fmt::Debug for ListOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListOptions")
            .field("filter", &self.filter)
            .field("search", &self.search)
            .field("select", &self.select)
            .field("order_by", &self.order_by)
            .field("page_size", &self.page_size)
            .field("limit", &self.limit)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// OData `$filter` expression.
    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(expression.into());
        self
    }

    /// `$search` expression; switches the listing to eventual consistency.
    pub fn search(mut self, expression: impl Into<String>) -> Self {
        self.search = Some(expression.into());
        self
    }

    /// Restrict the returned properties.
    pub fn select(mut self, properties: &[&str]) -> Self {
        self.select = Some(properties.iter().map(|p| (*p).to_string()).collect());
        self
    }

    pub fn order_by(mut self, expression: impl Into<String>) -> Self {
        self.order_by = Some(expression.into());
        self
    }

    /// Items per page.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Stop after `limit` items; later pages are not fetched.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Request `$count=true`, needed by some advanced filters.
    pub fn count(mut self, enabled: bool) -> Self {
        self.count = enabled;
        self
    }

    /// Progress callback, invoked once per fetched page.
    pub fn progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    pub fn item_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Turn the options into a listing of `path`.
    pub fn into_request(self, path: impl Into<String>) -> ListRequest {
        let mut request = ListRequest::new(path);
        if let Some(filter) = self.filter {
            request = request.filter(filter);
        }
        if let Some(search) = self.search {
            request = request.search(search);
        }
        if let Some(select) = &self.select {
            let fields: Vec<&str> = select.iter().map(String::as_str).collect();
            request = request.select(&fields);
        }
        if let Some(order_by) = self.order_by {
            request = request.order_by(order_by);
        }
        if self.count {
            request = request.query("$count", "true").eventual_consistency(true);
        }
        if let Some(size) = self.page_size {
            request = request.page_size(size);
        }
        if let Some(limit) = self.limit {
            request = request.limit(limit);
        }
        if let Some(hook) = self.progress {
            request = request.progress(hook);
        }
        request
    }
}

/// Reject blank identifiers before they turn into collection paths.
pub(crate) fn require_id(family: EntityFamily, id: &str) -> DirectoryResult<String> {
    let id = id.trim();
    if id.is_empty() {
        return Err(DirectoryError::validation(format!("{family} id must not be empty")));
    }
    Ok(id.to_string())
}

/// Path of one entity, with the identifier escaped as a single segment.
pub(crate) fn item_path(family: EntityFamily, id: &str) -> String {
    family.item_path(&escape_segment(id))
}

/// Quote a value for an OData string literal.
pub(crate) fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn list<T>(client: &DirectoryClient, family: EntityFamily, options: ListOptions) -> EntityStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pagination::list(client, options.into_request(family.collection_path()))
}

pub(crate) async fn get<T: DeserializeOwned>(
    client: &DirectoryClient,
    family: EntityFamily,
    id: &str,
) -> DirectoryResult<T> {
    let context = OperationContext::new(family, "get").with_id(id);
    let id = require_id(family, id).context(context.clone())?;

    client
        .execute_json(GraphRequest::get(item_path(family, &id)))
        .await
        .context(context)
}

/// Validate and create; returns the created entity and the normalized input.
pub(crate) async fn create<T: DeserializeOwned>(
    client: &DirectoryClient,
    family: EntityFamily,
    properties: &PropertyMap,
) -> DirectoryResult<(T, NormalizedProperties)> {
    let context = OperationContext::new(family, "create");
    let normalized = client
        .validator()
        .validate(family, OperationKind::Create, properties)
        .context(context.clone())?;

    let request = GraphRequest::post(
        family.collection_path(),
        serde_json::Value::Object(normalized.payload()),
    );
    let created = client.execute_json(request).await.context(context)?;
    Ok((created, normalized))
}

/// Validate and patch. Skips the request when only references changed.
pub(crate) async fn update(
    client: &DirectoryClient,
    family: EntityFamily,
    id: &str,
    properties: &PropertyMap,
) -> DirectoryResult<NormalizedProperties> {
    let context = OperationContext::new(family, "update").with_id(id);
    let id = require_id(family, id).context(context.clone())?;
    let normalized = client
        .validator()
        .validate(family, OperationKind::Update, properties)
        .context(context.clone())?;

    if normalized.has_entity_changes() {
        client
            .execute(GraphRequest::patch(
                item_path(family, &id),
                serde_json::Value::Object(normalized.payload()),
            ))
            .await
            .context(context)?;
    }
    Ok(normalized)
}

pub(crate) async fn delete(
    client: &DirectoryClient,
    family: EntityFamily,
    id: &str,
) -> DirectoryResult<()> {
    let context = OperationContext::new(family, "delete").with_id(id);
    let id = require_id(family, id).context(context.clone())?;

    client
        .execute(GraphRequest::delete(item_path(family, &id)))
        .await
        .context(context)?;
    Ok(())
}

/// Bring `accountEnabled` to `enabled`, reading first so repeats are no-ops.
///
/// Returns `true` when a change was written.
pub(crate) async fn set_account_enabled(
    client: &DirectoryClient,
    family: EntityFamily,
    id: &str,
    enabled: bool,
) -> DirectoryResult<bool> {
    let operation = if enabled { "enable" } else { "disable" };
    let context = OperationContext::new(family, operation).with_id(id);
    let id = require_id(family, id).context(context.clone())?;
    let path = item_path(family, &id);

    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct AccountState {
        account_enabled: Option<bool>,
    }

    let current: AccountState = client
        .execute_json(GraphRequest::get(path.clone()).query("$select", "id,accountEnabled"))
        .await
        .context(context.clone())?;

    if current.account_enabled == Some(enabled) {
        tracing::debug!(id = %id, enabled, "account already in requested state");
        return Ok(false);
    }

    client
        .execute(GraphRequest::patch(
            path,
            serde_json::json!({ "accountEnabled": enabled }),
        ))
        .await
        .context(context)?;
    Ok(true)
}
