//! Lazy traversal of paged collections.
//!
//! Collection responses carry at most one page of items plus an
//! `@odata.nextLink` cursor. [`list`] turns that into a stream of items that
//! fetches the next page only when the previous one has been consumed, and
//! stops fetching once an optional item limit is reached.
//!
//! ```rust,no_run
//! use entra_admin_core::client::DirectoryClient;
//! use entra_admin_core::models::DirectoryObject;
//! use entra_admin_core::pagination::{self, ListRequest};
//! use futures::TryStreamExt;
//!
//! # async fn example(client: &DirectoryClient) -> entra_admin_core::error::DirectoryResult<()> {
//! let request = ListRequest::new("users")
//!     .filter("accountEnabled eq false")
//!     .limit(50);
//!
//! let mut users = pagination::list::<DirectoryObject>(client, request);
//! while let Some(user) = users.try_next().await? {
//!     println!("{}", user.id);
//! }
//! # Ok(())
//! # }
//! ```

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;

use crate::client::{DirectoryClient, GraphRequest};
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{ODataPage, Progress, ProgressHook};

/// Largest page size the service accepts for most collections.
pub const MAX_PAGE_SIZE: u32 = 999;

/// A finite, non-restartable stream of collection items.
pub type EntityStream<T> = BoxStream<'static, DirectoryResult<T>>;

/// Template for the first page of a listing.
#[derive(Clone)]
pub struct ListRequest {
    path: String,
    query: Vec<(String, String)>,
    eventual_consistency: bool,
    page_size: Option<u32>,
    limit: Option<usize>,
    progress: Option<ProgressHook>,
}

impl std::fmt::Debug for ListRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListRequest")
            .field("path", &self.path)
            .field("query", &self.query)
            .field("eventual_consistency", &self.eventual_consistency)
            .field("page_size", &self.page_size)
            .field("limit", &self.limit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl ListRequest {
    /// List the collection at `path`, relative to the endpoint.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            eventual_consistency: false,
            page_size: None,
            limit: None,
            progress: None,
        }
    }

    /// Append a raw query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set `$filter`.
    pub fn filter(self, expression: impl Into<String>) -> Self {
        self.query("$filter", expression)
    }

    /// Set `$search`; implies eventual consistency.
    pub fn search(mut self, expression: impl Into<String>) -> Self {
        self.eventual_consistency = true;
        self.query("$search", expression)
    }

    /// Set `$select` from a list of property names.
    pub fn select(self, properties: &[&str]) -> Self {
        self.query("$select", properties.join(","))
    }

    /// Set `$orderby`.
    pub fn order_by(self, expression: impl Into<String>) -> Self {
        self.query("$orderby", expression)
    }

    /// Request eventually consistent reads.
    pub fn eventual_consistency(mut self, enabled: bool) -> Self {
        self.eventual_consistency = enabled;
        self
    }

    /// Items per page (`$top`), clamped to [`MAX_PAGE_SIZE`].
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size.clamp(1, MAX_PAGE_SIZE));
        self
    }

    /// Stop after `limit` items.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Receive [`Progress::PageFetched`] after each page.
    pub fn progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// The configured item limit.
    pub fn item_limit(&self) -> Option<usize> {
        self.limit
    }

    fn first_page(&self) -> GraphRequest {
        let mut request = GraphRequest::get(self.path.clone())
            .eventual_consistency(self.eventual_consistency);
        for (name, value) in &self.query {
            request = request.query(name.clone(), value.clone());
        }

        // Without an explicit page size, avoid fetching more than the limit needs.
        let top = self.page_size.or_else(|| {
            self.limit
                .map(|limit| limit.clamp(1, MAX_PAGE_SIZE as usize) as u32)
        });
        if let Some(top) = top {
            request = request.query("$top", top.to_string());
        }
        request
    }
}

struct PageState {
    client: DirectoryClient,
    next: Option<GraphRequest>,
    eventual_consistency: bool,
    pages: usize,
    items: usize,
    progress: Option<ProgressHook>,
}

/// Lazily list a collection.
///
/// Items arrive in provider order without de-duplication. The next page is
/// requested only after the current one is drained, and never once `limit`
/// items have been yielded.
pub fn list<T>(client: &DirectoryClient, request: ListRequest) -> EntityStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let limit = request.limit;
    let state = PageState {
        client: client.clone(),
        next: Some(request.first_page()),
        eventual_consistency: request.eventual_consistency,
        pages: 0,
        items: 0,
        progress: request.progress,
    };

    let pages = stream::try_unfold(state, |mut state| async move {
        let Some(page_request) = state.next.take() else {
            return Ok::<_, DirectoryError>(None);
        };

        let page: ODataPage<T> = state.client.execute_json(page_request).await?;

        state.pages += 1;
        state.items += page.value.len();
        tracing::debug!(
            page = state.pages,
            items = state.items,
            has_next = page.next_link.is_some(),
            "page fetched"
        );
        if let Some(hook) = &state.progress {
            hook(Progress::PageFetched {
                page: state.pages,
                items: state.items,
            });
        }

        state.next = page
            .next_link
            .map(|link| GraphRequest::get(link).eventual_consistency(state.eventual_consistency));

        Ok(Some((page.value, state)))
    });

    let items = pages
        .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
        .try_flatten();

    match limit {
        Some(limit) => items.take(limit).boxed(),
        None => items.boxed(),
    }
}

/// Drain a stream into a vector, stopping at the first error.
pub async fn collect_all<T>(stream: EntityStream<T>) -> DirectoryResult<Vec<T>> {
    stream.try_collect().await
}
