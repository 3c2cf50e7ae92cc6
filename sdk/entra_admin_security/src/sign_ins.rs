//! Sign-in logs.
//!
//! Reading sign-ins needs `AuditLog.Read.All` and a Premium P1 tenant; other
//! tenants get an `Auth` or `Provider` error from the service.

use chrono::{DateTime, Duration, Utc};
use entra_admin_core::client::DirectoryClient;
use entra_admin_core::error::{DirectoryError, DirectoryResult, OperationContext, ResultExt};
use entra_admin_core::models::EntityFamily;
use entra_admin_core::pagination::{self, EntityStream};
use entra_admin_directory::ListOptions;

use crate::models::SignIn;

const FAMILY: EntityFamily = EntityFamily::SignIn;

/// List sign-ins matching `options`, newest first as the service orders them.
///
/// # Example
///
/// ```rust,no_run
/// use entra_admin_core::client::DirectoryClient;
/// use entra_admin_directory::ListOptions;
/// use entra_admin_security::sign_ins;
/// use futures::TryStreamExt;
///
/// # async fn example(client: &DirectoryClient) -> entra_admin_core::error::DirectoryResult<()> {
/// let failures: Vec<_> = sign_ins::list(client, ListOptions::new().filter("status/errorCode ne 0").limit(50))
///     .try_collect()
///     .await?;
/// println!("{} failed sign-ins", failures.len());
/// # Ok(())
/// # }
/// ```
///
/// # Tracing
///
/// Emits a span named `entra::sign_ins::list`.
#[tracing::instrument(name = "entra::sign_ins::list", skip(client, options))]
pub fn list(client: &DirectoryClient, options: ListOptions) -> EntityStream<SignIn> {
    pagination::list(client, options.into_request(FAMILY.collection_path()))
}

/// Sign-ins of one user during the last `days` days.
///
/// With a `limit`, fetching stops once that many sign-ins have arrived.
///
/// # Errors
///
/// [`DirectoryError::Validation`] for a blank user id, zero days or a window
/// reaching before the representable date range.
///
/// # Tracing
///
/// Emits a span named `entra::sign_ins::list_for_user` with fields
/// `user_id`, `days` and `limit`.
#[tracing::instrument(name = "entra::sign_ins::list_for_user", skip(client))]
pub async fn list_for_user(
    client: &DirectoryClient,
    user_id: &str,
    days: u32,
    limit: Option<usize>,
) -> DirectoryResult<Vec<SignIn>> {
    let context = OperationContext::new(FAMILY, "list_for_user").with_id(user_id);
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(DirectoryError::validation("user id must not be empty")).context(context);
    }
    if days == 0 {
        return Err(DirectoryError::validation("days must be at least 1")).context(context);
    }

    let filter = user_filter(user_id, Utc::now(), days).context(context.clone())?;
    let mut options = ListOptions::new().filter(filter);
    options = match limit {
        Some(limit) => options.limit(limit),
        None => options.page_size(pagination::MAX_PAGE_SIZE),
    };
    let sign_ins = pagination::collect_all(list(client, options)).await.context(context)?;

    tracing::debug!(count = sign_ins.len(), "sign-ins fetched");
    Ok(sign_ins)
}

/// `$filter` selecting one user's sign-ins since `days` before `now`.
fn user_filter(user_id: &str, now: DateTime<Utc>, days: u32) -> DirectoryResult<String> {
    let since = Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| DirectoryError::validation(format!("a window of {days} days is out of range")))?;
    Ok(format!(
        "userId eq '{}' and createdDateTime ge {}",
        user_id.replace('\'', "''"),
        since.format("%Y-%m-%dT%H:%M:%SZ")
    ))
}
