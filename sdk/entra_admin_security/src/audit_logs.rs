//! Directory audit logs.

use entra_admin_core::client::DirectoryClient;
use entra_admin_core::models::EntityFamily;
use entra_admin_core::pagination::{self, EntityStream};
use entra_admin_directory::ListOptions;

use crate::models::DirectoryAudit;

/// List directory audit entries matching `options`.
///
/// Typical filters are `activityDateTime ge 2026-10-01T00:00:00Z` or
/// `category eq 'UserManagement'`.
///
/// # Tracing
///
/// Emits a span named `entra::audit_logs::list`.
#[tracing::instrument(name = "entra::audit_logs::list", skip(client, options))]
pub fn list(client: &DirectoryClient, options: ListOptions) -> EntityStream<DirectoryAudit> {
    pagination::list(
        client,
        options.into_request(EntityFamily::DirectoryAudit.collection_path()),
    )
}
