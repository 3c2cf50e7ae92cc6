//! Operation entry point covering every family.
//!
//! Handles sign-in logs, directory audits, authentication methods and
//! Conditional Access, and hands every other family to
//! [`entra_admin_directory::operation::perform`].
//!
//! | family | supported kinds |
//! |--------|-----------------|
//! | sign-in | list (optionally for a target user over `days`) |
//! | directory audit | list |
//! | authentication method | read (MFA status of the target user, or of every user in the target group with the member relationship), list (methods of the target user) |
//! | conditional access policy | read, update (a lone `state` goes through `set_state`), list |

use entra_admin_core::client::DirectoryClient;
use entra_admin_core::error::{DirectoryError, DirectoryResult, ResultExt};
use entra_admin_core::models::{EntityFamily, OperationKind};
use entra_admin_directory::operation::{
    self as directory_operation, collect_json, kind_label, OperationRequest, Relationship,
};
use serde_json::{json, Value};

use crate::models::PolicyState;
use crate::{audit_logs, auth_methods, conditional_access, sign_ins};

/// Default sign-in window, in days, when a user's sign-ins are requested.
pub const DEFAULT_SIGN_IN_DAYS: u32 = 7;

/// Perform `request` against any family and return its result as JSON.
///
/// # Tracing
///
/// Emits a span named `entra::operation::perform_security` with fields
/// `family` and `kind`.
#[tracing::instrument(
    name = "entra::operation::perform_security",
    skip(client, request),
    fields(family = %request.family, kind = kind_label(request.kind))
)]
pub async fn perform(client: &DirectoryClient, request: OperationRequest) -> DirectoryResult<Value> {
    let context = request.context();
    let result = match request.family {
        EntityFamily::SignIn => perform_sign_in(client, &request).await,
        EntityFamily::DirectoryAudit => perform_audit(client, &request).await,
        EntityFamily::AuthenticationMethod => perform_auth_method(client, &request).await,
        EntityFamily::ConditionalAccessPolicy => perform_policy(client, &request).await,
        _ => return directory_operation::perform(client, request).await,
    };
    result.context(context)
}

fn unsupported(request: &OperationRequest) -> DirectoryError {
    DirectoryError::validation(format!(
        "{} is not supported for {} entities",
        kind_label(request.kind),
        request.family
    ))
}

async fn perform_sign_in(client: &DirectoryClient, request: &OperationRequest) -> DirectoryResult<Value> {
    if request.kind != OperationKind::List {
        return Err(unsupported(request));
    }
    match &request.target_id {
        Some(user_id) => {
            let days = match request.properties.get("days") {
                None => DEFAULT_SIGN_IN_DAYS,
                Some(value) => value
                    .as_u64()
                    .and_then(|d| u32::try_from(d).ok())
                    .ok_or_else(|| DirectoryError::validation("'days' must be a positive integer"))?,
            };
            let sign_ins = sign_ins::list_for_user(client, user_id, days, request.limit).await?;
            Ok(serde_json::to_value(sign_ins)?)
        }
        None => collect_json(sign_ins::list(client, request.list_options())).await,
    }
}

async fn perform_audit(client: &DirectoryClient, request: &OperationRequest) -> DirectoryResult<Value> {
    match request.kind {
        OperationKind::List => collect_json(audit_logs::list(client, request.list_options())).await,
        _ => Err(unsupported(request)),
    }
}

async fn perform_auth_method(client: &DirectoryClient, request: &OperationRequest) -> DirectoryResult<Value> {
    match request.kind {
        OperationKind::Read if request.relationship == Some(Relationship::Member) => {
            let group_id = request.require_target()?;
            Ok(serde_json::to_value(auth_methods::group_mfa_status(client, group_id).await?)?)
        }
        OperationKind::Read => {
            let user_id = request.require_target()?;
            Ok(serde_json::to_value(auth_methods::mfa_status(client, user_id).await?)?)
        }
        OperationKind::List => {
            let user_id = request.require_target()?;
            Ok(serde_json::to_value(auth_methods::list_methods(client, user_id).await?)?)
        }
        _ => Err(unsupported(request)),
    }
}

/// The requested state when `state` is the only property.
fn state_only(request: &OperationRequest) -> DirectoryResult<Option<PolicyState>> {
    if request.properties.len() != 1 {
        return Ok(None);
    }
    match request.properties.get("state") {
        Some(Value::String(state)) => state.parse().map(Some),
        Some(_) => Err(DirectoryError::validation("'state' must be a string")),
        None => Ok(None),
    }
}

async fn perform_policy(client: &DirectoryClient, request: &OperationRequest) -> DirectoryResult<Value> {
    match request.kind {
        OperationKind::Read => {
            let policy = conditional_access::get(client, request.require_target()?).await?;
            Ok(serde_json::to_value(policy)?)
        }
        OperationKind::Update => {
            let policy_id = request.require_target()?;
            if let Some(state) = state_only(request)? {
                let changed = conditional_access::set_state(client, policy_id, state).await?;
                let status = if changed { "updated" } else { "unchanged" };
                return Ok(json!({ "id": policy_id, "status": status }));
            }
            conditional_access::update(client, policy_id, &request.properties).await?;
            Ok(json!({ "id": policy_id, "status": "updated" }))
        }
        OperationKind::List => collect_json(conditional_access::list(client, request.list_options())).await,
        _ => Err(unsupported(request)),
    }
}
