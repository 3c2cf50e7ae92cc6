//! Error taxonomy and provider error mapping.
//!
//! Every failure surfaced by this workspace is a [`DirectoryError`]. Callers that
//! only need the stable classification should match on [`DirectoryError::kind`],
//! which sees through any [`OperationContext`] attached on the way up.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::models::EntityFamily;

/// Stable classification of a [`DirectoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credential invalid or rejected, or a repeated 401 after a refresh.
    Auth,
    /// Payload failed local checks; no request was sent.
    Validation,
    /// Target entity does not exist (or was deleted).
    NotFound,
    /// Uniqueness or state conflict reported by the provider.
    Conflict,
    /// A non-idempotent request may or may not have been applied.
    ConflictPossible,
    /// Retry budget exhausted against throttling responses.
    RateLimited,
    /// Any other provider or transport failure.
    Provider,
    /// Fatal configuration problem, detected at startup.
    Config,
    /// The caller's cancellation signal fired.
    Cancelled,
}

/// Identifies the operation a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// Entity family the operation targeted.
    pub family: EntityFamily,
    /// Operation name, e.g. `"create"` or `"set_manager"`.
    pub operation: &'static str,
    /// Identifier of the target entity, when known.
    pub id: Option<String>,
}

impl OperationContext {
    /// Create a context for an operation on a family.
    pub fn new(family: EntityFamily, operation: &'static str) -> Self {
        Self {
            family,
            operation,
            id: None,
        }
    }

    /// Attach the target identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} {} ({})", self.family, self.operation, id),
            None => write!(f, "{} {}", self.family, self.operation),
        }
    }
}

/// Errors that can occur when administering the directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The payload failed local validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The target entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider reported a conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The outcome of a non-idempotent request is unknown.
    #[error("Outcome unknown, the request may have been applied: {0}")]
    ConflictPossible(String),

    /// Throttled beyond the retry budget.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Unmapped provider error.
    #[error("Provider error ({status} {code}): {message}")]
    Provider {
        status: u16,
        code: String,
        message: String,
    },

    /// A required configuration value is missing or invalid.
    #[error("Missing configuration: {0}")]
    Config(String),

    /// The endpoint URL is invalid.
    #[error("Invalid endpoint URL: {message}")]
    InvalidEndpoint { message: String },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// A payload could not be serialized or a response could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP request failed at the transport level.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// An error annotated with the operation it came from.
    #[error("{context}: {source}")]
    Context {
        context: OperationContext,
        #[source]
        source: Box<DirectoryError>,
    },
}

impl DirectoryError {
    /// Build an [`DirectoryError::InvalidEndpoint`] from a URL parse failure.
    pub fn invalid_endpoint_with_source(message: &str, source: url::ParseError) -> Self {
        Self::InvalidEndpoint {
            message: format!("{message}: {source}"),
        }
    }

    /// The stable taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::ConflictPossible(_) => ErrorKind::ConflictPossible,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Config(_) | Self::InvalidEndpoint { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Provider { .. } | Self::Serialization(_) | Self::Request(_) => {
                ErrorKind::Provider
            }
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Last known retry-after hint, if the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::Context { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// The operation context, if one was attached.
    pub fn context(&self) -> Option<&OperationContext> {
        match self {
            Self::Context { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Annotate the error with the operation it came from.
    ///
    /// An error that already carries a context keeps the innermost one.
    pub fn with_context(self, context: OperationContext) -> Self {
        match self {
            Self::Context { .. } => self,
            other => Self::Context {
                context,
                source: Box::new(other),
            },
        }
    }

    /// Shorthand for [`DirectoryError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Result type alias for directory operations.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Extension for attaching an [`OperationContext`] to a result.
pub trait ResultExt<T> {
    /// Attach `context` to the error, if any.
    fn context(self, context: OperationContext) -> DirectoryResult<T>;
}

impl<T> ResultExt<T> for DirectoryResult<T> {
    fn context(self, context: OperationContext) -> DirectoryResult<T> {
        self.map_err(|e| e.with_context(context))
    }
}

// ---------------------------------------------------------------------------
// Provider error mapping
// ---------------------------------------------------------------------------

/// Maximum length for error messages surfaced to callers.
const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// Provider codes that signal a uniqueness conflict regardless of status.
const CONFLICT_CODES: &[&str] = &[
    "Request_MultipleObjectsWithSameKeyValue",
    "ObjectConflict",
    "Conflict",
];

/// Provider codes that signal a missing entity regardless of status.
const NOT_FOUND_CODES: &[&str] = &[
    "Request_ResourceNotFound",
    "ResourceNotFound",
    "ErrorItemNotFound",
];

#[derive(Debug, Deserialize)]
struct ODataErrorEnvelope {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    details: Vec<ODataErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ODataErrorDetail {
    code: Option<String>,
}

/// Translate a non-success provider response into the error taxonomy.
///
/// `body` is the raw response body; only its sanitized message survives.
pub fn map_error_response(status: u16, retry_after: Option<Duration>, body: &str) -> DirectoryError {
    let (codes, raw_message) = match serde_json::from_str::<ODataErrorEnvelope>(body) {
        Ok(envelope) => {
            let mut codes: Vec<String> = envelope.error.code.into_iter().collect();
            codes.extend(envelope.error.details.into_iter().filter_map(|d| d.code));
            let message = envelope.error.message.unwrap_or_else(|| body.to_string());
            (codes, message)
        }
        Err(_) => (Vec::new(), body.to_string()),
    };

    let message = truncate_message(&raw_message);
    let has_code = |set: &[&str]| codes.iter().any(|c| set.contains(&c.as_str()));

    if has_code(CONFLICT_CODES) || (status == 400 && raw_message.contains("already exist")) {
        return DirectoryError::Conflict(message);
    }

    match status {
        401 => DirectoryError::Auth(message),
        404 => DirectoryError::NotFound(message),
        _ if has_code(NOT_FOUND_CODES) => DirectoryError::NotFound(message),
        409 | 412 => DirectoryError::Conflict(message),
        429 | 503 => DirectoryError::RateLimited {
            message,
            retry_after,
        },
        _ => DirectoryError::Provider {
            status,
            code: codes
                .into_iter()
                .next()
                .unwrap_or_else(|| status_reason(status).to_string()),
            message,
        },
    }
}

fn status_reason(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("unknown")
}

/// Redact credential material from a provider message.
///
/// Covers `Bearer <token>` sequences, bare JWTs and `client_secret=` pairs.
pub(crate) fn sanitize_error_message(msg: &str) -> String {
    let mut result = redact_after(msg, "Bearer ");
    result = redact_after(&result, "client_secret=");

    // Bare JWTs: three base64url segments, header always starts with "eyJ".
    let mut search_start = 0;
    while let Some(relative_pos) = result[search_start..].find("eyJ") {
        let start = search_start + relative_pos;
        let end = token_end(&result, start);
        if result[start..end].matches('.').count() >= 2 {
            result.replace_range(start..end, "[REDACTED]");
            search_start = start + "[REDACTED]".len();
        } else {
            search_start = start + 3;
        }
    }

    result
}

/// Replace whatever follows each occurrence of `marker` up to the next delimiter.
fn redact_after(msg: &str, marker: &str) -> String {
    let mut result = msg.to_string();
    let mut search_start = 0;

    while let Some(relative_pos) = result[search_start..].find(marker) {
        let value_start = search_start + relative_pos + marker.len();
        if value_start >= result.len() {
            break;
        }
        if result[value_start..].starts_with("[REDACTED]") {
            search_start = value_start + "[REDACTED]".len();
            continue;
        }

        let value_end = token_end(&result, value_start);
        if value_end > value_start {
            result.replace_range(value_start..value_end, "[REDACTED]");
            search_start = value_start + "[REDACTED]".len();
        } else {
            search_start = value_start;
        }
    }

    result
}

fn token_end(s: &str, start: usize) -> usize {
    s[start..]
        .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ',' | '&'))
        .map(|pos| start + pos)
        .unwrap_or(s.len())
}

/// Sanitize, then truncate to [`MAX_ERROR_MESSAGE_LEN`] bytes on a char boundary.
pub(crate) fn truncate_message(msg: &str) -> String {
    let sanitized = sanitize_error_message(msg);

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated)", &sanitized[..cut])
    } else {
        sanitized
    }
}
