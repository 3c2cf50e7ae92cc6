//! Environment-driven configuration.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `TENANT_ID` | Target tenant (required) |
//! | `CLIENT_ID` | Service identity client id (required) |
//! | `CLIENT_SECRET` | Service identity secret (required) |
//! | `ACCEPTED_DOMAINS` | Comma-separated principal name domains; empty accepts any |
//! | `GRAPH_ENDPOINT` | Directory API root, defaults to Graph v1.0 |
//! | `AUTHORITY_HOST` | Token authority, defaults to the public cloud |

use crate::auth::ServiceCredential;
use crate::error::DirectoryResult;

/// Environment variable holding the accepted principal-name domains.
pub const ACCEPTED_DOMAINS_ENV: &str = "ACCEPTED_DOMAINS";

/// Environment variable overriding the directory API endpoint.
pub const GRAPH_ENDPOINT_ENV: &str = "GRAPH_ENDPOINT";

/// Environment variable overriding the token authority host.
pub const AUTHORITY_HOST_ENV: &str = "AUTHORITY_HOST";

/// Startup configuration for a [`DirectoryClient`](crate::client::DirectoryClient).
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Service identity credentials.
    pub credential: ServiceCredential,
    /// Domains accepted in user principal names. Empty accepts any domain.
    pub accepted_domains: Vec<String>,
    /// Directory API endpoint override.
    pub graph_endpoint: Option<String>,
    /// Token authority override.
    pub authority_host: Option<String>,
}

impl DirectoryConfig {
    /// Create a configuration with defaults for everything but the credential.
    pub fn new(credential: ServiceCredential) -> Self {
        Self {
            credential,
            accepted_domains: Vec::new(),
            graph_endpoint: None,
            authority_host: None,
        }
    }

    /// Load the configuration from the process environment.
    ///
    /// Missing credentials are a [`Config`](crate::error::DirectoryError::Config)
    /// error; everything else is optional.
    pub fn from_env() -> DirectoryResult<Self> {
        let credential = ServiceCredential::from_env()?;

        Ok(Self {
            credential,
            accepted_domains: accepted_domains_from_env(),
            graph_endpoint: non_empty_env(GRAPH_ENDPOINT_ENV),
            authority_host: non_empty_env(AUTHORITY_HOST_ENV),
        })
    }
}

pub(crate) fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn accepted_domains_from_env() -> Vec<String> {
    non_empty_env(ACCEPTED_DOMAINS_ENV)
        .map(|v| parse_domain_list(&v))
        .unwrap_or_default()
}

/// Split a comma-separated domain list, dropping blanks and lowercasing.
pub fn parse_domain_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().trim_start_matches('@').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}
