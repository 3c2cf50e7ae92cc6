//! Typed views of security log and policy entities.
//!
//! Like the directory views, each keeps the properties it does not name in an
//! `extra` map so nothing the service returns is lost.

use chrono::{DateTime, Utc};
use entra_admin_core::error::DirectoryError;
use entra_admin_core::models::PropertyMap;
use serde::{Deserialize, Serialize};

/// OData type of the password method every account has.
pub const PASSWORD_METHOD_TYPE: &str = "#microsoft.graph.passwordAuthenticationMethod";

// ---------------------------------------------------------------------------
// Sign-in logs
// ---------------------------------------------------------------------------

/// One interactive or non-interactive sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignIn {
    pub id: String,
    pub created_date_time: Option<DateTime<Utc>>,
    pub user_display_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub user_id: Option<String>,
    pub app_display_name: Option<String>,
    pub app_id: Option<String>,
    pub ip_address: Option<String>,
    pub client_app_used: Option<String>,
    pub conditional_access_status: Option<String>,
    pub is_interactive: Option<bool>,
    pub risk_detail: Option<String>,
    pub risk_level_aggregated: Option<String>,
    pub risk_level_during_sign_in: Option<String>,
    pub risk_state: Option<String>,
    pub device_detail: Option<DeviceDetail>,
    pub location: Option<SignInLocation>,
    pub status: Option<SignInStatus>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}

impl SignIn {
    /// Whether the sign-in succeeded. Unknown when no status was reported.
    pub fn succeeded(&self) -> Option<bool> {
        self.status.as_ref().and_then(|s| s.error_code).map(|code| code == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetail {
    pub device_id: Option<String>,
    pub display_name: Option<String>,
    pub operating_system: Option<String>,
    pub browser: Option<String>,
    pub is_compliant: Option<bool>,
    pub is_managed: Option<bool>,
    pub trust_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInLocation {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country_or_region: Option<String>,
    pub geo_coordinates: Option<GeoCoordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinates {
    pub altitude: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Sign-in result. An `error_code` of 0 means success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInStatus {
    pub error_code: Option<i64>,
    pub failure_reason: Option<String>,
    pub additional_details: Option<String>,
}

// ---------------------------------------------------------------------------
// Directory audits
// ---------------------------------------------------------------------------

/// A directory audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryAudit {
    pub id: String,
    pub activity_date_time: Option<DateTime<Utc>>,
    pub activity_display_name: Option<String>,
    pub category: Option<String>,
    pub correlation_id: Option<String>,
    pub logged_by_service: Option<String>,
    pub operation_type: Option<String>,
    pub result: Option<String>,
    pub result_reason: Option<String>,
    /// The user or app that performed the activity.
    pub initiated_by: Option<serde_json::Value>,
    #[serde(default)]
    pub target_resources: Vec<serde_json::Value>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}

// ---------------------------------------------------------------------------
// Authentication methods
// ---------------------------------------------------------------------------

/// A registered authentication method. Its kind is the OData type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationMethod {
    pub id: String,
    #[serde(rename = "@odata.type", default, skip_serializing_if = "Option::is_none")]
    pub odata_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}

impl AuthenticationMethod {
    pub fn is_password(&self) -> bool {
        self.odata_type.as_deref() == Some(PASSWORD_METHOD_TYPE)
    }
}

/// MFA registration state of one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaStatus {
    pub user_id: String,
    /// True when any method other than the password is registered.
    pub mfa_enabled: bool,
    pub method_count: usize,
    pub methods: Vec<AuthenticationMethod>,
}

impl MfaStatus {
    pub fn from_methods(user_id: impl Into<String>, methods: Vec<AuthenticationMethod>) -> Self {
        Self {
            user_id: user_id.into(),
            mfa_enabled: methods.iter().any(|m| !m.is_password()),
            method_count: methods.len(),
            methods,
        }
    }
}

/// MFA state of one group member, or the error that prevented reading it.
#[derive(Debug)]
pub struct MemberMfaStatus {
    pub user_id: String,
    pub display_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub mail: Option<String>,
    pub status: Result<MfaStatus, DirectoryError>,
}

impl MemberMfaStatus {
    pub fn mfa_enabled(&self) -> Option<bool> {
        self.status.as_ref().ok().map(|s| s.mfa_enabled)
    }
}

impl Serialize for MemberMfaStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("MemberMfaStatus", 8)?;
        state.serialize_field("userId", &self.user_id)?;
        state.serialize_field("displayName", &self.display_name)?;
        state.serialize_field("userPrincipalName", &self.user_principal_name)?;
        state.serialize_field("mail", &self.mail)?;
        match &self.status {
            Ok(status) => {
                state.serialize_field("mfaEnabled", &status.mfa_enabled)?;
                state.serialize_field("methodCount", &status.method_count)?;
                state.serialize_field("methods", &status.methods)?;
                state.skip_field("error")?;
            }
            Err(err) => {
                state.serialize_field("mfaEnabled", &Option::<bool>::None)?;
                state.skip_field("methodCount")?;
                state.skip_field("methods")?;
                state.serialize_field("error", &err.to_string())?;
            }
        }
        state.end()
    }
}

// ---------------------------------------------------------------------------
// Conditional Access
// ---------------------------------------------------------------------------

/// Enforcement state of a Conditional Access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyState {
    Enabled,
    Disabled,
    /// Evaluated and logged, never enforced.
    EnabledForReportingButNotEnforced,
}

impl PolicyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::EnabledForReportingButNotEnforced => "enabledForReportingButNotEnforced",
        }
    }
}

impl std::fmt::Display for PolicyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyState {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            "enabledForReportingButNotEnforced" => Ok(Self::EnabledForReportingButNotEnforced),
            other => Err(DirectoryError::validation(format!(
                "unknown policy state '{other}'"
            ))),
        }
    }
}

/// A Conditional Access policy. Conditions and controls stay untyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalAccessPolicy {
    pub id: String,
    pub display_name: Option<String>,
    pub state: Option<PolicyState>,
    pub created_date_time: Option<DateTime<Utc>>,
    pub modified_date_time: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
    pub grant_controls: Option<serde_json::Value>,
    pub session_controls: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}
