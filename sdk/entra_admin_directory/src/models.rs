//! Typed views of directory entities.
//!
//! Each view names the properties this crate reads and keeps everything else
//! in an `extra` map, so tenant extension attributes survive a round trip.

use entra_admin_core::models::PropertyMap;
use serde::{Deserialize, Serialize};

/// Properties requested when listing users.
pub const USER_SELECT: &[&str] = &[
    "id",
    "displayName",
    "userPrincipalName",
    "mail",
    "mailNickname",
    "givenName",
    "surname",
    "jobTitle",
    "department",
    "officeLocation",
    "usageLocation",
    "accountEnabled",
    "userType",
    "createdDateTime",
];

/// A user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub mail: Option<String>,
    pub mail_nickname: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub office_location: Option<String>,
    pub usage_location: Option<String>,
    pub account_enabled: Option<bool>,
    pub user_type: Option<String>,
    pub created_date_time: Option<String>,

    /// Properties without a typed field.
    #[serde(flatten)]
    pub extra: PropertyMap,
}

impl User {
    /// Whether sign-in is enabled. Unknown counts as enabled, the service default.
    pub fn is_enabled(&self) -> bool {
        self.account_enabled.unwrap_or(true)
    }
}

/// A group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub mail: Option<String>,
    pub mail_nickname: Option<String>,
    pub mail_enabled: Option<bool>,
    pub security_enabled: Option<bool>,
    #[serde(default)]
    pub group_types: Vec<String>,
    pub visibility: Option<String>,
    pub created_date_time: Option<String>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}

impl Group {
    /// Whether this is a Microsoft 365 (unified) group.
    pub fn is_unified(&self) -> bool {
        self.group_types.iter().any(|t| t == "Unified")
    }
}

/// An application registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub app_id: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub sign_in_audience: Option<String>,
    #[serde(default)]
    pub identifier_uris: Vec<String>,
    pub created_date_time: Option<String>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}

/// A service principal: an application's instance in this tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipal {
    pub id: String,
    pub app_id: Option<String>,
    pub display_name: Option<String>,
    pub account_enabled: Option<bool>,
    pub service_principal_type: Option<String>,
    pub app_owner_organization_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub device_id: Option<String>,
    pub display_name: Option<String>,
    pub operating_system: Option<String>,
    pub operating_system_version: Option<String>,
    pub account_enabled: Option<bool>,
    pub trust_type: Option<String>,
    pub approximate_last_sign_in_date_time: Option<String>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}

impl Device {
    pub fn is_enabled(&self) -> bool {
        self.account_enabled.unwrap_or(true)
    }
}

/// An activated directory role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRole {
    pub id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub role_template_id: Option<String>,

    #[serde(flatten)]
    pub extra: PropertyMap,
}

/// A user holding at least one activated directory role.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegedUser {
    pub id: String,
    pub display_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub mail: Option<String>,
    pub job_title: Option<String>,
    /// Names of every role the user holds, in discovery order.
    pub roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_keeps_extension_attributes() {
        let user: User = serde_json::from_value(json!({
            "@odata.type": "#microsoft.graph.user",
            "id": "u-1",
            "displayName": "Ada",
            "accountEnabled": false,
            "extension_abc_costCenter": "42"
        }))
        .unwrap();

        assert_eq!(user.display_name.as_deref(), Some("Ada"));
        assert!(!user.is_enabled());
        assert_eq!(user.extra["extension_abc_costCenter"], "42");

        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["extension_abc_costCenter"], "42");
        assert_eq!(back["userPrincipalName"], serde_json::Value::Null);
    }

    #[test]
    fn group_types_default_to_empty() {
        let group: Group = serde_json::from_value(json!({"id": "g-1"})).unwrap();
        assert!(group.group_types.is_empty());
        assert!(!group.is_unified());

        let unified: Group =
            serde_json::from_value(json!({"id": "g-2", "groupTypes": ["Unified"]})).unwrap();
        assert!(unified.is_unified());
    }

    #[test]
    fn missing_account_flag_means_enabled() {
        let device: Device = serde_json::from_value(json!({"id": "d-1"})).unwrap();
        assert!(device.is_enabled());
    }
}
