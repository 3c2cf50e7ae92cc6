//! Common types shared across all Entra admin crates.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// JSON object map used for open property sets.
pub type PropertyMap = serde_json::Map<String, serde_json::Value>;

/// A category of directory object with its own schema and operation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityFamily {
    User,
    Group,
    Application,
    ServicePrincipal,
    Device,
    SignIn,
    DirectoryAudit,
    AuthenticationMethod,
    ConditionalAccessPolicy,
}

impl EntityFamily {
    /// Collection path relative to the Graph endpoint.
    pub fn collection_path(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Group => "groups",
            Self::Application => "applications",
            Self::ServicePrincipal => "servicePrincipals",
            Self::Device => "devices",
            Self::SignIn => "auditLogs/signIns",
            Self::DirectoryAudit => "auditLogs/directoryAudits",
            Self::AuthenticationMethod => "authentication/methods",
            Self::ConditionalAccessPolicy => "identity/conditionalAccess/policies",
        }
    }

    /// Path of a single entity of this family.
    pub fn item_path(self, id: &str) -> String {
        format!("{}/{}", self.collection_path(), id)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Application => "application",
            Self::ServicePrincipal => "service principal",
            Self::Device => "device",
            Self::SignIn => "sign-in",
            Self::DirectoryAudit => "directory audit",
            Self::AuthenticationMethod => "authentication method",
            Self::ConditionalAccessPolicy => "conditional access policy",
        }
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of operation requested against an entity family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
    List,
    RelationshipChange,
}

/// A directory object with an open property set.
///
/// Used wherever the provider may return heterogeneous object types, such as
/// group members or role members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryObject {
    /// Provider-assigned identifier.
    pub id: String,

    /// OData type, e.g. `#microsoft.graph.user`.
    #[serde(rename = "@odata.type", default, skip_serializing_if = "Option::is_none")]
    pub odata_type: Option<String>,

    /// All remaining properties.
    #[serde(flatten)]
    pub properties: PropertyMap,
}

impl DirectoryObject {
    /// Whether the object's OData type matches `type_name` (e.g. `"user"`).
    pub fn is_type(&self, type_name: &str) -> bool {
        self.odata_type
            .as_deref()
            .and_then(|t| t.strip_prefix("#microsoft.graph."))
            .is_some_and(|t| t == type_name)
    }

    /// A string property, if present.
    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }
}

/// A weak reference to another directory entity.
///
/// Accepts either a raw identifier or a previously fetched entity and always
/// normalizes to the identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRef {
    Id(String),
    Object(DirectoryObject),
}

impl EntityRef {
    /// The referenced identifier.
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id.trim(),
            Self::Object(obj) => obj.id.trim(),
        }
    }

    /// Consume the reference, returning the identifier.
    pub fn into_id(self) -> String {
        match self {
            Self::Id(id) => id.trim().to_string(),
            Self::Object(obj) => obj.id.trim().to_string(),
        }
    }
}

impl From<&str> for EntityRef {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for EntityRef {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<&String> for EntityRef {
    fn from(id: &String) -> Self {
        Self::Id(id.clone())
    }
}

impl From<DirectoryObject> for EntityRef {
    fn from(obj: DirectoryObject) -> Self {
        Self::Object(obj)
    }
}

/// One page of a collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataPage<T> {
    /// Items on this page.
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,

    /// Continuation cursor; absent on the last page.
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Informational progress emitted during long listing and bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A page was fetched; `items` is the running total received so far.
    PageFetched { page: usize, items: usize },
    /// A bulk operation finished processing entity `index` of `total`.
    EntityProcessed { index: usize, total: usize },
}

/// Callback receiving [`Progress`] updates. Has no semantic effect.
pub type ProgressHook = Arc<dyn Fn(Progress) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_object_keeps_unknown_properties() {
        let json = serde_json::json!({
            "id": "obj-1",
            "@odata.type": "#microsoft.graph.user",
            "displayName": "Ada",
            "extension_abc_costCenter": "42"
        });

        let obj: DirectoryObject = serde_json::from_value(json).unwrap();

        assert_eq!(obj.id, "obj-1");
        assert!(obj.is_type("user"));
        assert!(!obj.is_type("group"));
        assert_eq!(obj.str_property("displayName"), Some("Ada"));
        assert_eq!(obj.str_property("extension_abc_costCenter"), Some("42"));
    }

    #[test]
    fn entity_ref_normalizes_to_id() {
        let obj = DirectoryObject {
            id: " mgr-1 ".into(),
            odata_type: None,
            properties: PropertyMap::new(),
        };

        assert_eq!(EntityRef::from(obj).into_id(), "mgr-1");
        assert_eq!(EntityRef::from("mgr-2").id(), "mgr-2");
    }

    #[test]
    fn odata_page_without_next_link() {
        let json = serde_json::json!({"value": [{"id": "1"}, {"id": "2"}]});
        let page: ODataPage<DirectoryObject> = serde_json::from_value(json).unwrap();

        assert_eq!(page.value.len(), 2);
        assert!(page.next_link.is_none());
    }

    #[test]
    fn odata_page_with_next_link() {
        let json = serde_json::json!({
            "value": [],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/users?$skiptoken=xyz"
        });
        let page: ODataPage<DirectoryObject> = serde_json::from_value(json).unwrap();

        assert!(page.value.is_empty());
        assert!(page.next_link.unwrap().contains("skiptoken"));
    }

    #[test]
    fn family_paths() {
        assert_eq!(EntityFamily::User.item_path("u1"), "users/u1");
        assert_eq!(
            EntityFamily::ConditionalAccessPolicy.collection_path(),
            "identity/conditionalAccess/policies"
        );
        assert_eq!(EntityFamily::ServicePrincipal.to_string(), "service principal");
    }
}
