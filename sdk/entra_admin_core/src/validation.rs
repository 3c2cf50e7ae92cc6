//! Local validation and normalization of mutation payloads.
//!
//! Every create and update passes through [`Validator::validate`] before a
//! request is built. Validation is purely local: a rejected payload never
//! reaches the network.
//!
//! Per family the validator knows which properties exist, their value shapes,
//! which are required on create and which may not change on update. It also
//! applies defaults (derived mail nicknames, generated passwords, account and
//! group flags) and splits relationship properties such as `manager` out of
//! the payload so callers can apply them as reference changes.
//!
//! Properties the schema does not know are passed through untouched in
//! [`NormalizedProperties::extensions`]; the directory allows tenant-defined
//! attributes and they cannot be validated locally.

use secrecy::SecretString;
use serde_json::{Map, Value};

use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{EntityFamily, OperationKind, PropertyMap};
use crate::password;

/// Maximum length of a display name.
pub const MAX_DISPLAY_NAME_LEN: usize = 256;

/// Maximum length of a mail nickname.
pub const MAX_MAIL_NICKNAME_LEN: usize = 64;

/// Properties no caller may set.
const READ_ONLY: &[&str] = &["id", "createdDateTime", "deletedDateTime"];

/// Characters permitted in a mail nickname besides ASCII alphanumerics.
const MAIL_NICKNAME_SYMBOLS: &str = "!#$%&'*+-/=?^_`{|}~.";

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Text { max: usize },
    Bool,
    StringList,
    EmailList,
    PrincipalName,
    Email,
    MailNickname,
    CountryCode,
    Enumeration(&'static [&'static str]),
    Object,
    Any,
}

#[derive(Debug)]
struct Field {
    name: &'static str,
    kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

const fn text(name: &'static str, max: usize) -> Field {
    field(name, FieldKind::Text { max })
}

#[derive(Debug)]
struct Schema {
    fields: &'static [Field],
    required_on_create: &'static [&'static str],
    immutable_on_update: &'static [&'static str],
    creatable: bool,
    updatable: bool,
}

impl Schema {
    fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

const USER_TYPES: &[&str] = &["Member", "Guest"];

const USER_SCHEMA: Schema = Schema {
    fields: &[
        text("displayName", MAX_DISPLAY_NAME_LEN),
        text("givenName", 64),
        text("surname", 64),
        text("jobTitle", 128),
        text("department", 64),
        text("companyName", 64),
        text("officeLocation", 128),
        text("employeeId", 16),
        text("mobilePhone", 64),
        text("streetAddress", 1024),
        text("city", 128),
        text("state", 128),
        text("postalCode", 40),
        text("country", 128),
        text("preferredLanguage", 16),
        field("businessPhones", FieldKind::StringList),
        field("otherMails", FieldKind::EmailList),
        field("userPrincipalName", FieldKind::PrincipalName),
        field("mail", FieldKind::Email),
        field("mailNickname", FieldKind::MailNickname),
        field("usageLocation", FieldKind::CountryCode),
        field("accountEnabled", FieldKind::Bool),
        field("userType", FieldKind::Enumeration(USER_TYPES)),
        field("passwordProfile", FieldKind::Object),
        field("passwordPolicies", FieldKind::Text { max: 256 }),
    ],
    required_on_create: &["displayName", "userPrincipalName"],
    immutable_on_update: &[],
    creatable: true,
    updatable: true,
};

const GROUP_VISIBILITY: &[&str] = &["Public", "Private", "HiddenMembership"];

const GROUP_SCHEMA: Schema = Schema {
    fields: &[
        text("displayName", MAX_DISPLAY_NAME_LEN),
        text("description", 1024),
        field("mailNickname", FieldKind::MailNickname),
        field("mailEnabled", FieldKind::Bool),
        field("securityEnabled", FieldKind::Bool),
        field("groupTypes", FieldKind::StringList),
        field("visibility", FieldKind::Enumeration(GROUP_VISIBILITY)),
        field("isAssignableToRole", FieldKind::Bool),
        text("classification", 256),
    ],
    required_on_create: &["displayName"],
    immutable_on_update: &["isAssignableToRole"],
    creatable: true,
    updatable: true,
};

const SIGN_IN_AUDIENCES: &[&str] = &[
    "AzureADMyOrg",
    "AzureADMultipleOrgs",
    "AzureADandPersonalMicrosoftAccount",
    "PersonalMicrosoftAccount",
];

const APPLICATION_SCHEMA: Schema = Schema {
    fields: &[
        text("displayName", MAX_DISPLAY_NAME_LEN),
        text("description", 1024),
        text("notes", 1024),
        field("signInAudience", FieldKind::Enumeration(SIGN_IN_AUDIENCES)),
        field("identifierUris", FieldKind::StringList),
        field("tags", FieldKind::StringList),
        field("web", FieldKind::Object),
        field("spa", FieldKind::Object),
        field("publicClient", FieldKind::Object),
        field("api", FieldKind::Object),
        field("requiredResourceAccess", FieldKind::Any),
        field("appRoles", FieldKind::Any),
        field("isFallbackPublicClient", FieldKind::Bool),
    ],
    required_on_create: &["displayName"],
    immutable_on_update: &["appId"],
    creatable: true,
    updatable: true,
};

const SERVICE_PRINCIPAL_SCHEMA: Schema = Schema {
    fields: &[
        text("appId", 64),
        text("displayName", MAX_DISPLAY_NAME_LEN),
        text("description", 1024),
        text("notes", 1024),
        field("accountEnabled", FieldKind::Bool),
        field("appRoleAssignmentRequired", FieldKind::Bool),
        field("tags", FieldKind::StringList),
        field("notificationEmailAddresses", FieldKind::EmailList),
        text("preferredSingleSignOnMode", 64),
    ],
    required_on_create: &["appId"],
    immutable_on_update: &["appId"],
    creatable: true,
    updatable: true,
};

const DEVICE_SCHEMA: Schema = Schema {
    fields: &[
        field("accountEnabled", FieldKind::Bool),
        text("displayName", MAX_DISPLAY_NAME_LEN),
        field("extensionAttributes", FieldKind::Object),
    ],
    required_on_create: &[],
    immutable_on_update: &["deviceId"],
    creatable: false,
    updatable: true,
};

/// States a conditional access policy can be switched to.
pub const POLICY_STATES: &[&str] = &[
    "enabled",
    "disabled",
    "enabledForReportingButNotEnforced",
];

const CONDITIONAL_ACCESS_SCHEMA: Schema = Schema {
    fields: &[
        field("state", FieldKind::Enumeration(POLICY_STATES)),
        text("displayName", MAX_DISPLAY_NAME_LEN),
        field("conditions", FieldKind::Object),
        field("grantControls", FieldKind::Object),
        field("sessionControls", FieldKind::Object),
    ],
    required_on_create: &[],
    immutable_on_update: &[],
    creatable: false,
    updatable: true,
};

fn schema_for(family: EntityFamily) -> Option<&'static Schema> {
    match family {
        EntityFamily::User => Some(&USER_SCHEMA),
        EntityFamily::Group => Some(&GROUP_SCHEMA),
        EntityFamily::Application => Some(&APPLICATION_SCHEMA),
        EntityFamily::ServicePrincipal => Some(&SERVICE_PRINCIPAL_SCHEMA),
        EntityFamily::Device => Some(&DEVICE_SCHEMA),
        EntityFamily::ConditionalAccessPolicy => Some(&CONDITIONAL_ACCESS_SCHEMA),
        EntityFamily::SignIn | EntityFamily::DirectoryAudit | EntityFamily::AuthenticationMethod => {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// A requested change to a user's manager reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerChange {
    /// Point the manager reference at this user id.
    Set(String),
    /// Clear the manager reference.
    Remove,
}

/// Relationship changes split out of a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub manager: Option<ManagerChange>,
}

impl References {
    pub fn is_empty(&self) -> bool {
        self.manager.is_none()
    }
}

/// A validated, normalized payload.
#[derive(Debug, Clone, Default)]
pub struct NormalizedProperties {
    /// Known properties after normalization and defaults.
    pub properties: PropertyMap,
    /// Unknown properties, passed through unvalidated.
    pub extensions: PropertyMap,
    /// Relationship changes to apply after the entity write.
    pub references: References,
    /// The initial password, when one was generated for a new user.
    pub generated_password: Option<SecretString>,
}

impl NormalizedProperties {
    /// The request body: known properties plus extensions.
    pub fn payload(&self) -> PropertyMap {
        let mut body = self.properties.clone();
        for (key, value) in &self.extensions {
            body.entry(key.clone()).or_insert_with(|| value.clone());
        }
        body
    }

    /// Whether the payload carries no entity properties.
    pub fn has_entity_changes(&self) -> bool {
        !self.properties.is_empty() || !self.extensions.is_empty()
    }

    /// A normalized property, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Validates and normalizes mutation payloads for one tenant.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    accepted_domains: Vec<String>,
}

impl Validator {
    /// Create a validator accepting principal names in `accepted_domains`.
    ///
    /// An empty list accepts any syntactically valid domain.
    pub fn new(accepted_domains: Vec<String>) -> Self {
        let accepted_domains = accepted_domains
            .into_iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { accepted_domains }
    }

    /// The configured principal name domains.
    pub fn accepted_domains(&self) -> &[String] {
        &self.accepted_domains
    }

    /// Validate a payload for `kind` on `family`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Validation`] naming the first offending
    /// property. No network call is made.
    pub fn validate(
        &self,
        family: EntityFamily,
        kind: OperationKind,
        input: &PropertyMap,
    ) -> DirectoryResult<NormalizedProperties> {
        let schema = schema_for(family)
            .ok_or_else(|| DirectoryError::validation(format!("{family} entities are read-only")))?;

        let creating = match kind {
            OperationKind::Create if schema.creatable => true,
            OperationKind::Update if schema.updatable => false,
            OperationKind::Create | OperationKind::Update => {
                return Err(DirectoryError::validation(format!(
                    "{family} entities do not support {}",
                    kind_name(kind)
                )));
            }
            _ => {
                if input.is_empty() {
                    return Ok(NormalizedProperties::default());
                }
                return Err(DirectoryError::validation(format!(
                    "{} on {family} does not accept properties",
                    kind_name(kind)
                )));
            }
        };

        let mut out = NormalizedProperties::default();
        let mut account_flags = AccountFlags::default();
        let mut password_shorthand: Option<String> = None;
        let mut force_change: Option<bool> = None;

        for (raw_key, value) in input {
            let key = raw_key.trim();

            if READ_ONLY.contains(&key) {
                return Err(DirectoryError::validation(format!("'{key}' is read-only")));
            }
            if !creating && schema.immutable_on_update.contains(&key) {
                return Err(DirectoryError::validation(format!(
                    "'{key}' cannot be changed after creation"
                )));
            }

            if family == EntityFamily::User {
                match key {
                    "password" => {
                        password_shorthand = Some(password_value(key, value)?);
                        continue;
                    }
                    "forceChangePasswordNextSignIn" => {
                        force_change = Some(bool_value(key, value)?);
                        continue;
                    }
                    "enable" => {
                        account_flags.enable = Some(bool_value(key, value)?);
                        continue;
                    }
                    "disable" => {
                        account_flags.disable = Some(bool_value(key, value)?);
                        continue;
                    }
                    "manager" => {
                        out.references.manager = Some(manager_change(value)?);
                        continue;
                    }
                    _ => {}
                }
            }

            let Some(field) = schema.field(key) else {
                out.extensions.insert(key.to_string(), value.clone());
                continue;
            };

            if value.is_null() {
                if creating {
                    continue;
                }
                if schema.required_on_create.contains(&key) {
                    return Err(DirectoryError::validation(format!("'{key}' cannot be cleared")));
                }
                out.properties.insert(key.to_string(), Value::Null);
                continue;
            }

            let normalized = self.normalize(field, value)?;
            out.properties.insert(key.to_string(), normalized);
        }

        if !out.extensions.is_empty() {
            tracing::debug!(
                family = %family,
                keys = ?out.extensions.keys().collect::<Vec<_>>(),
                "passing through unvalidated properties"
            );
        }

        if let Some(enabled) = account_flags.resolve(out.properties.get("accountEnabled"))? {
            out.properties
                .insert("accountEnabled".into(), Value::Bool(enabled));
        }

        match family {
            EntityFamily::User => {
                self.finish_user(&mut out, creating, password_shorthand, force_change)?
            }
            EntityFamily::Group if creating => finish_group(&mut out)?,
            _ => {}
        }

        if creating {
            for required in schema.required_on_create {
                if !out.properties.contains_key(*required) {
                    return Err(DirectoryError::validation(format!(
                        "'{required}' is required to create a {family}"
                    )));
                }
            }
        } else if !out.has_entity_changes() && out.references.is_empty() {
            return Err(DirectoryError::validation(format!(
                "no properties to update on {family}"
            )));
        }

        Ok(out)
    }

    fn finish_user(
        &self,
        out: &mut NormalizedProperties,
        creating: bool,
        password_shorthand: Option<String>,
        force_change: Option<bool>,
    ) -> DirectoryResult<()> {
        let profile_given = out.properties.contains_key("passwordProfile");
        if profile_given && password_shorthand.is_some() {
            return Err(DirectoryError::validation(
                "give either 'password' or 'passwordProfile', not both",
            ));
        }

        if let Some(Value::Object(profile)) = out.properties.get_mut("passwordProfile") {
            let password = profile.get("password").cloned().unwrap_or(Value::Null);
            profile.insert(
                "password".into(),
                Value::String(password_value("passwordProfile.password", &password)?),
            );
            if let Some(force) = force_change {
                profile.insert("forceChangePasswordNextSignIn".into(), Value::Bool(force));
            }
            profile
                .entry("forceChangePasswordNextSignIn")
                .or_insert(Value::Bool(true));
        } else if let Some(password) = password_shorthand {
            out.properties
                .insert("passwordProfile".into(), password_profile(password, force_change));
        } else if creating {
            let generated = password::generate_default()?;
            out.properties.insert(
                "passwordProfile".into(),
                password_profile(generated.clone(), force_change),
            );
            out.generated_password = Some(SecretString::from(generated));
        } else if force_change.is_some() {
            return Err(DirectoryError::validation(
                "'forceChangePasswordNextSignIn' requires a new password",
            ));
        }

        if creating {
            out.properties
                .entry("accountEnabled")
                .or_insert(Value::Bool(true));

            if !out.properties.contains_key("mailNickname") {
                if let Some(upn) = out.properties.get("userPrincipalName").and_then(Value::as_str) {
                    let local = upn.split('@').next().unwrap_or_default();
                    out.properties
                        .insert("mailNickname".into(), Value::String(derive_mail_nickname(local)?));
                }
            }
        }

        if let Some(ManagerChange::Set(manager_id)) = &out.references.manager {
            if manager_id.contains('@') {
                // Principal names are accepted as references, normalized like the UPN field.
                let normalized = self.principal_name(manager_id)?;
                out.references.manager = Some(ManagerChange::Set(normalized));
            }
        }

        Ok(())
    }

    fn normalize(&self, field: &Field, value: &Value) -> DirectoryResult<Value> {
        let name = field.name;
        match field.kind {
            FieldKind::Text { max } => {
                let text = non_blank_string(name, value)?;
                if text.chars().count() > max {
                    return Err(DirectoryError::validation(format!(
                        "'{name}' must be at most {max} characters"
                    )));
                }
                Ok(Value::String(text))
            }
            FieldKind::Bool => Ok(Value::Bool(bool_value(name, value)?)),
            FieldKind::StringList => Ok(Value::Array(
                string_list(name, value)?
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            )),
            FieldKind::EmailList => {
                let mut emails = Vec::new();
                for entry in string_list(name, value)? {
                    emails.push(Value::String(email(name, &entry)?));
                }
                Ok(Value::Array(emails))
            }
            FieldKind::PrincipalName => {
                let text = non_blank_string(name, value)?;
                Ok(Value::String(self.principal_name(&text)?))
            }
            FieldKind::Email => {
                let text = non_blank_string(name, value)?;
                Ok(Value::String(email(name, &text)?))
            }
            FieldKind::MailNickname => {
                let text = non_blank_string(name, value)?;
                validate_mail_nickname(name, &text)?;
                Ok(Value::String(text))
            }
            FieldKind::CountryCode => {
                let text = non_blank_string(name, value)?;
                if text.len() != 2 || !text.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(DirectoryError::validation(format!(
                        "'{name}' must be a two-letter country code, got '{text}'"
                    )));
                }
                Ok(Value::String(text.to_ascii_uppercase()))
            }
            FieldKind::Enumeration(allowed) => {
                let text = non_blank_string(name, value)?;
                allowed
                    .iter()
                    .find(|candidate| candidate.eq_ignore_ascii_case(&text))
                    .map(|canonical| Value::String((*canonical).to_string()))
                    .ok_or_else(|| {
                        DirectoryError::validation(format!(
                            "'{name}' must be one of {}, got '{text}'",
                            allowed.join(", ")
                        ))
                    })
            }
            FieldKind::Object => match value {
                Value::Object(map) => Ok(Value::Object(map.clone())),
                _ => Err(DirectoryError::validation(format!("'{name}' must be an object"))),
            },
            FieldKind::Any => Ok(value.clone()),
        }
    }

    /// Validate and normalize a user principal name.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Validation`] if the name is malformed or its
    /// domain is not accepted.
    pub fn principal_name(&self, raw: &str) -> DirectoryResult<String> {
        let upn = raw.trim().to_lowercase();
        let Some((local, domain)) = upn.rsplit_once('@') else {
            return Err(DirectoryError::validation(format!(
                "'userPrincipalName' must look like name@domain, got '{upn}'"
            )));
        };

        let local_ok = !local.is_empty()
            && local.len() <= 113
            && !local.starts_with('.')
            && !local.ends_with('.')
            && local
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "'.-_!#^~&$%*+/=?`{|}".contains(c));
        if !local_ok {
            return Err(DirectoryError::validation(format!(
                "'userPrincipalName' has an invalid name part: '{local}'"
            )));
        }
        if !is_valid_domain(domain) {
            return Err(DirectoryError::validation(format!(
                "'userPrincipalName' has an invalid domain: '{domain}'"
            )));
        }
        if !self.accepted_domains.is_empty() && !self.accepted_domains.iter().any(|d| d == domain) {
            return Err(DirectoryError::validation(format!(
                "domain '{domain}' is not an accepted domain for this tenant"
            )));
        }

        Ok(upn)
    }
}

fn kind_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Create => "create",
        OperationKind::Read => "read",
        OperationKind::Update => "update",
        OperationKind::Delete => "delete",
        OperationKind::List => "list",
        OperationKind::RelationshipChange => "relationship changes",
    }
}

/// Explicit enable/disable requests, folded into `accountEnabled`.
#[derive(Debug, Default)]
struct AccountFlags {
    enable: Option<bool>,
    disable: Option<bool>,
}

impl AccountFlags {
    fn resolve(&self, explicit: Option<&Value>) -> DirectoryResult<Option<bool>> {
        let from_enable = self.enable;
        let from_disable = self.disable.map(|d| !d);

        let target = match (from_enable, from_disable) {
            (Some(a), Some(b)) if a != b => {
                return Err(DirectoryError::validation(
                    "'enable' and 'disable' contradict each other",
                ));
            }
            (Some(a), _) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };

        if let (Some(target), Some(Value::Bool(explicit))) = (target, explicit) {
            if target != *explicit {
                return Err(DirectoryError::validation(
                    "'accountEnabled' contradicts the enable/disable flag",
                ));
            }
        }
        Ok(target)
    }
}

fn password_profile(password: String, force_change: Option<bool>) -> Value {
    let mut profile = Map::new();
    profile.insert("password".into(), Value::String(password));
    profile.insert(
        "forceChangePasswordNextSignIn".into(),
        Value::Bool(force_change.unwrap_or(true)),
    );
    Value::Object(profile)
}

fn password_value(name: &str, value: &Value) -> DirectoryResult<String> {
    let Value::String(password) = value else {
        return Err(DirectoryError::validation(format!("'{name}' must be a string")));
    };
    let len = password.chars().count();
    if !(password::MIN_PASSWORD_LENGTH..=password::MAX_PASSWORD_LENGTH).contains(&len) {
        return Err(DirectoryError::validation(format!(
            "'{name}' must be between {} and {} characters",
            password::MIN_PASSWORD_LENGTH,
            password::MAX_PASSWORD_LENGTH
        )));
    }
    Ok(password.clone())
}

fn manager_change(value: &Value) -> DirectoryResult<ManagerChange> {
    let id = match value {
        Value::Null => return Ok(ManagerChange::Remove),
        Value::String(id) => id.trim().to_string(),
        Value::Object(obj) => obj
            .get("id")
            .and_then(Value::as_str)
            .map(|id| id.trim().to_string())
            .ok_or_else(|| DirectoryError::validation("'manager' object must carry an 'id'"))?,
        _ => {
            return Err(DirectoryError::validation(
                "'manager' must be an id, an object with an id, or null",
            ))
        }
    };

    if id.is_empty() {
        Ok(ManagerChange::Remove)
    } else {
        Ok(ManagerChange::Set(id))
    }
}

fn non_blank_string(name: &str, value: &Value) -> DirectoryResult<String> {
    let Value::String(text) = value else {
        return Err(DirectoryError::validation(format!("'{name}' must be a string")));
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DirectoryError::validation(format!("'{name}' must not be blank")));
    }
    Ok(trimmed.to_string())
}

fn bool_value(name: &str, value: &Value) -> DirectoryResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(DirectoryError::validation(format!("'{name}' must be true or false"))),
    }
}

fn string_list(name: &str, value: &Value) -> DirectoryResult<Vec<String>> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::String(_) => vec![value],
        _ => {
            return Err(DirectoryError::validation(format!(
                "'{name}' must be a list of strings"
            )))
        }
    };

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::String(s) = entry else {
            return Err(DirectoryError::validation(format!(
                "'{name}' must be a list of strings"
            )));
        };
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
    Ok(out)
}

fn email(name: &str, raw: &str) -> DirectoryResult<String> {
    let address = raw.trim().to_lowercase();
    let valid = match address.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !local.chars().any(|c| c.is_whitespace() || c == '@')
                && is_valid_domain(domain)
                && domain.contains('.')
        }
        None => false,
    };
    if !valid {
        return Err(DirectoryError::validation(format!(
            "'{name}' is not a valid e-mail address: '{address}'"
        )));
    }
    Ok(address)
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_mail_nickname_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || MAIL_NICKNAME_SYMBOLS.contains(c)
}

fn validate_mail_nickname(name: &str, nickname: &str) -> DirectoryResult<()> {
    if nickname.len() > MAX_MAIL_NICKNAME_LEN {
        return Err(DirectoryError::validation(format!(
            "'{name}' must be at most {MAX_MAIL_NICKNAME_LEN} characters"
        )));
    }
    if let Some(bad) = nickname.chars().find(|c| !is_mail_nickname_char(*c)) {
        return Err(DirectoryError::validation(format!(
            "'{name}' contains an invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// Derive a mail nickname from free text by dropping disallowed characters.
///
/// # Errors
///
/// Returns [`DirectoryError::Validation`] if nothing usable remains.
pub fn derive_mail_nickname(source: &str) -> DirectoryResult<String> {
    let nickname: String = source
        .chars()
        .filter(|c| is_mail_nickname_char(*c))
        .take(MAX_MAIL_NICKNAME_LEN)
        .collect();
    if nickname.is_empty() {
        return Err(DirectoryError::validation(format!(
            "cannot derive a mail nickname from '{source}'"
        )));
    }
    Ok(nickname)
}

fn finish_group(out: &mut NormalizedProperties) -> DirectoryResult<()> {
    if !out.properties.contains_key("mailNickname") {
        if let Some(name) = out.properties.get("displayName").and_then(Value::as_str) {
            let nickname = derive_mail_nickname(name)?;
            out.properties
                .insert("mailNickname".into(), Value::String(nickname));
        }
    }
    out.properties
        .entry("mailEnabled")
        .or_insert(Value::Bool(false));
    out.properties
        .entry("securityEnabled")
        .or_insert(Value::Bool(true));
    out.properties
        .entry("groupTypes")
        .or_insert_with(|| Value::Array(Vec::new()));
    Ok(())
}
