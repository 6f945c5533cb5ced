//! Core permission and role types

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{AuthzError, Result};

/// Permission primary key
pub type PermissionId = i64;

/// Role primary key
pub type RoleId = i64;

/// Host user primary key
pub type UserId = i64;

/// Default role level; lower levels are more privileged
pub const DEFAULT_ROLE_LEVEL: i32 = 99;

/// A user-like entity owned by the host application.
///
/// Only a stable identifier is required: it keys the per-user cache entry
/// and the user side of the association tables.
pub trait Authorizable: Send + Sync {
    /// Stable identifier of the user
    fn auth_id(&self) -> UserId;
}

impl Authorizable for UserId {
    fn auth_id(&self) -> UserId {
        *self
    }
}

impl<T: Authorizable + ?Sized> Authorizable for &T {
    fn auth_id(&self) -> UserId {
        (**self).auth_id()
    }
}

/// Capabilities the registrar needs from a stored permission
pub trait PermissionRecord: Clone + Send + Sync + 'static {
    fn id(&self) -> PermissionId;
    fn name(&self) -> &str;
    fn identity(&self) -> &str;
    fn description(&self) -> Option<&str>;
    fn is_active(&self) -> bool;

    /// Draft carrying this permission's id, for updates
    fn to_draft(&self) -> PermissionDraft {
        PermissionDraft {
            id: Some(self.id()),
            name: self.name().to_string(),
            identity: self.identity().to_string(),
            description: self.description().map(str::to_string),
            active: self.is_active(),
        }
    }
}

/// Capabilities the registrar needs from a stored role
pub trait RoleRecord: Clone + Send + Sync + 'static {
    fn id(&self) -> RoleId;
    fn name(&self) -> &str;
    fn identity(&self) -> &str;
    fn description(&self) -> Option<&str>;
    fn is_active(&self) -> bool;
    fn level(&self) -> i32;
    fn is_default(&self) -> bool;

    fn to_draft(&self) -> RoleDraft {
        RoleDraft {
            id: Some(self.id()),
            name: self.name().to_string(),
            identity: self.identity().to_string(),
            description: self.description().map(str::to_string),
            active: self.is_active(),
            level: self.level(),
            default: self.is_default(),
        }
    }
}

/// Normalize a string into identity slug form.
///
/// Lowercases, keeps ASCII alphanumerics plus `.`, `_`, `*` and `-`, and
/// collapses every other run of characters into a single `-`.
///
/// ```
/// use rolegate_authz::types::slugify;
///
/// assert_eq!(slugify("Articles Edit"), "articles-edit");
/// assert_eq!(slugify("team.admin.*"), "team.admin.*");
/// ```
pub fn slugify(input: &str) -> String {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    static DASHES: OnceLock<Regex> = OnceLock::new();

    let disallowed = DISALLOWED.get_or_init(|| Regex::new(r"[^a-z0-9._*\-]+").unwrap());
    let dashes = DASHES.get_or_init(|| Regex::new(r"-{2,}").unwrap());

    let lowered = input.trim().to_lowercase();
    let replaced = disallowed.replace_all(&lowered, "-");
    let collapsed = dashes.replace_all(&replaced, "-");

    collapsed.trim_matches('-').to_string()
}

/// Resolve the identity to store: the explicit one if set, otherwise derived from the name
fn normalize_identity(identity: &str, name: &str) -> Result<String> {
    let source = if identity.trim().is_empty() { name } else { identity };
    let slug = slugify(source);

    if slug.is_empty() {
        return Err(AuthzError::InvalidInput(format!(
            "cannot derive an identity from name `{}`",
            name
        )));
    }

    Ok(slug)
}

/// Identity to keep when updating a record that already has `current`
///
/// A blank draft identity keeps `current`; anything else must normalize to it.
fn retain_identity(identity: &str, current: &str) -> Result<String> {
    if identity.trim().is_empty() {
        return Ok(current.to_string());
    }

    let slug = slugify(identity);
    if slug != current {
        return Err(AuthzError::InvalidInput(format!(
            "identity `{}` cannot be changed to `{}`",
            current, slug
        )));
    }

    Ok(slug)
}

/// Filter applied to relation accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveFilter {
    /// Active and inactive records
    #[default]
    Any,
    /// Active records only
    ActiveOnly,
    /// Inactive records only
    InactiveOnly,
}

impl ActiveFilter {
    pub fn matches(&self, active: bool) -> bool {
        match self {
            ActiveFilter::Any => true,
            ActiveFilter::ActiveOnly => active,
            ActiveFilter::InactiveOnly => !active,
        }
    }
}

/// Stored permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    /// Unique slug, e.g. `articles.edit`
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PermissionRecord for Permission {
    fn id(&self) -> PermissionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Stored role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_level")]
    pub level: i32,
    /// Marks the role as auto-assignable to new users
    #[serde(default)]
    pub default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_level() -> i32 {
    DEFAULT_ROLE_LEVEL
}

impl RoleRecord for Role {
    fn id(&self) -> RoleId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn is_default(&self) -> bool {
        self.default
    }
}

/// Permission to insert (no id) or update (with id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDraft {
    #[serde(default)]
    pub id: Option<PermissionId>,
    pub name: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active: bool,
}

impl PermissionDraft {
    /// Create a new, inactive permission draft
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            identity: String::new(),
            description: None,
            active: false,
        }
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Slug identity this draft will be stored under
    pub fn normalized_identity(&self) -> Result<String> {
        normalize_identity(&self.identity, &self.name)
    }

    /// Identity for an update of a record currently stored as `current`
    pub fn retained_identity(&self, current: &str) -> Result<String> {
        retain_identity(&self.identity, current)
    }
}

/// Role to insert (no id) or update (with id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDraft {
    #[serde(default)]
    pub id: Option<RoleId>,
    pub name: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_level")]
    pub level: i32,
    #[serde(default)]
    pub default: bool,
}

impl RoleDraft {
    /// Create a new, inactive, non-default role draft at level 99
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            identity: String::new(),
            description: None,
            active: false,
            level: DEFAULT_ROLE_LEVEL,
            default: false,
        }
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn default_role(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn normalized_identity(&self) -> Result<String> {
        normalize_identity(&self.identity, &self.name)
    }

    /// Identity for an update of a record currently stored as `current`
    pub fn retained_identity(&self, current: &str) -> Result<String> {
        retain_identity(&self.identity, current)
    }
}

/// Role ↔ permission association row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
}

/// User ↔ role association row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
}

/// User ↔ permission association row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserPermission {
    pub user_id: UserId,
    pub permission_id: PermissionId,
}
