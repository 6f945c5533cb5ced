//! Registrar configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete permissions configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub table_names: TableNames,

    #[serde(default)]
    pub cache: CacheSection,

    /// Match `team.*` style identities against concrete ones
    #[serde(default = "default_true")]
    pub use_wildcard_permissions: bool,

    /// Running inside an administrative/console context; loader failures are swallowed
    #[serde(default)]
    pub console_mode: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            table_names: TableNames::default(),
            cache: CacheSection::default(),
            use_wildcard_permissions: true,
            console_mode: false,
        }
    }
}

/// Table name overrides
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TableNames {
    #[serde(default = "default_permissions_table")]
    pub permissions: String,
    #[serde(default = "default_roles_table")]
    pub roles: String,
    #[serde(default = "default_role_permissions_table")]
    pub role_permissions: String,
    #[serde(default = "default_user_roles_table")]
    pub user_roles: String,
    #[serde(default = "default_user_permissions_table")]
    pub user_permissions: String,
    /// Host-owned users table referenced by the user association foreign keys
    #[serde(default = "default_users_table")]
    pub users: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            permissions: default_permissions_table(),
            roles: default_roles_table(),
            role_permissions: default_role_permissions_table(),
            user_roles: default_user_roles_table(),
            user_permissions: default_user_permissions_table(),
            users: default_users_table(),
        }
    }
}

impl TableNames {
    fn all(&self) -> [(&'static str, &str); 6] {
        [
            ("permissions", &self.permissions),
            ("roles", &self.roles),
            ("role_permissions", &self.role_permissions),
            ("user_roles", &self.user_roles),
            ("user_permissions", &self.user_permissions),
            ("users", &self.users),
        ]
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSection {
    /// Time-to-live of cached permission lists and per-user sets
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Base cache key; per-user entries live under `{key}.user.{id}`
    #[serde(default = "default_cache_key")]
    pub key: String,
    /// Tenant scope the cache entries belong to
    #[serde(default = "default_cache_scope")]
    pub scope: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            key: default_cache_key(),
            scope: default_cache_scope(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_cache_ttl() -> u64 { 24 * 60 * 60 }
fn default_cache_key() -> String { "rolegate.permissions".to_string() }
fn default_cache_scope() -> String { "default".to_string() }
fn default_permissions_table() -> String { "permissions".to_string() }
fn default_roles_table() -> String { "roles".to_string() }
fn default_role_permissions_table() -> String { "role_permissions".to_string() }
fn default_user_roles_table() -> String { "user_roles".to_string() }
fn default_user_permissions_table() -> String { "user_permissions".to_string() }
fn default_users_table() -> String { "users".to_string() }

impl PermissionsConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .context("Failed to read permissions configuration file")?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: PermissionsConfig =
            toml::from_str(contents).context("Failed to parse permissions configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables on top of this configuration
    ///
    /// - `ROLEGATE_CACHE_TTL` - cache TTL in seconds
    /// - `ROLEGATE_CACHE_SCOPE` - tenant scope
    /// - `ROLEGATE_WILDCARD` - `true`/`false`
    /// - `ROLEGATE_CONSOLE` - `true`/`false`
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(ttl) = std::env::var("ROLEGATE_CACHE_TTL") {
            self.cache.ttl_secs = ttl
                .parse()
                .with_context(|| format!("Invalid ROLEGATE_CACHE_TTL `{}`", ttl))?;
        }

        if let Ok(scope) = std::env::var("ROLEGATE_CACHE_SCOPE") {
            self.cache.scope = scope;
        }

        if let Ok(flag) = std::env::var("ROLEGATE_WILDCARD") {
            self.use_wildcard_permissions = flag
                .parse()
                .with_context(|| format!("Invalid ROLEGATE_WILDCARD `{}`", flag))?;
        }

        if let Ok(flag) = std::env::var("ROLEGATE_CONSOLE") {
            self.console_mode = flag
                .parse()
                .with_context(|| format!("Invalid ROLEGATE_CONSOLE `{}`", flag))?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            anyhow::bail!("Cache TTL must be greater than zero");
        }

        if self.cache.key.trim().is_empty() {
            anyhow::bail!("Cache key must not be empty");
        }

        let tables = self.table_names.all();
        for (field, name) in &tables {
            if !is_sql_identifier(name) {
                anyhow::bail!("Table name for `{}` is not a valid identifier: `{}`", field, name);
            }
        }

        for (i, (field, name)) in tables.iter().enumerate() {
            if let Some((other, _)) = tables[i + 1..].iter().find(|(_, n)| n == name) {
                anyhow::bail!("Tables `{}` and `{}` share the name `{}`", field, other, name);
            }
        }

        Ok(())
    }

    /// Cache time-to-live
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

/// Letters, digits and underscores, optionally schema-qualified with one dot
fn is_sql_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return false;
    }

    parts.iter().all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
