//! Error types for the permission registrar and stores

use std::fmt;
use thiserror::Error;

/// Key used to look up a permission or role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    /// Numeric primary key
    Id(i64),
    /// Unique slug identity
    Identity(String),
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Id(id) => write!(f, "id `{}`", id),
            LookupKey::Identity(identity) => write!(f, "identity `{}`", identity),
        }
    }
}

impl From<i64> for LookupKey {
    fn from(id: i64) -> Self {
        LookupKey::Id(id)
    }
}

impl From<&str> for LookupKey {
    fn from(identity: &str) -> Self {
        LookupKey::Identity(identity.to_string())
    }
}

impl From<String> for LookupKey {
    fn from(identity: String) -> Self {
        LookupKey::Identity(identity)
    }
}

/// Authorization errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Permission lookup failed
    #[error("There is no permission with {0}")]
    PermissionNotFound(LookupKey),

    /// Role lookup failed
    #[error("There is no role with {0}")]
    RoleNotFound(LookupKey),

    /// Permissions could not be loaded for gate registration
    #[error("Failed to load permissions: {0}")]
    LoaderFailure(String),

    /// Unique constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// Whether this error is a permission or role lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AuthzError::PermissionNotFound(_) | AuthzError::RoleNotFound(_)
        )
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
