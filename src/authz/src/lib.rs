//! # Rolegate Authorization
//!
//! Role and permission authorization with a cached registrar.
//!
//! ## Features
//!
//! - **Pluggable storage** through the async [`PermissionStore`] trait (in-memory and Postgres)
//! - **Per-user permission cache** with TTL expiry and targeted invalidation
//! - **Wildcard matching** (`articles.*`, `*`) with a strict mode toggle
//! - **Gate integration**: every permission identity becomes a named ability
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rolegate_authz::{
//!     Gate, InMemoryPermissionStore, PermissionDraft, PermissionManager,
//!     PermissionRegistrar, PermissionsConfig, RoleDraft, UserId,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryPermissionStore::new());
//!     let registrar = Arc::new(PermissionRegistrar::new(store, PermissionsConfig::default()));
//!     let manager = PermissionManager::new(Arc::clone(&registrar));
//!
//!     manager
//!         .create_permission(PermissionDraft::new("Edit articles").identity("articles.edit").active(true))
//!         .await?;
//!     let editor = manager.create_role(RoleDraft::new("Editor").active(true)).await?;
//!     manager.give_permission_to_role(&editor, ["articles.edit"]).await?;
//!
//!     let alice: UserId = 1;
//!     manager.assign_role(&alice, [&editor]).await?;
//!
//!     let gate: Gate<UserId> = Gate::new();
//!     registrar.register_permissions(&gate).await?;
//!
//!     if gate.allows(&alice, "articles.edit").await {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod check;
pub mod config;
pub mod error;
pub mod gate;
pub mod manager;
pub mod registrar;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::CacheStats;
pub use check::{PermissionAbility, PermissionCheck};
pub use config::PermissionsConfig;
pub use error::{AuthzError, LookupKey, Result};
pub use gate::{Ability, Gate};
pub use manager::{PermissionManager, PermissionRef, RoleRef};
pub use registrar::{PermissionRegistrar, StoreEvent};
pub use store::{InMemoryPermissionStore, PermissionStore};
#[cfg(feature = "postgres")]
pub use store::PostgresPermissionStore;
pub use types::{
    ActiveFilter, Authorizable, Permission, PermissionDraft, PermissionId, PermissionRecord, Role,
    RoleDraft, RoleId, RoleRecord, UserId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
