//! Permission and role storage
//!
//! The [`PermissionStore`] trait is the entity store the registrar reads from
//! and the manager writes through. Record types are associated types so hosts
//! can bring their own permission and role structs as long as they expose the
//! [`PermissionRecord`] / [`RoleRecord`] capabilities.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{
    ActiveFilter, PermissionDraft, PermissionId, PermissionRecord, RoleDraft, RoleId, RoleRecord,
    UserId,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryPermissionStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPermissionStore;

/// Entity store for permissions, roles and their associations
#[async_trait]
pub trait PermissionStore: Send + Sync + 'static {
    /// Stored permission type
    type Permission: PermissionRecord;

    /// Stored role type
    type Role: RoleRecord;

    /// Find a permission by its exact identity
    async fn find_permission_by_identity(&self, identity: &str) -> Result<Self::Permission>;

    /// Find a permission by id
    async fn find_permission_by_id(&self, id: PermissionId) -> Result<Self::Permission>;

    /// Find a role by its exact identity
    async fn find_role_by_identity(&self, identity: &str) -> Result<Self::Role>;

    /// Find a role by id
    async fn find_role_by_id(&self, id: RoleId) -> Result<Self::Role>;

    /// List all permissions, ordered by id
    async fn list_permissions(&self) -> Result<Vec<Self::Permission>>;

    /// List all roles, ordered by id
    async fn list_roles(&self) -> Result<Vec<Self::Role>>;

    /// Insert (no id) or update (with id) a permission
    async fn save_permission(&self, draft: PermissionDraft) -> Result<Self::Permission>;

    /// Insert (no id) or update (with id) a role
    async fn save_role(&self, draft: RoleDraft) -> Result<Self::Role>;

    /// Delete a permission and every association row that references it
    async fn delete_permission(&self, id: PermissionId) -> Result<()>;

    /// Delete a role and every association row that references it
    async fn delete_role(&self, id: RoleId) -> Result<()>;

    /// Permissions granted to a role
    async fn role_permissions(
        &self,
        role_id: RoleId,
        filter: ActiveFilter,
    ) -> Result<Vec<Self::Permission>>;

    /// Users holding a role
    async fn role_users(&self, role_id: RoleId) -> Result<Vec<UserId>>;

    /// Roles granting a permission
    async fn permission_roles(
        &self,
        permission_id: PermissionId,
        filter: ActiveFilter,
    ) -> Result<Vec<Self::Role>>;

    /// Users holding a permission directly
    async fn permission_users(&self, permission_id: PermissionId) -> Result<Vec<UserId>>;

    /// Roles a user holds
    async fn user_roles(&self, user_id: UserId, filter: ActiveFilter) -> Result<Vec<Self::Role>>;

    /// Permissions a user holds directly
    async fn user_permissions(
        &self,
        user_id: UserId,
        filter: ActiveFilter,
    ) -> Result<Vec<Self::Permission>>;

    /// Grant permissions to a role; returns how many new rows were created
    async fn attach_role_permissions(
        &self,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> Result<usize>;

    /// Revoke permissions from a role (`None` revokes all); returns rows removed
    async fn detach_role_permissions(
        &self,
        role_id: RoleId,
        permission_ids: Option<&[PermissionId]>,
    ) -> Result<usize>;

    /// Give roles to a user; returns how many new rows were created
    async fn attach_user_roles(&self, user_id: UserId, role_ids: &[RoleId]) -> Result<usize>;

    /// Take roles from a user (`None` takes all); returns rows removed
    async fn detach_user_roles(&self, user_id: UserId, role_ids: Option<&[RoleId]>)
        -> Result<usize>;

    /// Give permissions directly to a user; returns how many new rows were created
    async fn attach_user_permissions(
        &self,
        user_id: UserId,
        permission_ids: &[PermissionId],
    ) -> Result<usize>;

    /// Take direct permissions from a user (`None` takes all); returns rows removed
    async fn detach_user_permissions(
        &self,
        user_id: UserId,
        permission_ids: Option<&[PermissionId]>,
    ) -> Result<usize>;

    /// Remove every association row of a deleted user; returns rows removed
    async fn purge_user(&self, user_id: UserId) -> Result<usize>;

    /// Identities of the active permissions a user holds directly or through active roles
    async fn effective_identities(&self, user_id: UserId) -> Result<BTreeSet<String>> {
        let mut identities: BTreeSet<String> = self
            .user_permissions(user_id, ActiveFilter::ActiveOnly)
            .await?
            .iter()
            .map(|permission| permission.identity().to_string())
            .collect();

        for role in self.user_roles(user_id, ActiveFilter::ActiveOnly).await? {
            for permission in self
                .role_permissions(role.id(), ActiveFilter::ActiveOnly)
                .await?
            {
                identities.insert(permission.identity().to_string());
            }
        }

        Ok(identities)
    }

    /// Users whose effective set can include the permission: direct holders plus holders of any granting role
    async fn users_affected_by_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<BTreeSet<UserId>> {
        let mut users: BTreeSet<UserId> = self
            .permission_users(permission_id)
            .await?
            .into_iter()
            .collect();

        let roles = self
            .permission_roles(permission_id, ActiveFilter::Any)
            .await?;
        let role_users =
            try_join_all(roles.iter().map(|role| self.role_users(role.id()))).await?;
        users.extend(role_users.into_iter().flatten());

        Ok(users)
    }
}
