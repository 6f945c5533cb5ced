//! Write-side operations on permissions, roles and their assignments
//!
//! Every mutation goes through the store and then notifies the registrar with
//! a [`StoreEvent`] so the affected cache entries are dropped.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AuthzError, Result};
use crate::registrar::{PermissionRegistrar, StoreEvent};
use crate::store::PermissionStore;
use crate::types::{
    ActiveFilter, Authorizable, PermissionDraft, PermissionId, PermissionRecord, RoleDraft,
    RoleId, RoleRecord,
};

/// Reference to a role by id, identity or record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRef {
    Id(RoleId),
    Identity(String),
    /// Absent reference; skipped by bulk operations
    Blank,
}

/// Reference to a permission by id, identity or record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionRef {
    Id(PermissionId),
    Identity(String),
    /// Absent reference; skipped by bulk operations
    Blank,
}

macro_rules! impl_ref_conversions {
    ($ref:ident, $record:ident) => {
        impl From<i64> for $ref {
            fn from(id: i64) -> Self {
                $ref::Id(id)
            }
        }

        impl From<&str> for $ref {
            fn from(identity: &str) -> Self {
                $ref::from(identity.to_string())
            }
        }

        impl From<String> for $ref {
            fn from(identity: String) -> Self {
                if identity.trim().is_empty() {
                    $ref::Blank
                } else {
                    $ref::Identity(identity)
                }
            }
        }

        impl<R: $record> From<&R> for $ref {
            fn from(record: &R) -> Self {
                $ref::Id(record.id())
            }
        }

        impl<T: Into<$ref>> From<Option<T>> for $ref {
            fn from(value: Option<T>) -> Self {
                value.map(Into::into).unwrap_or($ref::Blank)
            }
        }
    };
}

impl_ref_conversions!(RoleRef, RoleRecord);
impl_ref_conversions!(PermissionRef, PermissionRecord);

/// Administrative API over a store and its registrar
pub struct PermissionManager<S: PermissionStore> {
    store: Arc<S>,
    registrar: Arc<PermissionRegistrar<S>>,
}

impl<S: PermissionStore> PermissionManager<S> {
    pub fn new(registrar: Arc<PermissionRegistrar<S>>) -> Self {
        Self {
            store: Arc::clone(registrar.store()),
            registrar,
        }
    }

    pub fn registrar(&self) -> &Arc<PermissionRegistrar<S>> {
        &self.registrar
    }

    async fn find_role(&self, role: RoleRef) -> Result<S::Role> {
        match role {
            RoleRef::Id(id) => self.store.find_role_by_id(id).await,
            RoleRef::Identity(identity) => self.store.find_role_by_identity(&identity).await,
            RoleRef::Blank => Err(AuthzError::InvalidInput("empty role reference".to_string())),
        }
    }

    async fn find_permission(&self, permission: PermissionRef) -> Result<S::Permission> {
        match permission {
            PermissionRef::Id(id) => self.store.find_permission_by_id(id).await,
            PermissionRef::Identity(identity) => {
                self.store.find_permission_by_identity(&identity).await
            }
            PermissionRef::Blank => Err(AuthzError::InvalidInput(
                "empty permission reference".to_string(),
            )),
        }
    }

    /// Resolve references to existing ids, skipping blanks and duplicates
    async fn resolve_roles<I>(&self, roles: I) -> Result<Vec<RoleId>>
    where
        I: IntoIterator,
        I::Item: Into<RoleRef>,
    {
        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();

        for role in roles.into_iter().map(Into::into) {
            if role == RoleRef::Blank {
                continue;
            }
            let id = self.find_role(role).await?.id();
            if seen.insert(id) {
                ids.push(id);
            }
        }

        Ok(ids)
    }

    async fn resolve_permissions<I>(&self, permissions: I) -> Result<Vec<PermissionId>>
    where
        I: IntoIterator,
        I::Item: Into<PermissionRef>,
    {
        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();

        for permission in permissions.into_iter().map(Into::into) {
            if permission == PermissionRef::Blank {
                continue;
            }
            let id = self.find_permission(permission).await?.id();
            if seen.insert(id) {
                ids.push(id);
            }
        }

        Ok(ids)
    }

    /// Create a permission
    pub async fn create_permission(&self, draft: PermissionDraft) -> Result<S::Permission> {
        if draft.id.is_some() {
            return Err(AuthzError::InvalidInput(
                "new permission must not carry an id".to_string(),
            ));
        }

        let permission = self.store.save_permission(draft).await?;
        info!("Created permission {} ({})", permission.identity(), permission.id());
        self.registrar
            .handle_event(StoreEvent::PermissionSaved(permission.id()))
            .await;

        Ok(permission)
    }

    /// Update an existing permission; the draft must carry its id
    pub async fn update_permission(&self, draft: PermissionDraft) -> Result<S::Permission> {
        if draft.id.is_none() {
            return Err(AuthzError::InvalidInput(
                "permission update requires an id".to_string(),
            ));
        }

        let permission = self.store.save_permission(draft).await?;
        self.registrar
            .handle_event(StoreEvent::PermissionSaved(permission.id()))
            .await;

        Ok(permission)
    }

    /// Activate or deactivate a permission
    pub async fn set_permission_active(
        &self,
        permission: impl Into<PermissionRef>,
        active: bool,
    ) -> Result<S::Permission> {
        let mut draft = self.find_permission(permission.into()).await?.to_draft();
        draft.active = active;
        self.update_permission(draft).await
    }

    /// Delete a permission along with its role and user associations
    pub async fn delete_permission(&self, permission: impl Into<PermissionRef>) -> Result<()> {
        let id = self.find_permission(permission.into()).await?.id();
        let affected_users = self.store.users_affected_by_permission(id).await?;

        self.store.delete_permission(id).await?;
        info!(
            "Deleted permission {} ({} users affected)",
            id,
            affected_users.len()
        );
        self.registrar
            .handle_event(StoreEvent::PermissionDeleted { id, affected_users })
            .await;

        Ok(())
    }

    /// Create a role
    pub async fn create_role(&self, draft: RoleDraft) -> Result<S::Role> {
        if draft.id.is_some() {
            return Err(AuthzError::InvalidInput(
                "new role must not carry an id".to_string(),
            ));
        }

        let role = self.store.save_role(draft).await?;
        info!("Created role {} ({})", role.identity(), role.id());
        self.registrar
            .handle_event(StoreEvent::RoleSaved(role.id()))
            .await;

        Ok(role)
    }

    /// Update an existing role; the draft must carry its id
    pub async fn update_role(&self, draft: RoleDraft) -> Result<S::Role> {
        if draft.id.is_none() {
            return Err(AuthzError::InvalidInput(
                "role update requires an id".to_string(),
            ));
        }

        let role = self.store.save_role(draft).await?;
        self.registrar
            .handle_event(StoreEvent::RoleSaved(role.id()))
            .await;

        Ok(role)
    }

    /// Activate or deactivate a role; associations are left intact
    pub async fn set_role_active(&self, role: impl Into<RoleRef>, active: bool) -> Result<S::Role> {
        let mut draft = self.find_role(role.into()).await?.to_draft();
        draft.active = active;
        self.update_role(draft).await
    }

    /// Delete a role along with its permission and user associations
    pub async fn delete_role(&self, role: impl Into<RoleRef>) -> Result<()> {
        let id = self.find_role(role.into()).await?.id();
        let affected_users: BTreeSet<_> = self.store.role_users(id).await?.into_iter().collect();

        self.store.delete_role(id).await?;
        info!("Deleted role {} ({} users affected)", id, affected_users.len());
        self.registrar
            .handle_event(StoreEvent::RoleDeleted { id, affected_users })
            .await;

        Ok(())
    }

    /// Give roles to a user; returns how many were newly attached
    pub async fn assign_role<U, I>(&self, user: &U, roles: I) -> Result<usize>
    where
        U: Authorizable + ?Sized,
        I: IntoIterator,
        I::Item: Into<RoleRef>,
    {
        let user_id = user.auth_id();
        let ids = self.resolve_roles(roles).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let attached = self.store.attach_user_roles(user_id, &ids).await?;
        debug!("Assigned {} roles to user {}", attached, user_id);
        self.registrar
            .handle_event(StoreEvent::UserAssignmentsChanged(user_id))
            .await;

        Ok(attached)
    }

    /// Replace a user's roles with exactly the given set
    ///
    /// References are resolved before anything is detached, so an unknown
    /// reference leaves the current assignments untouched.
    pub async fn sync_roles<U, I>(&self, user: &U, roles: I) -> Result<usize>
    where
        U: Authorizable + ?Sized,
        I: IntoIterator,
        I::Item: Into<RoleRef>,
    {
        let user_id = user.auth_id();
        let ids = self.resolve_roles(roles).await?;

        self.store.detach_user_roles(user_id, None).await?;
        let attached = self.store.attach_user_roles(user_id, &ids).await?;
        self.registrar
            .handle_event(StoreEvent::UserAssignmentsChanged(user_id))
            .await;

        Ok(attached)
    }

    /// Take roles from a user; returns how many were detached
    pub async fn remove_role<U, I>(&self, user: &U, roles: I) -> Result<usize>
    where
        U: Authorizable + ?Sized,
        I: IntoIterator,
        I::Item: Into<RoleRef>,
    {
        let user_id = user.auth_id();
        let ids = self.resolve_roles(roles).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let detached = self.store.detach_user_roles(user_id, Some(&ids)).await?;
        self.registrar
            .handle_event(StoreEvent::UserAssignmentsChanged(user_id))
            .await;

        Ok(detached)
    }

    /// Whether the user holds the role, active or not
    pub async fn has_role<U>(&self, user: &U, role: impl Into<RoleRef>) -> Result<bool>
    where
        U: Authorizable + ?Sized,
    {
        let role = role.into();
        if role == RoleRef::Blank {
            return Ok(false);
        }

        let roles = self.roles_of(user).await?;
        Ok(roles.iter().any(|held| match &role {
            RoleRef::Id(id) => held.id() == *id,
            RoleRef::Identity(identity) => held.identity() == identity,
            RoleRef::Blank => false,
        }))
    }

    /// Whether the user holds at least one of the roles
    pub async fn has_any_role<U, I>(&self, user: &U, roles: I) -> Result<bool>
    where
        U: Authorizable + ?Sized,
        I: IntoIterator,
        I::Item: Into<RoleRef>,
    {
        for role in roles {
            if self.has_role(user, role).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every role the user holds, ordered by id
    pub async fn roles_of<U: Authorizable + ?Sized>(&self, user: &U) -> Result<Vec<S::Role>> {
        self.store
            .user_roles(user.auth_id(), ActiveFilter::Any)
            .await
    }

    /// Attach every active default role to the user
    pub async fn assign_default_roles<U: Authorizable + ?Sized>(&self, user: &U) -> Result<usize> {
        let defaults: Vec<RoleId> = self
            .store
            .list_roles()
            .await?
            .iter()
            .filter(|role| role.is_active() && role.is_default())
            .map(|role| role.id())
            .collect();

        self.assign_role(user, defaults).await
    }

    /// Give permissions directly to a user; returns how many were newly attached
    pub async fn assign_permission<U, I>(&self, user: &U, permissions: I) -> Result<usize>
    where
        U: Authorizable + ?Sized,
        I: IntoIterator,
        I::Item: Into<PermissionRef>,
    {
        let user_id = user.auth_id();
        let ids = self.resolve_permissions(permissions).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let attached = self.store.attach_user_permissions(user_id, &ids).await?;
        debug!("Assigned {} permissions to user {}", attached, user_id);
        self.registrar
            .handle_event(StoreEvent::UserAssignmentsChanged(user_id))
            .await;

        Ok(attached)
    }

    /// Replace a user's direct permissions with exactly the given set
    pub async fn sync_permissions<U, I>(&self, user: &U, permissions: I) -> Result<usize>
    where
        U: Authorizable + ?Sized,
        I: IntoIterator,
        I::Item: Into<PermissionRef>,
    {
        let user_id = user.auth_id();
        let ids = self.resolve_permissions(permissions).await?;

        self.store.detach_user_permissions(user_id, None).await?;
        let attached = self.store.attach_user_permissions(user_id, &ids).await?;
        self.registrar
            .handle_event(StoreEvent::UserAssignmentsChanged(user_id))
            .await;

        Ok(attached)
    }

    /// Take direct permissions from a user; returns how many were detached
    pub async fn remove_permission<U, I>(&self, user: &U, permissions: I) -> Result<usize>
    where
        U: Authorizable + ?Sized,
        I: IntoIterator,
        I::Item: Into<PermissionRef>,
    {
        let user_id = user.auth_id();
        let ids = self.resolve_permissions(permissions).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let detached = self
            .store
            .detach_user_permissions(user_id, Some(&ids))
            .await?;
        self.registrar
            .handle_event(StoreEvent::UserAssignmentsChanged(user_id))
            .await;

        Ok(detached)
    }

    /// Permissions the user holds directly, ordered by id
    pub async fn permissions_of<U: Authorizable + ?Sized>(
        &self,
        user: &U,
    ) -> Result<Vec<S::Permission>> {
        self.store
            .user_permissions(user.auth_id(), ActiveFilter::Any)
            .await
    }

    /// Grant permissions to a role; returns how many were newly attached
    pub async fn give_permission_to_role<I>(
        &self,
        role: impl Into<RoleRef>,
        permissions: I,
    ) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<PermissionRef>,
    {
        let role_id = self.find_role(role.into()).await?.id();
        let ids = self.resolve_permissions(permissions).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let attached = self.store.attach_role_permissions(role_id, &ids).await?;
        self.registrar
            .handle_event(StoreEvent::RolePermissionsChanged(role_id))
            .await;

        Ok(attached)
    }

    /// Replace a role's permissions with exactly the given set
    pub async fn sync_role_permissions<I>(
        &self,
        role: impl Into<RoleRef>,
        permissions: I,
    ) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<PermissionRef>,
    {
        let role_id = self.find_role(role.into()).await?.id();
        let ids = self.resolve_permissions(permissions).await?;

        self.store.detach_role_permissions(role_id, None).await?;
        let attached = self.store.attach_role_permissions(role_id, &ids).await?;
        self.registrar
            .handle_event(StoreEvent::RolePermissionsChanged(role_id))
            .await;

        Ok(attached)
    }

    /// Revoke permissions from a role; returns how many were detached
    pub async fn revoke_permission_from_role<I>(
        &self,
        role: impl Into<RoleRef>,
        permissions: I,
    ) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<PermissionRef>,
    {
        let role_id = self.find_role(role.into()).await?.id();
        let ids = self.resolve_permissions(permissions).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let detached = self
            .store
            .detach_role_permissions(role_id, Some(&ids))
            .await?;
        self.registrar
            .handle_event(StoreEvent::RolePermissionsChanged(role_id))
            .await;

        Ok(detached)
    }

    /// Remove every association of a deleted user and drop its cache entry
    pub async fn delete_user<U: Authorizable + ?Sized>(&self, user: &U) -> Result<usize> {
        let user_id = user.auth_id();
        let removed = self.store.purge_user(user_id).await?;

        info!("Purged {} association rows of user {}", removed, user_id);
        self.registrar
            .handle_event(StoreEvent::UserDeleted(user_id))
            .await;

        Ok(removed)
    }
}
