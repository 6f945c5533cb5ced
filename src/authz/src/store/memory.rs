//! In-memory permission store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::PermissionStore;
use crate::error::{AuthzError, LookupKey, Result};
use crate::types::{
    ActiveFilter, Permission, PermissionDraft, PermissionId, Role, RoleDraft, RoleId,
    RolePermission, UserId, UserPermission, UserRole,
};

#[derive(Debug, Default)]
struct Tables {
    permissions: HashMap<PermissionId, Permission>,
    roles: HashMap<RoleId, Role>,
    role_permissions: BTreeSet<RolePermission>,
    user_roles: BTreeSet<UserRole>,
    user_permissions: BTreeSet<UserPermission>,
    last_permission_id: PermissionId,
    last_role_id: RoleId,
}

impl Tables {
    fn permission(&self, id: PermissionId) -> Result<&Permission> {
        self.permissions
            .get(&id)
            .ok_or(AuthzError::PermissionNotFound(LookupKey::Id(id)))
    }

    fn role(&self, id: RoleId) -> Result<&Role> {
        self.roles
            .get(&id)
            .ok_or(AuthzError::RoleNotFound(LookupKey::Id(id)))
    }

    fn sorted_permissions<'a>(
        &self,
        ids: impl Iterator<Item = &'a PermissionId>,
        filter: ActiveFilter,
    ) -> Vec<Permission> {
        let mut permissions: Vec<Permission> = ids
            .filter_map(|id| self.permissions.get(id))
            .filter(|p| filter.matches(p.active))
            .cloned()
            .collect();
        permissions.sort_by_key(|p| p.id);
        permissions
    }

    fn sorted_roles<'a>(
        &self,
        ids: impl Iterator<Item = &'a RoleId>,
        filter: ActiveFilter,
    ) -> Vec<Role> {
        let mut roles: Vec<Role> = ids
            .filter_map(|id| self.roles.get(id))
            .filter(|r| filter.matches(r.active))
            .cloned()
            .collect();
        roles.sort_by_key(|r| r.id);
        roles
    }
}

/// Permission store backed by in-process hash maps
///
/// Association tables are ordered sets of id pairs, so attaching the same
/// pair twice is a no-op just like a unique constraint.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPermissionStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryPermissionStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    type Permission = Permission;
    type Role = Role;

    async fn find_permission_by_identity(&self, identity: &str) -> Result<Permission> {
        let tables = self.tables.read().await;
        tables
            .permissions
            .values()
            .find(|p| p.identity == identity)
            .cloned()
            .ok_or_else(|| AuthzError::PermissionNotFound(LookupKey::from(identity)))
    }

    async fn find_permission_by_id(&self, id: PermissionId) -> Result<Permission> {
        let tables = self.tables.read().await;
        tables.permission(id).cloned()
    }

    async fn find_role_by_identity(&self, identity: &str) -> Result<Role> {
        let tables = self.tables.read().await;
        tables
            .roles
            .values()
            .find(|r| r.identity == identity)
            .cloned()
            .ok_or_else(|| AuthzError::RoleNotFound(LookupKey::from(identity)))
    }

    async fn find_role_by_id(&self, id: RoleId) -> Result<Role> {
        let tables = self.tables.read().await;
        tables.role(id).cloned()
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        let tables = self.tables.read().await;
        Ok(tables.sorted_permissions(tables.permissions.keys(), ActiveFilter::Any))
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.sorted_roles(tables.roles.keys(), ActiveFilter::Any))
    }

    async fn save_permission(&self, draft: PermissionDraft) -> Result<Permission> {
        let mut tables = self.tables.write().await;
        let identity = match draft.id {
            Some(id) => draft.retained_identity(&tables.permission(id)?.identity)?,
            None => draft.normalized_identity()?,
        };

        if let Some(existing) = tables
            .permissions
            .values()
            .find(|p| p.identity == identity && Some(p.id) != draft.id)
        {
            return Err(AuthzError::Conflict(format!(
                "permission identity `{}` is already used by id {}",
                identity, existing.id
            )));
        }

        let now = Utc::now();
        let permission = match draft.id {
            Some(id) => {
                let current = tables.permission(id)?;
                Permission {
                    id,
                    name: draft.name,
                    identity,
                    description: draft.description,
                    active: draft.active,
                    created_at: current.created_at,
                    updated_at: now,
                }
            }
            None => {
                tables.last_permission_id += 1;
                Permission {
                    id: tables.last_permission_id,
                    name: draft.name,
                    identity,
                    description: draft.description,
                    active: draft.active,
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn save_role(&self, draft: RoleDraft) -> Result<Role> {
        let mut tables = self.tables.write().await;
        let identity = match draft.id {
            Some(id) => draft.retained_identity(&tables.role(id)?.identity)?,
            None => draft.normalized_identity()?,
        };

        if let Some(existing) = tables
            .roles
            .values()
            .find(|r| r.identity == identity && Some(r.id) != draft.id)
        {
            return Err(AuthzError::Conflict(format!(
                "role identity `{}` is already used by id {}",
                identity, existing.id
            )));
        }

        let now = Utc::now();
        let role = match draft.id {
            Some(id) => {
                let current = tables.role(id)?;
                Role {
                    id,
                    name: draft.name,
                    identity,
                    description: draft.description,
                    active: draft.active,
                    level: draft.level,
                    default: draft.default,
                    created_at: current.created_at,
                    updated_at: now,
                }
            }
            None => {
                tables.last_role_id += 1;
                Role {
                    id: tables.last_role_id,
                    name: draft.name,
                    identity,
                    description: draft.description,
                    active: draft.active,
                    level: draft.level,
                    default: draft.default,
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.permissions.remove(&id).is_none() {
            return Err(AuthzError::PermissionNotFound(LookupKey::Id(id)));
        }

        tables.role_permissions.retain(|row| row.permission_id != id);
        tables.user_permissions.retain(|row| row.permission_id != id);
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.roles.remove(&id).is_none() {
            return Err(AuthzError::RoleNotFound(LookupKey::Id(id)));
        }

        tables.role_permissions.retain(|row| row.role_id != id);
        tables.user_roles.retain(|row| row.role_id != id);
        Ok(())
    }

    async fn role_permissions(
        &self,
        role_id: RoleId,
        filter: ActiveFilter,
    ) -> Result<Vec<Permission>> {
        let tables = self.tables.read().await;
        let ids = tables
            .role_permissions
            .iter()
            .filter(|row| row.role_id == role_id)
            .map(|row| &row.permission_id);
        Ok(tables.sorted_permissions(ids, filter))
    }

    async fn role_users(&self, role_id: RoleId) -> Result<Vec<UserId>> {
        let tables = self.tables.read().await;
        let users: BTreeSet<UserId> = tables
            .user_roles
            .iter()
            .filter(|row| row.role_id == role_id)
            .map(|row| row.user_id)
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn permission_roles(
        &self,
        permission_id: PermissionId,
        filter: ActiveFilter,
    ) -> Result<Vec<Role>> {
        let tables = self.tables.read().await;
        let ids = tables
            .role_permissions
            .iter()
            .filter(|row| row.permission_id == permission_id)
            .map(|row| &row.role_id);
        Ok(tables.sorted_roles(ids, filter))
    }

    async fn permission_users(&self, permission_id: PermissionId) -> Result<Vec<UserId>> {
        let tables = self.tables.read().await;
        let users: BTreeSet<UserId> = tables
            .user_permissions
            .iter()
            .filter(|row| row.permission_id == permission_id)
            .map(|row| row.user_id)
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn user_roles(&self, user_id: UserId, filter: ActiveFilter) -> Result<Vec<Role>> {
        let tables = self.tables.read().await;
        let ids = tables
            .user_roles
            .iter()
            .filter(|row| row.user_id == user_id)
            .map(|row| &row.role_id);
        Ok(tables.sorted_roles(ids, filter))
    }

    async fn user_permissions(
        &self,
        user_id: UserId,
        filter: ActiveFilter,
    ) -> Result<Vec<Permission>> {
        let tables = self.tables.read().await;
        let ids = tables
            .user_permissions
            .iter()
            .filter(|row| row.user_id == user_id)
            .map(|row| &row.permission_id);
        Ok(tables.sorted_permissions(ids, filter))
    }

    async fn attach_role_permissions(
        &self,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;
        tables.role(role_id)?;
        for id in permission_ids {
            tables.permission(*id)?;
        }

        let inserted = permission_ids
            .iter()
            .filter(|id| {
                tables.role_permissions.insert(RolePermission {
                    role_id,
                    permission_id: **id,
                })
            })
            .count();
        Ok(inserted)
    }

    async fn detach_role_permissions(
        &self,
        role_id: RoleId,
        permission_ids: Option<&[PermissionId]>,
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.role_permissions.len();
        tables.role_permissions.retain(|row| {
            row.role_id != role_id
                || permission_ids.map_or(false, |ids| !ids.contains(&row.permission_id))
        });
        Ok(before - tables.role_permissions.len())
    }

    async fn attach_user_roles(&self, user_id: UserId, role_ids: &[RoleId]) -> Result<usize> {
        let mut tables = self.tables.write().await;
        for id in role_ids {
            tables.role(*id)?;
        }

        let inserted = role_ids
            .iter()
            .filter(|id| {
                tables.user_roles.insert(UserRole {
                    user_id,
                    role_id: **id,
                })
            })
            .count();
        Ok(inserted)
    }

    async fn detach_user_roles(
        &self,
        user_id: UserId,
        role_ids: Option<&[RoleId]>,
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.user_roles.len();
        tables.user_roles.retain(|row| {
            row.user_id != user_id || role_ids.map_or(false, |ids| !ids.contains(&row.role_id))
        });
        Ok(before - tables.user_roles.len())
    }

    async fn attach_user_permissions(
        &self,
        user_id: UserId,
        permission_ids: &[PermissionId],
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;
        for id in permission_ids {
            tables.permission(*id)?;
        }

        let inserted = permission_ids
            .iter()
            .filter(|id| {
                tables.user_permissions.insert(UserPermission {
                    user_id,
                    permission_id: **id,
                })
            })
            .count();
        Ok(inserted)
    }

    async fn detach_user_permissions(
        &self,
        user_id: UserId,
        permission_ids: Option<&[PermissionId]>,
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.user_permissions.len();
        tables.user_permissions.retain(|row| {
            row.user_id != user_id
                || permission_ids.map_or(false, |ids| !ids.contains(&row.permission_id))
        });
        Ok(before - tables.user_permissions.len())
    }

    async fn purge_user(&self, user_id: UserId) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.user_roles.len() + tables.user_permissions.len();
        tables.user_roles.retain(|row| row.user_id != user_id);
        tables.user_permissions.retain(|row| row.user_id != user_id);
        Ok(before - tables.user_roles.len() - tables.user_permissions.len())
    }
}
