//! Permission registrar: cached permission lists, per-user effective sets and gate registration
//!
//! # Cache layout
//!
//! ```text
//! {scope}:{key}                 → every stored permission
//! {scope}:{key}.user.{user_id}  → identities the user holds (direct ∪ active roles)
//! ```
//!
//! Both families expire after the configured TTL. A rebuild that races an
//! invalidation of its key is returned but not cached. Mutations reach
//! the registrar through [`StoreEvent`]s and invalidate only the users whose
//! effective set could have changed.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::check::{PermissionAbility, PermissionCheck};
use crate::config::PermissionsConfig;
use crate::error::{AuthzError, Result};
use crate::gate::Gate;
use crate::store::PermissionStore;
use crate::types::{Authorizable, PermissionId, PermissionRecord, RoleId, UserId};

/// Entity change notifications that require cache invalidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A permission was created or updated
    PermissionSaved(PermissionId),
    /// A permission was deleted; `affected_users` must be captured before the delete
    PermissionDeleted {
        id: PermissionId,
        affected_users: BTreeSet<UserId>,
    },
    /// A role was created or updated
    RoleSaved(RoleId),
    /// A role was deleted; `affected_users` must be captured before the delete
    RoleDeleted {
        id: RoleId,
        affected_users: BTreeSet<UserId>,
    },
    /// Permissions were granted to or revoked from a role
    RolePermissionsChanged(RoleId),
    /// A user's direct roles or permissions changed
    UserAssignmentsChanged(UserId),
    /// A user was deleted
    UserDeleted(UserId),
}

/// Loads, caches and invalidates permission data for one tenant scope
pub struct PermissionRegistrar<S: PermissionStore> {
    store: Arc<S>,
    config: PermissionsConfig,
    permissions: TtlCache<Arc<Vec<S::Permission>>>,
    user_permissions: TtlCache<Arc<BTreeSet<String>>>,
}

impl<S: PermissionStore> PermissionRegistrar<S> {
    /// Create a registrar over `store`
    pub fn new(store: Arc<S>, config: PermissionsConfig) -> Self {
        let ttl = config.cache_ttl();

        info!(
            "PermissionRegistrar initialized with scope={}, ttl={:?}, wildcard={}",
            config.cache.scope, ttl, config.use_wildcard_permissions
        );

        Self {
            store,
            config,
            permissions: TtlCache::new(ttl),
            user_permissions: TtlCache::new(ttl),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &PermissionsConfig {
        &self.config
    }

    fn permissions_key(&self) -> String {
        format!("{}:{}", self.config.cache.scope, self.config.cache.key)
    }

    fn user_key_prefix(&self) -> String {
        format!("{}.user.", self.permissions_key())
    }

    fn user_key(&self, user_id: UserId) -> String {
        format!("{}{}", self.user_key_prefix(), user_id)
    }

    /// Every stored permission, from cache or reloaded from the store
    pub async fn get_permissions(&self) -> Result<Arc<Vec<S::Permission>>> {
        let key = self.permissions_key();

        if let Some(permissions) = self.permissions.get(&key) {
            debug!("Cache hit for {}", key);
            return Ok(permissions);
        }

        debug!("Cache miss for {}, loading permissions", key);
        let generation = self.permissions.generation(&key);
        let permissions = Arc::new(self.store.list_permissions().await?);
        if !self
            .permissions
            .put_if_current(key.as_str(), Arc::clone(&permissions), generation)
        {
            debug!("{} was invalidated during load, not caching", key);
        }

        Ok(permissions)
    }

    /// Identities the user holds directly or through active roles, inactive permissions excluded
    pub async fn get_user_permissions<U: Authorizable + ?Sized>(
        &self,
        user: &U,
    ) -> Result<Arc<BTreeSet<String>>> {
        let user_id = user.auth_id();
        let key = self.user_key(user_id);

        if let Some(identities) = self.user_permissions.get(&key) {
            debug!("Cache hit for {}", key);
            return Ok(identities);
        }

        debug!("Cache miss for {}, computing effective permissions", key);
        let generation = self.user_permissions.generation(&key);
        let identities = Arc::new(self.store.effective_identities(user_id).await?);
        if !self
            .user_permissions
            .put_if_current(key.as_str(), Arc::clone(&identities), generation)
        {
            debug!("{} was invalidated during load, not caching", key);
        }

        Ok(identities)
    }

    /// Drop the cached permission list and every cached per-user set of this scope
    pub fn forget_cached_permissions(&self) {
        self.permissions.forget(&self.permissions_key());
        let removed = self.user_permissions.forget_prefix(&self.user_key_prefix());

        info!(
            "Permission cache invalidated for scope {} ({} user entries)",
            self.config.cache.scope, removed
        );
    }

    /// Drop one user's cached set
    pub fn forget_cached_user_permissions<U: Authorizable + ?Sized>(&self, user: &U) {
        self.forget_user(user.auth_id());
    }

    /// Drop the cached sets of the given users
    pub fn forget_cached_users<I>(&self, user_ids: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        for user_id in user_ids {
            self.forget_user(user_id);
        }
    }

    fn forget_user(&self, user_id: UserId) {
        if self.user_permissions.forget(&self.user_key(user_id)) {
            debug!("Forgot cached permissions for user {}", user_id);
        }
    }

    /// Whether a live per-user entry exists
    pub fn is_user_cached(&self, user_id: UserId) -> bool {
        self.user_permissions.contains(&self.user_key(user_id))
    }

    /// Observer hook: invalidate whatever an entity change can have made stale
    ///
    /// If the affected users cannot be determined the whole scope is invalidated.
    pub async fn handle_event(&self, event: StoreEvent) {
        debug!("Handling store event {:?}", event);

        match event {
            StoreEvent::PermissionSaved(id) => {
                self.permissions.forget(&self.permissions_key());
                match self.store.users_affected_by_permission(id).await {
                    Ok(users) => self.forget_cached_users(users),
                    Err(e) => self.fall_back_to_full_invalidation(e),
                }
            }
            StoreEvent::RoleSaved(id) => {
                self.permissions.forget(&self.permissions_key());
                match self.store.role_users(id).await {
                    Ok(users) => self.forget_cached_users(users),
                    Err(e) => self.fall_back_to_full_invalidation(e),
                }
            }
            StoreEvent::RolePermissionsChanged(id) => {
                match self.store.role_users(id).await {
                    Ok(users) => self.forget_cached_users(users),
                    Err(e) => self.fall_back_to_full_invalidation(e),
                }
            }
            StoreEvent::PermissionDeleted { affected_users, .. } => {
                self.permissions.forget(&self.permissions_key());
                self.forget_cached_users(affected_users);
            }
            StoreEvent::RoleDeleted { affected_users, .. } => {
                self.permissions.forget(&self.permissions_key());
                self.forget_cached_users(affected_users);
            }
            StoreEvent::UserAssignmentsChanged(user_id) | StoreEvent::UserDeleted(user_id) => {
                self.forget_user(user_id);
            }
        }
    }

    fn fall_back_to_full_invalidation(&self, error: AuthzError) {
        warn!(
            "Could not determine affected users ({}), invalidating scope {}",
            error, self.config.cache.scope
        );
        self.forget_cached_permissions();
    }

    /// Define a gate ability for every known permission identity
    ///
    /// Returns the number of abilities installed. Storage failures surface as
    /// [`AuthzError::LoaderFailure`] unless `console_mode` is set, in which case
    /// they are swallowed and nothing is registered.
    pub async fn register_permissions<U>(self: &Arc<Self>, gate: &Gate<U>) -> Result<usize>
    where
        U: Authorizable + ?Sized + 'static,
    {
        let permissions = match self.get_permissions().await {
            Ok(permissions) => permissions,
            Err(e) if self.config.console_mode => {
                debug!("Skipping permission registration in console mode: {}", e);
                return Ok(0);
            }
            Err(e) => return Err(AuthzError::LoaderFailure(e.to_string())),
        };

        let check = PermissionCheck::new(Arc::clone(self));
        for permission in permissions.iter() {
            let identity = permission.identity().to_string();
            let ability = PermissionAbility::new(identity.clone(), check.clone());
            gate.define(identity, Arc::new(ability)).await;
        }

        info!(
            "Registered {} permission abilities for scope {}",
            permissions.len(),
            self.config.cache.scope
        );

        Ok(permissions.len())
    }

    /// Combined statistics of both cache families
    pub fn cache_stats(&self) -> CacheStats {
        self.permissions
            .stats()
            .merge(self.user_permissions.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPermissionStore;
    use crate::types::{PermissionDraft, RoleDraft, UserId};

    async fn registrar() -> Arc<PermissionRegistrar<InMemoryPermissionStore>> {
        let store = Arc::new(InMemoryPermissionStore::new());
        Arc::new(PermissionRegistrar::new(store, PermissionsConfig::default()))
    }

    #[tokio::test]
    async fn test_permission_list_is_cached() {
        let registrar = registrar().await;
        registrar
            .store()
            .save_permission(PermissionDraft::new("Edit").identity("articles.edit"))
            .await
            .unwrap();

        assert_eq!(registrar.get_permissions().await.unwrap().len(), 1);

        registrar
            .store()
            .save_permission(PermissionDraft::new("Delete").identity("articles.delete"))
            .await
            .unwrap();

        // Stale until invalidated
        assert_eq!(registrar.get_permissions().await.unwrap().len(), 1);

        registrar.forget_cached_permissions();
        assert_eq!(registrar.get_permissions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_user_permissions_cached_per_user() {
        let registrar = registrar().await;
        let store = registrar.store().clone();
        let permission = store
            .save_permission(PermissionDraft::new("Edit").identity("articles.edit").active(true))
            .await
            .unwrap();
        store.attach_user_permissions(1, &[permission.id]).await.unwrap();

        let user: UserId = 1;
        assert!(registrar.get_user_permissions(&user).await.unwrap().contains("articles.edit"));
        assert!(registrar.is_user_cached(1));
        assert!(!registrar.is_user_cached(2));

        store.detach_user_permissions(1, None).await.unwrap();
        assert!(registrar.get_user_permissions(&user).await.unwrap().contains("articles.edit"));

        registrar.forget_cached_user_permissions(&user);
        assert!(registrar.get_user_permissions(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_role_event_only_invalidates_role_members() {
        let registrar = registrar().await;
        let store = registrar.store().clone();
        let role = store.save_role(RoleDraft::new("Editor").active(true)).await.unwrap();
        store.attach_user_roles(1, &[role.id]).await.unwrap();

        registrar.get_user_permissions(&1_i64).await.unwrap();
        registrar.get_user_permissions(&2_i64).await.unwrap();

        registrar.handle_event(StoreEvent::RoleSaved(role.id)).await;

        assert!(!registrar.is_user_cached(1));
        assert!(registrar.is_user_cached(2));
    }

    #[tokio::test]
    async fn test_deleted_event_uses_captured_users() {
        let registrar = registrar().await;
        registrar.get_user_permissions(&3_i64).await.unwrap();
        registrar.get_user_permissions(&4_i64).await.unwrap();
        registrar.get_permissions().await.unwrap();

        registrar
            .handle_event(StoreEvent::PermissionDeleted {
                id: 99,
                affected_users: [3].into_iter().collect(),
            })
            .await;

        assert!(!registrar.is_user_cached(3));
        assert!(registrar.is_user_cached(4));
    }

    #[tokio::test]
    async fn test_forget_all_clears_every_user() {
        let registrar = registrar().await;
        for user in 1..=5_i64 {
            registrar.get_user_permissions(&user).await.unwrap();
        }

        registrar.forget_cached_permissions();
        assert!((1..=5).all(|user| !registrar.is_user_cached(user)));
    }

    #[tokio::test]
    async fn test_register_permissions_defines_abilities() {
        let registrar = registrar().await;
        let store = registrar.store().clone();
        store
            .save_permission(PermissionDraft::new("Edit").identity("articles.edit").active(true))
            .await
            .unwrap();
        store
            .save_permission(PermissionDraft::new("Admin").identity("admin.permission").active(true))
            .await
            .unwrap();

        let gate: Gate<UserId> = Gate::new();
        assert_eq!(registrar.register_permissions(&gate).await.unwrap(), 2);
        assert_eq!(
            gate.abilities().await,
            vec!["admin.permission".to_string(), "articles.edit".to_string()]
        );
        assert!(!gate.allows(&1, "articles.edit").await);
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let registrar = registrar().await;
        registrar.get_permissions().await.unwrap();
        registrar.get_permissions().await.unwrap();
        registrar.get_user_permissions(&1_i64).await.unwrap();

        let stats = registrar.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 2);
    }
}
