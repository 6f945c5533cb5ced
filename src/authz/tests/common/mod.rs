//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rolegate_authz::{
    ActiveFilter, AuthzError, InMemoryPermissionStore, Permission, PermissionCheck,
    PermissionDraft, PermissionId, PermissionManager, PermissionRegistrar, PermissionStore,
    PermissionsConfig, Result, Role, RoleDraft, RoleId, UserId,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tokio::sync::Notify;

static TRACING: Once = Once::new();

/// Route crate logs to the test harness; filter with `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Registrar, manager and check over one in-memory store
pub struct Fixture {
    pub registrar: Arc<PermissionRegistrar<InMemoryPermissionStore>>,
    pub manager: PermissionManager<InMemoryPermissionStore>,
    pub check: PermissionCheck<InMemoryPermissionStore>,
}

impl Fixture {
    pub fn new(config: PermissionsConfig) -> Self {
        init_tracing();

        let store = Arc::new(InMemoryPermissionStore::new());
        let registrar = Arc::new(PermissionRegistrar::new(store, config));

        Self {
            manager: PermissionManager::new(Arc::clone(&registrar)),
            check: PermissionCheck::new(Arc::clone(&registrar)),
            registrar,
        }
    }

    /// Create an active permission with the given identity
    pub async fn permission(&self, identity: &str) -> Permission {
        self.manager
            .create_permission(PermissionDraft::new(identity).identity(identity).active(true))
            .await
            .unwrap()
    }
}

/// Store whose backend is always unreachable
pub struct UnavailableStore;

fn unavailable<T>() -> Result<T> {
    Err(AuthzError::DatabaseError("connection refused".to_string()))
}

#[async_trait]
impl PermissionStore for UnavailableStore {
    type Permission = Permission;
    type Role = Role;

    async fn find_permission_by_identity(&self, _identity: &str) -> Result<Permission> {
        unavailable()
    }

    async fn find_permission_by_id(&self, _id: PermissionId) -> Result<Permission> {
        unavailable()
    }

    async fn find_role_by_identity(&self, _identity: &str) -> Result<Role> {
        unavailable()
    }

    async fn find_role_by_id(&self, _id: RoleId) -> Result<Role> {
        unavailable()
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        unavailable()
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        unavailable()
    }

    async fn save_permission(&self, _draft: PermissionDraft) -> Result<Permission> {
        unavailable()
    }

    async fn save_role(&self, _draft: RoleDraft) -> Result<Role> {
        unavailable()
    }

    async fn delete_permission(&self, _id: PermissionId) -> Result<()> {
        unavailable()
    }

    async fn delete_role(&self, _id: RoleId) -> Result<()> {
        unavailable()
    }

    async fn role_permissions(&self, _role_id: RoleId, _filter: ActiveFilter) -> Result<Vec<Permission>> {
        unavailable()
    }

    async fn role_users(&self, _role_id: RoleId) -> Result<Vec<UserId>> {
        unavailable()
    }

    async fn permission_roles(
        &self,
        _permission_id: PermissionId,
        _filter: ActiveFilter,
    ) -> Result<Vec<Role>> {
        unavailable()
    }

    async fn permission_users(&self, _permission_id: PermissionId) -> Result<Vec<UserId>> {
        unavailable()
    }

    async fn user_roles(&self, _user_id: UserId, _filter: ActiveFilter) -> Result<Vec<Role>> {
        unavailable()
    }

    async fn user_permissions(&self, _user_id: UserId, _filter: ActiveFilter) -> Result<Vec<Permission>> {
        unavailable()
    }

    async fn attach_role_permissions(&self, _role_id: RoleId, _ids: &[PermissionId]) -> Result<usize> {
        unavailable()
    }

    async fn detach_role_permissions(
        &self,
        _role_id: RoleId,
        _ids: Option<&[PermissionId]>,
    ) -> Result<usize> {
        unavailable()
    }

    async fn attach_user_roles(&self, _user_id: UserId, _ids: &[RoleId]) -> Result<usize> {
        unavailable()
    }

    async fn detach_user_roles(&self, _user_id: UserId, _ids: Option<&[RoleId]>) -> Result<usize> {
        unavailable()
    }

    async fn attach_user_permissions(&self, _user_id: UserId, _ids: &[PermissionId]) -> Result<usize> {
        unavailable()
    }

    async fn detach_user_permissions(
        &self,
        _user_id: UserId,
        _ids: Option<&[PermissionId]>,
    ) -> Result<usize> {
        unavailable()
    }

    async fn purge_user(&self, _user_id: UserId) -> Result<usize> {
        unavailable()
    }
}

/// In-memory store that can hold one `effective_identities` call open after
/// it has read the tables
///
/// Arm it with [`PausingStore::pause_next_load`]; the paused call signals
/// `loaded` and waits for `resume`.
#[derive(Default)]
pub struct PausingStore {
    pub inner: InMemoryPermissionStore,
    pub loaded: Notify,
    pub resume: Notify,
    armed: AtomicBool,
}

impl PausingStore {
    pub fn pause_next_load(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionStore for PausingStore {
    type Permission = Permission;
    type Role = Role;

    async fn find_permission_by_identity(&self, identity: &str) -> Result<Permission> {
        self.inner.find_permission_by_identity(identity).await
    }

    async fn find_permission_by_id(&self, id: PermissionId) -> Result<Permission> {
        self.inner.find_permission_by_id(id).await
    }

    async fn find_role_by_identity(&self, identity: &str) -> Result<Role> {
        self.inner.find_role_by_identity(identity).await
    }

    async fn find_role_by_id(&self, id: RoleId) -> Result<Role> {
        self.inner.find_role_by_id(id).await
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.inner.list_permissions().await
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        self.inner.list_roles().await
    }

    async fn save_permission(&self, draft: PermissionDraft) -> Result<Permission> {
        self.inner.save_permission(draft).await
    }

    async fn save_role(&self, draft: RoleDraft) -> Result<Role> {
        self.inner.save_role(draft).await
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<()> {
        self.inner.delete_permission(id).await
    }

    async fn delete_role(&self, id: RoleId) -> Result<()> {
        self.inner.delete_role(id).await
    }

    async fn role_permissions(&self, role_id: RoleId, filter: ActiveFilter) -> Result<Vec<Permission>> {
        self.inner.role_permissions(role_id, filter).await
    }

    async fn role_users(&self, role_id: RoleId) -> Result<Vec<UserId>> {
        self.inner.role_users(role_id).await
    }

    async fn permission_roles(
        &self,
        permission_id: PermissionId,
        filter: ActiveFilter,
    ) -> Result<Vec<Role>> {
        self.inner.permission_roles(permission_id, filter).await
    }

    async fn permission_users(&self, permission_id: PermissionId) -> Result<Vec<UserId>> {
        self.inner.permission_users(permission_id).await
    }

    async fn user_roles(&self, user_id: UserId, filter: ActiveFilter) -> Result<Vec<Role>> {
        self.inner.user_roles(user_id, filter).await
    }

    async fn user_permissions(&self, user_id: UserId, filter: ActiveFilter) -> Result<Vec<Permission>> {
        self.inner.user_permissions(user_id, filter).await
    }

    async fn attach_role_permissions(&self, role_id: RoleId, ids: &[PermissionId]) -> Result<usize> {
        self.inner.attach_role_permissions(role_id, ids).await
    }

    async fn detach_role_permissions(
        &self,
        role_id: RoleId,
        ids: Option<&[PermissionId]>,
    ) -> Result<usize> {
        self.inner.detach_role_permissions(role_id, ids).await
    }

    async fn attach_user_roles(&self, user_id: UserId, ids: &[RoleId]) -> Result<usize> {
        self.inner.attach_user_roles(user_id, ids).await
    }

    async fn detach_user_roles(&self, user_id: UserId, ids: Option<&[RoleId]>) -> Result<usize> {
        self.inner.detach_user_roles(user_id, ids).await
    }

    async fn attach_user_permissions(&self, user_id: UserId, ids: &[PermissionId]) -> Result<usize> {
        self.inner.attach_user_permissions(user_id, ids).await
    }

    async fn detach_user_permissions(
        &self,
        user_id: UserId,
        ids: Option<&[PermissionId]>,
    ) -> Result<usize> {
        self.inner.detach_user_permissions(user_id, ids).await
    }

    async fn purge_user(&self, user_id: UserId) -> Result<usize> {
        self.inner.purge_user(user_id).await
    }

    async fn effective_identities(&self, user_id: UserId) -> Result<BTreeSet<String>> {
        let identities = self.inner.effective_identities(user_id).await?;

        if self.armed.swap(false, Ordering::SeqCst) {
            self.loaded.notify_one();
            self.resume.notified().await;
        }

        Ok(identities)
    }
}
