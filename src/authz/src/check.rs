//! Permission check with wildcard matching
//!
//! Given a user and a requested permission identity, decide allow or deny
//! from the user's effective permission set. The check is fail-closed:
//! storage errors are logged and answered with `false`, never raised, so a
//! missing permission and a failed lookup look the same to the caller.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::gate::Ability;
use crate::registrar::PermissionRegistrar;
use crate::store::PermissionStore;
use crate::types::Authorizable;

/// Universal wildcard identity
pub const WILDCARD: &str = "*";

/// Identities that grant `identity` when wildcard matching is on.
///
/// The literal identity, the universal wildcard, and every dot-separated
/// prefix followed by `.*`:
///
/// ```
/// use rolegate_authz::check::wildcard_candidates;
///
/// assert_eq!(
///     wildcard_candidates("team.admin.edit"),
///     vec!["team.admin.edit", "*", "team.*", "team.admin.*"],
/// );
/// assert_eq!(wildcard_candidates("dashboard"), vec!["dashboard", "*"]);
/// ```
pub fn wildcard_candidates(identity: &str) -> Vec<String> {
    let mut candidates = vec![identity.to_string(), WILDCARD.to_string()];

    let segments: Vec<&str> = identity.split('.').collect();
    let mut prefix = String::with_capacity(identity.len());
    for segment in &segments[..segments.len() - 1] {
        prefix.push_str(segment);
        prefix.push('.');
        candidates.push(format!("{}{}", prefix, WILDCARD));
    }

    candidates
}

/// Whether a held identity set grants `identity`
///
/// Comparison is exact and case-sensitive; the requested identity is not normalized.
pub fn grants(held: &BTreeSet<String>, identity: &str, use_wildcard: bool) -> bool {
    if held.is_empty() {
        return false;
    }

    if use_wildcard {
        wildcard_candidates(identity)
            .iter()
            .any(|candidate| held.contains(candidate))
    } else {
        held.contains(identity)
    }
}

/// Answers "does this user hold this permission" through the registrar cache
pub struct PermissionCheck<S: PermissionStore> {
    registrar: Arc<PermissionRegistrar<S>>,
}

impl<S: PermissionStore> Clone for PermissionCheck<S> {
    fn clone(&self) -> Self {
        Self {
            registrar: Arc::clone(&self.registrar),
        }
    }
}

impl<S: PermissionStore> PermissionCheck<S> {
    pub fn new(registrar: Arc<PermissionRegistrar<S>>) -> Self {
        Self { registrar }
    }

    /// Decide whether `user` holds `identity`
    pub async fn check<U: Authorizable + ?Sized>(&self, user: &U, identity: &str) -> bool {
        let held = match self.registrar.get_user_permissions(user).await {
            Ok(held) => held,
            Err(e) => {
                warn!(
                    "Denying permission `{}` for user {}: failed to load permissions: {}",
                    identity,
                    user.auth_id(),
                    e
                );
                return false;
            }
        };

        let allowed = grants(
            &held,
            identity,
            self.registrar.config().use_wildcard_permissions,
        );

        debug!(
            "Permission check: user={} identity={} allowed={}",
            user.auth_id(),
            identity,
            allowed
        );

        allowed
    }

    /// Whether the user holds at least one of the identities
    pub async fn check_any<U: Authorizable + ?Sized>(&self, user: &U, identities: &[&str]) -> bool {
        for identity in identities {
            if self.check(user, identity).await {
                return true;
            }
        }
        false
    }

    /// Whether the user holds every one of the identities
    pub async fn check_all<U: Authorizable + ?Sized>(&self, user: &U, identities: &[&str]) -> bool {
        for identity in identities {
            if !self.check(user, identity).await {
                return false;
            }
        }
        true
    }
}

/// Gate ability for a single permission identity
pub struct PermissionAbility<S: PermissionStore> {
    identity: String,
    check: PermissionCheck<S>,
}

impl<S: PermissionStore> PermissionAbility<S> {
    pub fn new(identity: impl Into<String>, check: PermissionCheck<S>) -> Self {
        Self {
            identity: identity.into(),
            check,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[async_trait]
impl<S, U> Ability<U> for PermissionAbility<S>
where
    S: PermissionStore,
    U: Authorizable + ?Sized,
{
    async fn allows(&self, user: &U) -> bool {
        self.check.check(user, &self.identity).await
    }
}
