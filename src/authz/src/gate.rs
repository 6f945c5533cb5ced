//! Named-ability authorization gate
//!
//! The gate is the registry the host application asks "may this user do X".
//! Abilities are async predicates keyed by name; `before` hooks run ahead of
//! every ability and may short-circuit the answer.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::Authorizable;

/// A named boolean predicate over a user
#[async_trait]
pub trait Ability<U: ?Sized>: Send + Sync {
    async fn allows(&self, user: &U) -> bool;
}

/// Hook evaluated before any ability; `Some` decides, `None` defers
pub type BeforeHook<U> = Arc<dyn Fn(&U, &str) -> Option<bool> + Send + Sync>;

/// Ability backed by a synchronous closure
pub struct FnAbility<F>(pub F);

#[async_trait]
impl<U, F> Ability<U> for FnAbility<F>
where
    U: Authorizable + ?Sized,
    F: Fn(&U) -> bool + Send + Sync,
{
    async fn allows(&self, user: &U) -> bool {
        (self.0)(user)
    }
}

/// Registry of named abilities
pub struct Gate<U: ?Sized> {
    abilities: RwLock<HashMap<String, Arc<dyn Ability<U>>>>,
    before: RwLock<Vec<BeforeHook<U>>>,
}

impl<U: Authorizable + ?Sized> Gate<U> {
    /// Create an empty gate
    pub fn new() -> Self {
        Self {
            abilities: RwLock::new(HashMap::new()),
            before: RwLock::new(Vec::new()),
        }
    }

    /// Define (or replace) an ability
    pub async fn define(&self, name: impl Into<String>, ability: Arc<dyn Ability<U>>) {
        self.abilities.write().await.insert(name.into(), ability);
    }

    /// Define an ability from a synchronous closure
    pub async fn define_fn<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&U) -> bool + Send + Sync + 'static,
        U: 'static,
    {
        self.define(name, Arc::new(FnAbility(predicate))).await;
    }

    /// Register a hook that runs before every ability check
    pub async fn before<F>(&self, hook: F)
    where
        F: Fn(&U, &str) -> Option<bool> + Send + Sync + 'static,
    {
        self.before.write().await.push(Arc::new(hook));
    }

    /// Whether an ability with this name is defined
    pub async fn has(&self, name: &str) -> bool {
        self.abilities.read().await.contains_key(name)
    }

    /// Names of every defined ability, sorted
    pub async fn abilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.abilities.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Decide whether `user` may perform `name`
    ///
    /// Undefined abilities are denied.
    pub async fn allows(&self, user: &U, name: &str) -> bool {
        let hooks = self.before.read().await.clone();
        for hook in &hooks {
            if let Some(decision) = hook(user, name) {
                debug!(
                    "Before hook decided ability={} user={} allowed={}",
                    name,
                    user.auth_id(),
                    decision
                );
                return decision;
            }
        }

        let ability = self.abilities.read().await.get(name).cloned();
        match ability {
            Some(ability) => ability.allows(user).await,
            None => {
                debug!("Ability not defined: {}", name);
                false
            }
        }
    }

    /// Inverse of [`Gate::allows`]
    pub async fn denies(&self, user: &U, name: &str) -> bool {
        !self.allows(user, name).await
    }

    /// Whether the user is allowed every one of the abilities
    pub async fn allows_all(&self, user: &U, names: &[&str]) -> bool {
        for name in names {
            if !self.allows(user, name).await {
                return false;
            }
        }
        true
    }

    /// Whether the user is allowed at least one of the abilities
    pub async fn allows_any(&self, user: &U, names: &[&str]) -> bool {
        for name in names {
            if self.allows(user, name).await {
                return true;
            }
        }
        false
    }
}

impl<U: Authorizable + ?Sized> Default for Gate<U> {
    fn default() -> Self {
        Self::new()
    }
}
