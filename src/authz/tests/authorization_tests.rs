//! Authorization check tests
//!
//! Direct and role-based grants, wildcard matching, invalidation after
//! mutations, gate integration and loader failure handling.

mod common;

use common::{Fixture, UnavailableStore};
use proptest::prelude::*;
use rolegate_authz::{
    check::{grants, wildcard_candidates},
    AuthzError, Gate, PermissionDraft, PermissionRecord, PermissionRegistrar, PermissionsConfig,
    RoleDraft, UserId,
};
use std::collections::BTreeSet;
use std::sync::Arc;

const ALICE: UserId = 1;
const BOB: UserId = 2;

// ============================================================================
// DIRECT AND ROLE GRANTS
// ============================================================================

#[tokio::test]
async fn test_unheld_identity_is_denied() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.edit").await;

    assert!(!fx.check.check(&ALICE, "articles.edit").await);
    assert!(!fx.check.check(&ALICE, "nonexistent").await);
}

#[tokio::test]
async fn test_direct_assignment_grants() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.edit").await;

    // Prime the cache with the empty set
    assert!(!fx.check.check(&ALICE, "articles.edit").await);

    fx.manager
        .assign_permission(&ALICE, ["articles.edit"])
        .await
        .unwrap();

    assert!(fx.check.check(&ALICE, "articles.edit").await);
    assert!(!fx.check.check(&BOB, "articles.edit").await);
}

#[tokio::test]
async fn test_role_assignment_grants_until_role_deactivated() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.publish").await;
    let editor = fx
        .manager
        .create_role(RoleDraft::new("Editor").active(true))
        .await
        .unwrap();
    fx.manager
        .give_permission_to_role(&editor, ["articles.publish"])
        .await
        .unwrap();
    fx.manager.assign_role(&ALICE, [&editor]).await.unwrap();

    assert!(fx.check.check(&ALICE, "articles.publish").await);

    fx.manager.set_role_active(&editor, false).await.unwrap();

    assert!(!fx.check.check(&ALICE, "articles.publish").await);
    assert!(fx.manager.has_role(&ALICE, "editor").await.unwrap());
}

#[tokio::test]
async fn test_inactive_permission_is_not_granted() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.manager
        .create_permission(PermissionDraft::new("Drafts").identity("articles.drafts"))
        .await
        .unwrap();
    fx.manager
        .assign_permission(&ALICE, ["articles.drafts"])
        .await
        .unwrap();

    assert!(!fx.check.check(&ALICE, "articles.drafts").await);

    fx.manager
        .set_permission_active("articles.drafts", true)
        .await
        .unwrap();
    assert!(fx.check.check(&ALICE, "articles.drafts").await);
}

#[tokio::test]
async fn test_removing_assignment_revokes() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.edit").await;
    fx.manager
        .assign_permission(&ALICE, ["articles.edit"])
        .await
        .unwrap();
    assert!(fx.check.check(&ALICE, "articles.edit").await);

    fx.manager
        .remove_permission(&ALICE, ["articles.edit"])
        .await
        .unwrap();

    assert!(!fx.check.check(&ALICE, "articles.edit").await);
}

#[tokio::test]
async fn test_assign_twice_keeps_one_row() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.edit").await;

    assert_eq!(
        fx.manager
            .assign_permission(&ALICE, ["articles.edit"])
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        fx.manager
            .assign_permission(&ALICE, ["articles.edit"])
            .await
            .unwrap(),
        0
    );

    assert_eq!(fx.manager.permissions_of(&ALICE).await.unwrap().len(), 1);
    assert!(fx.check.check(&ALICE, "articles.edit").await);
}

#[tokio::test]
async fn test_deleting_user_removes_associations() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.edit").await;
    fx.manager
        .create_role(RoleDraft::new("Editor").active(true))
        .await
        .unwrap();
    fx.manager.assign_role(&ALICE, ["editor"]).await.unwrap();
    fx.manager
        .assign_permission(&ALICE, ["articles.edit"])
        .await
        .unwrap();
    assert!(fx.check.check(&ALICE, "articles.edit").await);

    fx.manager.delete_user(&ALICE).await.unwrap();

    assert!(fx.manager.roles_of(&ALICE).await.unwrap().is_empty());
    assert!(fx.manager.permissions_of(&ALICE).await.unwrap().is_empty());
    assert!(!fx.check.check(&ALICE, "articles.edit").await);
}

#[tokio::test]
async fn test_direct_permission_scenario() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.edit").await;
    fx.permission("admin.permission").await;
    fx.manager
        .assign_permission(&ALICE, ["articles.edit"])
        .await
        .unwrap();

    assert!(fx.check.check(&ALICE, "articles.edit").await);
    assert!(!fx.check.check(&ALICE, "admin.permission").await);
    assert!(!fx.check.check(&ALICE, "nonexistent").await);
}

// ============================================================================
// WILDCARDS
// ============================================================================

#[tokio::test]
async fn test_wildcard_toggle() {
    let enabled = Fixture::new(PermissionsConfig::default());
    let disabled = Fixture::new(PermissionsConfig {
        use_wildcard_permissions: false,
        ..Default::default()
    });

    for fx in [&enabled, &disabled] {
        fx.permission("articles.*").await;
        fx.manager
            .assign_permission(&ALICE, ["articles.*"])
            .await
            .unwrap();
    }

    assert!(enabled.check.check(&ALICE, "articles.edit").await);
    assert!(!disabled.check.check(&ALICE, "articles.edit").await);
    assert!(disabled.check.check(&ALICE, "articles.*").await);
}

#[tokio::test]
async fn test_universal_wildcard_through_role() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("*").await;
    let admin = fx
        .manager
        .create_role(RoleDraft::new("Super Admin").active(true).level(1))
        .await
        .unwrap();
    fx.manager.give_permission_to_role(&admin, ["*"]).await.unwrap();
    fx.manager.assign_role(&ALICE, ["super-admin"]).await.unwrap();

    assert!(fx.check.check(&ALICE, "anything.at.all").await);
    assert!(
        fx.check
            .check_all(&ALICE, &["dashboard", "team.admin.edit"])
            .await
    );
    assert!(!fx.check.check(&BOB, "dashboard").await);
}

proptest! {
    #[test]
    fn test_candidates_cover_every_prefix(segments in prop::collection::vec("[a-z]{1,6}", 1..6)) {
        let identity = segments.join(".");
        let candidates = wildcard_candidates(&identity);

        prop_assert_eq!(candidates.len(), segments.len() + 1);
        prop_assert_eq!(&candidates[0], &identity);
        prop_assert_eq!(candidates[1].as_str(), "*");
        for (i, candidate) in candidates.iter().skip(2).enumerate() {
            prop_assert_eq!(candidate, &format!("{}.*", segments[..=i].join(".")));
        }
    }

    #[test]
    fn test_prefix_wildcard_grants_descendants(
        prefix in "[a-z]{1,8}",
        rest in prop::collection::vec("[a-z0-9]{1,6}", 1..4)
    ) {
        let held: BTreeSet<String> = [format!("{}.*", prefix)].into_iter().collect();
        let identity = format!("{}.{}", prefix, rest.join("."));

        prop_assert!(grants(&held, &identity, true));
        prop_assert!(!grants(&held, &identity, false));
        prop_assert!(!grants(&held, &prefix, true));
    }

    #[test]
    fn test_check_matches_grants(identity in "[a-z]{1,5}(\\.[a-z]{1,5}){0,3}") {
        tokio_test::block_on(async {
            let fx = Fixture::new(PermissionsConfig::default());
            fx.permission(&identity).await;
            fx.manager.assign_permission(&ALICE, [identity.as_str()]).await.unwrap();

            assert!(fx.check.check(&ALICE, &identity).await);
            assert!(!fx.check.check(&BOB, &identity).await);
        });
    }
}

// ============================================================================
// GATE INTEGRATION
// ============================================================================

#[tokio::test]
async fn test_registered_abilities_delegate_to_check() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.edit").await;
    fx.permission("articles.delete").await;
    fx.manager
        .assign_permission(&ALICE, ["articles.edit"])
        .await
        .unwrap();

    let gate: Gate<UserId> = Gate::new();
    assert_eq!(fx.registrar.register_permissions(&gate).await.unwrap(), 2);

    assert!(gate.allows(&ALICE, "articles.edit").await);
    assert!(gate.denies(&ALICE, "articles.delete").await);
    assert!(gate.denies(&ALICE, "unregistered").await);
}

#[tokio::test]
async fn test_identity_change_is_rejected_after_registration() {
    let fx = Fixture::new(PermissionsConfig::default());
    let permission = fx.permission("articles.edit").await;
    fx.manager
        .assign_permission(&ALICE, ["articles.edit"])
        .await
        .unwrap();

    let gate: Gate<UserId> = Gate::new();
    fx.registrar.register_permissions(&gate).await.unwrap();

    let mut draft = permission.to_draft();
    draft.identity = "admin.everything".to_string();
    let err = fx.manager.update_permission(draft).await.unwrap_err();
    assert!(matches!(err, AuthzError::InvalidInput(_)));

    let mut draft = permission.to_draft();
    draft.name = "Edit any article".to_string();
    let renamed = fx.manager.update_permission(draft).await.unwrap();
    assert_eq!(renamed.identity, "articles.edit");

    assert!(gate.allows(&ALICE, "articles.edit").await);
    assert!(fx.check.check(&ALICE, "articles.edit").await);
}

#[tokio::test]
async fn test_before_hook_overrides_registered_abilities() {
    let fx = Fixture::new(PermissionsConfig::default());
    fx.permission("articles.edit").await;

    let gate: Gate<UserId> = Gate::new();
    fx.registrar.register_permissions(&gate).await.unwrap();
    gate.before(|user: &UserId, _| (*user == BOB).then_some(true))
        .await;

    assert!(!gate.allows(&ALICE, "articles.edit").await);
    assert!(gate.allows(&BOB, "articles.edit").await);
    assert!(gate.allows(&BOB, "unregistered").await);
}

// ============================================================================
// LOADER FAILURES
// ============================================================================

#[tokio::test]
async fn test_loader_failure_is_raised() {
    let registrar = Arc::new(PermissionRegistrar::new(
        Arc::new(UnavailableStore),
        PermissionsConfig::default(),
    ));
    let gate: Gate<UserId> = Gate::new();

    let err = registrar.register_permissions(&gate).await.unwrap_err();
    assert!(matches!(err, AuthzError::LoaderFailure(_)));
    assert!(gate.abilities().await.is_empty());
}

#[tokio::test]
async fn test_loader_failure_swallowed_in_console_mode() {
    let registrar = Arc::new(PermissionRegistrar::new(
        Arc::new(UnavailableStore),
        PermissionsConfig {
            console_mode: true,
            ..Default::default()
        },
    ));
    let gate: Gate<UserId> = Gate::new();

    assert_eq!(registrar.register_permissions(&gate).await.unwrap(), 0);
}

#[tokio::test]
async fn test_check_fails_closed() {
    let registrar = Arc::new(PermissionRegistrar::new(
        Arc::new(UnavailableStore),
        PermissionsConfig::default(),
    ));
    let check = rolegate_authz::PermissionCheck::new(registrar);

    assert!(!check.check(&ALICE, "articles.edit").await);
    assert!(!check.check_any(&ALICE, &["*", "articles.edit"]).await);
}
