//! Lifecycle manager + enforcer running over one shared directory.
//!
//! Verifies:
//! - user rows and grouping rules change together
//! - authorization decisions follow role changes after a reload
//! - credential and password-change checks run in the documented order

use std::sync::Arc;

use gatekeeper_auth::model::default_model;
use gatekeeper_auth::{
    CreateUserInput, Credential, PolicyEnforcer, PolicyStore, Role, RootAdmin, UpdatePasswordInput,
    UpdateUserInput, UserError, UserLifecycle, UserStore,
};
use gatekeeper_core::UserId;

use crate::store::InMemoryDirectory;

struct Harness {
    directory: Arc<InMemoryDirectory>,
    users: UserLifecycle,
    enforcer: PolicyEnforcer,
}

async fn setup() -> Harness {
    let directory = Arc::new(InMemoryDirectory::new());
    let users = UserLifecycle::new(directory.clone());
    let enforcer = PolicyEnforcer::new(directory.clone(), default_model())
        .await
        .unwrap();
    enforcer.seed_default_policies().await.unwrap();
    Harness {
        directory,
        users,
        enforcer,
    }
}

fn input(username: &str, role: &str) -> CreateUserInput {
    CreateUserInput {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        name: username.to_uppercase(),
        password: "s3cret".to_string(),
        role: role.to_string(),
    }
}

impl Harness {
    async fn allowed(&self, id: UserId, path: &str, method: &str) -> bool {
        self.enforcer.reload_policy().await.unwrap();
        self.enforcer
            .enforce(&id.as_subject(), path, method)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn created_user_gets_matching_grouping() {
    let h = setup().await;
    let bob = h.users.create(input("bob", "user")).await.unwrap();

    assert_eq!(bob.role, Role::USER);
    let rules = h.directory.load_policy().await.unwrap();
    assert_eq!(
        rules.roles_of(&bob.id.as_subject()).collect::<Vec<_>>(),
        vec!["user"]
    );
}

#[tokio::test]
async fn duplicate_email_is_rejected_without_new_grouping() {
    let h = setup().await;
    h.users.create(input("bob", "user")).await.unwrap();
    let before = h.directory.load_policy().await.unwrap();

    let mut dup = input("robert", "admin");
    dup.email = "bob@example.com".to_string();
    assert_eq!(h.users.create(dup).await.unwrap_err(), UserError::EmailTaken);

    assert_eq!(h.directory.load_policy().await.unwrap(), before);
    assert_eq!(h.directory.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_username_is_rejected() {
    let h = setup().await;
    h.users.create(input("bob", "user")).await.unwrap();

    let mut dup = input("bob", "user");
    dup.email = "other@example.com".to_string();
    assert_eq!(h.users.create(dup).await.unwrap_err(), UserError::UsernameTaken);
}

#[tokio::test]
async fn blank_fields_fail_validation() {
    let h = setup().await;
    let mut missing = input("bob", "user");
    missing.password.clear();
    assert!(matches!(
        h.users.create(missing).await.unwrap_err(),
        UserError::Validation(_)
    ));

    let blank_role = input("bob", "   ");
    assert!(matches!(
        h.users.create(blank_role).await.unwrap_err(),
        UserError::Validation(_)
    ));
}

#[tokio::test]
async fn admin_and_user_decisions() {
    let h = setup().await;
    let alice = h.users.create(input("alice", "admin")).await.unwrap();
    let bob = h.users.create(input("bob", "user")).await.unwrap();

    assert!(h.allowed(alice.id, "/api/admin/users", "GET").await);
    assert!(!h.allowed(bob.id, "/api/admin/users", "GET").await);
    let own = format!("/api/users/{}/profile", bob.id);
    assert!(h.allowed(bob.id, &own, "GET").await);
}

#[tokio::test]
async fn role_change_moves_enforcement_to_new_role() {
    let h = setup().await;
    let bob = h.users.create(input("bob", "user")).await.unwrap();
    let own = format!("/api/users/{}/password", bob.id);
    assert!(h.allowed(bob.id, &own, "PUT").await);

    let updated = h.users.update_role(bob.id, &Role::ADMIN).await.unwrap();
    assert_eq!(updated.role, Role::ADMIN);

    assert!(h.allowed(bob.id, "/api/admin/users", "DELETE").await);
    assert!(!h.allowed(bob.id, &own, "PUT").await);
    assert_eq!(
        h.enforcer.rules().await.roles_of(&bob.id.as_subject()).count(),
        1
    );
}

#[tokio::test]
async fn rolled_back_role_change_leaves_old_role_in_force() {
    let h = setup().await;
    let bob = h.users.create(input("bob", "user")).await.unwrap();

    h.directory.fail_grouping_writes(true);
    let err = h.users.update_role(bob.id, &Role::ADMIN).await.unwrap_err();
    assert!(matches!(err, UserError::StoreInconsistent(_)));
    h.directory.fail_grouping_writes(false);

    assert_eq!(h.users.get(bob.id).await.unwrap().role, Role::USER);
    assert!(!h.allowed(bob.id, "/api/admin/users", "GET").await);
}

#[tokio::test]
async fn profile_only_update_keeps_grouping() {
    let h = setup().await;
    let bob = h.users.create(input("bob", "user")).await.unwrap();

    let updated = h
        .users
        .update(
            bob.id,
            UpdateUserInput {
                name: Some("Robert".to_string()),
                email: Some("   ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Robert");
    assert_eq!(updated.email, "bob@example.com");
    assert_eq!(
        h.directory
            .load_policy()
            .await
            .unwrap()
            .roles_of(&bob.id.as_subject())
            .collect::<Vec<_>>(),
        vec!["user"]
    );
}

#[tokio::test]
async fn update_to_taken_email_is_rejected() {
    let h = setup().await;
    h.users.create(input("alice", "admin")).await.unwrap();
    let bob = h.users.create(input("bob", "user")).await.unwrap();

    let err = h
        .users
        .update(
            bob.id,
            UpdateUserInput {
                email: Some("alice@example.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, UserError::EmailTaken);
}

#[tokio::test]
async fn update_trims_fields_like_create() {
    let h = setup().await;
    h.users.create(input("alice", "admin")).await.unwrap();
    let bob = h.users.create(input("bob", "user")).await.unwrap();

    let updated = h
        .users
        .update(
            bob.id,
            UpdateUserInput {
                username: Some("  robert ".to_string()),
                role: Some(" admin ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.username, "robert");
    assert_eq!(updated.role, Role::ADMIN);
    assert!(h.allowed(bob.id, "/api/admin/users", "GET").await);

    let err = h
        .users
        .update(
            bob.id,
            UpdateUserInput {
                email: Some(" alice@example.com ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, UserError::EmailTaken);
}

#[tokio::test]
async fn update_of_missing_user_is_not_found() {
    let h = setup().await;
    let err = h
        .users
        .update(UserId::new(42), UpdateUserInput::role("admin"))
        .await
        .unwrap_err();
    assert_eq!(err, UserError::NotFound);
}

#[tokio::test]
async fn deleted_user_is_denied_everything() {
    let h = setup().await;
    let alice = h.users.create(input("alice", "admin")).await.unwrap();
    assert!(h.allowed(alice.id, "/api/admin/users", "GET").await);

    h.users.delete(alice.id).await.unwrap();

    assert_eq!(h.users.get(alice.id).await.unwrap_err(), UserError::NotFound);
    assert_eq!(
        h.directory
            .load_policy()
            .await
            .unwrap()
            .roles_of(&alice.id.as_subject())
            .count(),
        0
    );
    for (path, method) in [
        ("/api/admin/users", "GET"),
        ("/api/admin/users/1", "DELETE"),
        ("/api/users/1/profile", "GET"),
    ] {
        assert!(!h.allowed(alice.id, path, method).await, "{method} {path}");
    }
    assert_eq!(h.users.delete(alice.id).await.unwrap_err(), UserError::NotFound);
}

#[tokio::test]
async fn rolled_back_delete_keeps_row_and_role() {
    let h = setup().await;
    let alice = h.users.create(input("alice", "admin")).await.unwrap();

    h.directory.fail_grouping_writes(true);
    let err = h.users.delete(alice.id).await.unwrap_err();
    assert!(matches!(err, UserError::StoreInconsistent(_)));
    h.directory.fail_grouping_writes(false);

    assert_eq!(h.users.get(alice.id).await.unwrap().username, "alice");
    assert_eq!(
        h.directory
            .load_policy()
            .await
            .unwrap()
            .roles_of(&alice.id.as_subject())
            .collect::<Vec<_>>(),
        vec!["admin"]
    );
    assert!(h.allowed(alice.id, "/api/admin/users", "GET").await);
}

#[tokio::test]
async fn authenticate_accepts_username_or_email() {
    let h = setup().await;
    let bob = h.users.create(input("bob", "user")).await.unwrap();

    let by_name = h
        .users
        .authenticate(&Credential::new("bob", "s3cret"))
        .await
        .unwrap();
    let by_email = h
        .users
        .authenticate(&Credential::new("bob@example.com", "s3cret"))
        .await
        .unwrap();
    assert_eq!(by_name.id, bob.id);
    assert_eq!(by_email.id, bob.id);
}

#[tokio::test]
async fn authenticate_failures() {
    let h = setup().await;
    h.users.create(input("bob", "user")).await.unwrap();

    assert_eq!(
        h.users.authenticate(&Credential::new("", "x")).await.unwrap_err(),
        UserError::EmptyInput
    );
    assert_eq!(
        h.users
            .authenticate(&Credential::new("nobody", "x"))
            .await
            .unwrap_err(),
        UserError::NotFound
    );
    assert_eq!(
        h.users
            .authenticate(&Credential::new("bob", "wrong"))
            .await
            .unwrap_err(),
        UserError::IncorrectPassword
    );
}

#[tokio::test]
async fn password_change_checks_in_order() {
    let h = setup().await;
    let bob = h.users.create(input("bob", "user")).await.unwrap();
    let change = |current: &str, new: &str| UpdatePasswordInput {
        current_password: current.to_string(),
        new_password: new.to_string(),
    };

    assert_eq!(
        h.users.update_password(bob.id, change("", "n")).await.unwrap_err(),
        UserError::EmptyInput
    );
    assert_eq!(
        h.users
            .update_password(bob.id, change("same", "same"))
            .await
            .unwrap_err(),
        UserError::SameAsCurrent
    );
    assert_eq!(
        h.users
            .update_password(UserId::new(99), change("s3cret", "n3w"))
            .await
            .unwrap_err(),
        UserError::NotFound
    );
    assert_eq!(
        h.users
            .update_password(bob.id, change("wrong", "n3w"))
            .await
            .unwrap_err(),
        UserError::IncorrectPassword
    );

    h.users
        .update_password(bob.id, change("s3cret", "n3w"))
        .await
        .unwrap();
    assert!(h.users.authenticate(&Credential::new("bob", "n3w")).await.is_ok());
    assert_eq!(
        h.users
            .authenticate(&Credential::new("bob", "s3cret"))
            .await
            .unwrap_err(),
        UserError::IncorrectPassword
    );
}

#[tokio::test]
async fn root_admin_is_bootstrapped_only_once() {
    let h = setup().await;
    let root = RootAdmin {
        username: "root".to_string(),
        email: None,
        password: "toor".to_string(),
        role: "admin".to_string(),
    };

    let created = h
        .users
        .bootstrap_root_admin(root.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.email, "root@localhost");
    assert!(h.allowed(created.id, "/api/admin/users", "POST").await);

    assert!(h.users.bootstrap_root_admin(root).await.unwrap().is_none());
    assert_eq!(h.users.list().await.unwrap().len(), 1);
}
