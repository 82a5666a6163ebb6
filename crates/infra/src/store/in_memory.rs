//! In-memory directory for tests and local development.
//!
//! Users and rules sit behind one lock. Multi-record writes run against a
//! staged copy that replaces the live state only when every step succeeded,
//! which gives the same all-or-nothing behaviour as a database transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::instrument;

use gatekeeper_auth::{
    GroupingRule, NewUser, PolicyRule, PolicySnapshot, PolicyStore, StoreError, User, UserChanges,
    UserStore,
};
use gatekeeper_core::UserId;

#[derive(Debug, Clone, Default)]
struct Directory {
    last_id: i64,
    users: BTreeMap<UserId, User>,
    policies: BTreeSet<PolicyRule>,
    groupings: BTreeSet<GroupingRule>,
}

impl Directory {
    fn email_taken(&self, email: &str, excluding: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != excluding)
    }

    fn username_taken(&self, username: &str, excluding: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.username == username && Some(u.id) != excluding)
    }

    fn drop_groupings(&mut self, id: UserId) {
        let subject = id.as_subject();
        self.groupings.retain(|g| g.user != subject);
    }
}

/// Users and `casbin_rule` records held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<Directory>,
    grouping_writes_fail: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every grouping write fail with [`StoreError::Aborted`] until
    /// switched off again. Used to exercise rollback paths.
    pub fn fail_grouping_writes(&self, fail: bool) {
        self.grouping_writes_fail.store(fail, Ordering::SeqCst);
    }

    fn read<T>(&self, f: impl FnOnce(&Directory) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(f(&state))
    }

    /// Run `f` against a staged copy and publish it only on success.
    fn transact<T>(
        &self,
        f: impl FnOnce(&mut Directory) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        let mut staged = state.clone();
        let out = f(&mut staged)?;
        *state = staged;
        Ok(out)
    }

    fn grouping_guard(&self) -> Result<(), StoreError> {
        if self.grouping_writes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Aborted("grouping write failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for InMemoryDirectory {
    async fn load_policy(&self) -> Result<PolicySnapshot, StoreError> {
        self.read(|d| {
            PolicySnapshot::new(
                d.policies.iter().cloned().collect(),
                d.groupings.iter().cloned().collect(),
            )
        })
    }

    async fn has_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        self.read(|d| d.policies.contains(rule))
    }

    async fn add_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        self.transact(|d| Ok(d.policies.insert(rule.clone())))
    }
}

#[async_trait]
impl UserStore for InMemoryDirectory {
    async fn count_users(&self) -> Result<u64, StoreError> {
        self.read(|d| d.users.len() as u64)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.read(|d| d.users.values().cloned().collect())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.read(|d| d.users.get(&id).cloned())
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<User>, StoreError> {
        self.read(|d| {
            d.users
                .values()
                .find(|u| u.email == identity || u.username == identity)
                .cloned()
        })
    }

    async fn email_exists(&self, email: &str, excluding: Option<UserId>) -> Result<bool, StoreError> {
        self.read(|d| d.email_taken(email, excluding))
    }

    async fn username_exists(
        &self,
        username: &str,
        excluding: Option<UserId>,
    ) -> Result<bool, StoreError> {
        self.read(|d| d.username_taken(username, excluding))
    }

    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn insert_with_grouping(&self, user: NewUser) -> Result<User, StoreError> {
        self.transact(|d| {
            if d.email_taken(&user.email, None) {
                return Err(StoreError::DuplicateEmail);
            }
            if d.username_taken(&user.username, None) {
                return Err(StoreError::DuplicateUsername);
            }

            d.last_id += 1;
            let user = user.into_user(UserId::new(d.last_id));
            d.users.insert(user.id, user.clone());

            self.grouping_guard()?;
            d.groupings.insert(GroupingRule::for_user(user.id, &user.role));
            Ok(user)
        })
    }

    #[instrument(skip(self, changes), fields(user_id = %id), err)]
    async fn update_with_grouping(&self, id: UserId, changes: UserChanges) -> Result<User, StoreError> {
        self.transact(|d| {
            if let Some(email) = &changes.email {
                if d.email_taken(email, Some(id)) {
                    return Err(StoreError::DuplicateEmail);
                }
            }
            if let Some(username) = &changes.username {
                if d.username_taken(username, Some(id)) {
                    return Err(StoreError::DuplicateUsername);
                }
            }

            let user = d.users.get_mut(&id).ok_or(StoreError::NotFound)?;
            changes.apply_to(user);
            let user = user.clone();

            if let Some(role) = &changes.role {
                self.grouping_guard()?;
                d.drop_groupings(id);
                d.groupings.insert(GroupingRule::for_user(id, role));
            }
            Ok(user)
        })
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_with_groupings(&self, id: UserId) -> Result<(), StoreError> {
        self.transact(|d| {
            d.users.remove(&id).ok_or(StoreError::NotFound)?;
            self.grouping_guard()?;
            d.drop_groupings(id);
            Ok(())
        })
    }

    async fn set_password_hash(&self, id: UserId, password_hash: String) -> Result<User, StoreError> {
        self.transact(|d| {
            let user = d.users.get_mut(&id).ok_or(StoreError::NotFound)?;
            user.password_hash = password_hash;
            user.updated_at = chrono::Utc::now();
            Ok(user.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use gatekeeper_auth::Role;

    fn new_user(username: &str, role: Role) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            name: String::new(),
            password_hash: "hash".to_string(),
            role,
            created_at: Utc::now(),
        }
    }

    fn changes() -> UserChanges {
        UserChanges {
            username: None,
            email: None,
            name: None,
            role: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids_and_a_grouping() {
        let dir = InMemoryDirectory::new();
        let a = dir.insert_with_grouping(new_user("alice", Role::ADMIN)).await.unwrap();
        let b = dir.insert_with_grouping(new_user("bob", Role::USER)).await.unwrap();

        assert_eq!(a.id, UserId::new(1));
        assert_eq!(b.id, UserId::new(2));

        let snap = dir.load_policy().await.unwrap();
        assert_eq!(snap.roles_of("1").collect::<Vec<_>>(), vec!["admin"]);
        assert_eq!(snap.roles_of("2").collect::<Vec<_>>(), vec!["user"]);
    }

    #[tokio::test]
    async fn duplicate_email_leaves_no_trace() {
        let dir = InMemoryDirectory::new();
        dir.insert_with_grouping(new_user("alice", Role::ADMIN)).await.unwrap();

        let mut dup = new_user("alice2", Role::USER);
        dup.email = "alice@example.com".to_string();
        assert_eq!(
            dir.insert_with_grouping(dup).await.unwrap_err(),
            StoreError::DuplicateEmail
        );
        assert_eq!(dir.count_users().await.unwrap(), 1);
        assert_eq!(dir.load_policy().await.unwrap().groupings.len(), 1);
    }

    #[tokio::test]
    async fn failed_grouping_write_rolls_back_the_row() {
        let dir = InMemoryDirectory::new();
        dir.fail_grouping_writes(true);

        let err = dir.insert_with_grouping(new_user("bob", Role::USER)).await.unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));
        assert_eq!(dir.count_users().await.unwrap(), 0);
        assert!(dir.load_policy().await.unwrap().groupings.is_empty());
    }

    #[tokio::test]
    async fn failed_role_swap_keeps_the_previous_role() {
        let dir = InMemoryDirectory::new();
        let bob = dir.insert_with_grouping(new_user("bob", Role::USER)).await.unwrap();

        dir.fail_grouping_writes(true);
        let err = dir
            .update_with_grouping(bob.id, UserChanges { role: Some(Role::ADMIN), ..changes() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));

        let stored = dir.find_user(bob.id).await.unwrap().unwrap();
        assert_eq!(stored.role, Role::USER);
        let snap = dir.load_policy().await.unwrap();
        assert_eq!(snap.roles_of("1").collect::<Vec<_>>(), vec!["user"]);
    }

    #[tokio::test]
    async fn role_change_replaces_every_grouping() {
        let dir = InMemoryDirectory::new();
        let bob = dir.insert_with_grouping(new_user("bob", Role::USER)).await.unwrap();

        dir.update_with_grouping(bob.id, UserChanges { role: Some(Role::ADMIN), ..changes() })
            .await
            .unwrap();

        let snap = dir.load_policy().await.unwrap();
        assert_eq!(snap.roles_of("1").collect::<Vec<_>>(), vec!["admin"]);
    }

    #[tokio::test]
    async fn delete_removes_row_and_groupings() {
        let dir = InMemoryDirectory::new();
        let bob = dir.insert_with_grouping(new_user("bob", Role::USER)).await.unwrap();

        dir.delete_with_groupings(bob.id).await.unwrap();
        assert!(dir.find_user(bob.id).await.unwrap().is_none());
        assert_eq!(dir.load_policy().await.unwrap().roles_of("1").count(), 0);
        assert_eq!(
            dir.delete_with_groupings(bob.id).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn failed_grouping_delete_keeps_the_row() {
        let dir = InMemoryDirectory::new();
        let bob = dir.insert_with_grouping(new_user("bob", Role::USER)).await.unwrap();

        dir.fail_grouping_writes(true);
        let err = dir.delete_with_groupings(bob.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));

        assert!(dir.find_user(bob.id).await.unwrap().is_some());
        let snap = dir.load_policy().await.unwrap();
        assert_eq!(snap.roles_of("1").collect::<Vec<_>>(), vec!["user"]);
    }

    #[tokio::test]
    async fn identity_matches_email_or_username() {
        let dir = InMemoryDirectory::new();
        dir.insert_with_grouping(new_user("carol", Role::USER)).await.unwrap();

        assert!(dir.find_by_identity("carol").await.unwrap().is_some());
        assert!(dir.find_by_identity("carol@example.com").await.unwrap().is_some());
        assert!(dir.find_by_identity("dave").await.unwrap().is_none());
    }
}
