//! Storage seams for rules and user records.
//!
//! Implementations live in `gatekeeper-infra`. User mutations that touch a
//! grouping rule are single operations on [`UserStore`] so that the row write
//! and the rule write share one transaction.

use async_trait::async_trait;
use thiserror::Error;

use gatekeeper_core::UserId;

use crate::policy::{PolicyRule, PolicySnapshot};
use crate::user::{NewUser, User, UserChanges};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found")]
    NotFound,

    #[error("email already registered")]
    DuplicateEmail,

    #[error("username already registered")]
    DuplicateUsername,

    /// A multi-record write failed part-way and was rolled back.
    #[error("transaction rolled back: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Read every policy and grouping rule.
    async fn load_policy(&self) -> Result<PolicySnapshot, StoreError>;

    async fn has_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError>;

    /// Returns `false` when the rule already existed.
    async fn add_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn count_users(&self) -> Result<u64, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Look a user up by email or username.
    async fn find_by_identity(&self, identity: &str) -> Result<Option<User>, StoreError>;

    async fn email_exists(&self, email: &str, excluding: Option<UserId>) -> Result<bool, StoreError>;

    async fn username_exists(
        &self,
        username: &str,
        excluding: Option<UserId>,
    ) -> Result<bool, StoreError>;

    /// Insert the row and its grouping rule `(id, role)` atomically.
    async fn insert_with_grouping(&self, user: NewUser) -> Result<User, StoreError>;

    /// Apply `changes` to the row; when a role is given, replace the user's
    /// groupings with `(id, role)` in the same transaction.
    async fn update_with_grouping(&self, id: UserId, changes: UserChanges) -> Result<User, StoreError>;

    /// Delete the row and every grouping rule for `id` atomically.
    async fn delete_with_groupings(&self, id: UserId) -> Result<(), StoreError>;

    async fn set_password_hash(&self, id: UserId, password_hash: String) -> Result<User, StoreError>;
}
