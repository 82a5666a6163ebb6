//! User lifecycle management.
//!
//! Every operation that changes a user's role (create, update, delete) goes
//! through a single [`UserStore`] call, so the user row and its grouping rule
//! commit or roll back together.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use gatekeeper_core::UserId;

use crate::credentials::{Credential, CredentialError, hash_password, verify_password};
use crate::store::{StoreError, UserStore};
use crate::Role;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A stored user. The password hash is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user row about to be inserted (id is assigned by the store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl NewUser {
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            username: self.username,
            email: self.email,
            name: self.name,
            password_hash: self.password_hash,
            role: self.role,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Partial update of a user row. `None` leaves the column untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<Role>,
    pub updated_at: DateTime<Utc>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.name.is_none() && self.role.is_none()
    }

    /// Merge into `user`, returning whether the role changed.
    pub fn apply_to(&self, user: &mut User) -> bool {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        let mut role_changed = false;
        if let Some(role) = &self.role {
            role_changed = *role != user.role;
            user.role = role.clone();
        }
        user.updated_at = self.updated_at;
        role_changed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateUserInput {
    pub username: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: String,
}

/// Admin-side update. Blank fields are treated as "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateUserInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

impl UpdateUserInput {
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Default::default()
        }
    }

    fn into_changes(self, now: DateTime<Utc>) -> UserChanges {
        UserChanges {
            username: non_blank(self.username),
            email: non_blank(self.email),
            name: non_blank(self.name),
            role: non_blank(self.role).map(Role::from),
            updated_at: now,
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct UpdatePasswordInput {
    pub current_password: String,
    pub new_password: String,
}

impl core::fmt::Debug for UpdatePasswordInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UpdatePasswordInput").finish_non_exhaustive()
    }
}

/// Credentials for the account created when the user table is empty.
#[derive(Clone, PartialEq, Eq)]
pub struct RootAdmin {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub role: String,
}

impl core::fmt::Debug for RootAdmin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RootAdmin")
            .field("username", &self.username)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UserError {
    #[error("{0}")]
    Validation(String),

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Username is already registered")]
    UsernameTaken,

    #[error("User not found")]
    NotFound,

    #[error("Cannot proceed with empty input")]
    EmptyInput,

    #[error("Updated password must be different from the current one")]
    SameAsCurrent,

    #[error("Incorrect password")]
    IncorrectPassword,

    /// User row and policy store could not be updated together; nothing was
    /// committed.
    #[error("user and policy store update rolled back: {0}")]
    StoreInconsistent(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl From<StoreError> for UserError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => UserError::NotFound,
            StoreError::DuplicateEmail => UserError::EmailTaken,
            StoreError::DuplicateUsername => UserError::UsernameTaken,
            StoreError::Aborted(msg) => UserError::StoreInconsistent(msg),
            StoreError::Unavailable(msg) => UserError::Store(msg),
        }
    }
}

impl From<CredentialError> for UserError {
    fn from(value: CredentialError) -> Self {
        match value {
            CredentialError::Hashing(msg) => UserError::Hashing(msg),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle manager
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct UserLifecycle {
    store: Arc<dyn UserStore>,
}

impl core::fmt::Debug for UserLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserLifecycle").finish_non_exhaustive()
    }
}

impl UserLifecycle {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Check a login credential against the stored hash.
    #[instrument(skip(self, credential), fields(identity = %credential.identity()), err)]
    pub async fn authenticate(&self, credential: &Credential) -> Result<User, UserError> {
        if credential.is_incomplete() {
            return Err(UserError::EmptyInput);
        }

        let user = self
            .store
            .find_by_identity(credential.identity().trim())
            .await?
            .ok_or(UserError::NotFound)?;

        if !verify_password(credential.password(), &user.password_hash) {
            warn!(user_id = %user.id, "login rejected: incorrect password");
            return Err(UserError::IncorrectPassword);
        }

        Ok(user)
    }

    pub async fn list(&self) -> Result<Vec<User>, UserError> {
        Ok(self.store.list_users().await?)
    }

    pub async fn get(&self, id: UserId) -> Result<User, UserError> {
        self.store.find_user(id).await?.ok_or(UserError::NotFound)
    }

    /// Create a user and its grouping rule.
    ///
    /// Uniqueness is checked before hashing; a race that slips past the checks
    /// surfaces from the store as the same `EmailTaken`/`UsernameTaken`.
    #[instrument(skip(self, input), fields(username = %input.username, role = %input.role), err)]
    pub async fn create(&self, input: CreateUserInput) -> Result<User, UserError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_string();
        let role = input.role.trim().to_string();

        if username.is_empty() || email.is_empty() || input.password.is_empty() || role.is_empty() {
            return Err(UserError::Validation(
                "username, email, password and role are required".to_string(),
            ));
        }

        if self.store.email_exists(&email, None).await? {
            return Err(UserError::EmailTaken);
        }
        if self.store.username_exists(&username, None).await? {
            return Err(UserError::UsernameTaken);
        }

        let password_hash = hash_password(&input.password)?;
        let user = self
            .store
            .insert_with_grouping(NewUser {
                username,
                email,
                name: input.name.trim().to_string(),
                password_hash,
                role: Role::from(role),
                created_at: Utc::now(),
            })
            .await?;

        info!(user_id = %user.id, role = %user.role, "user created");
        Ok(user)
    }

    /// Update profile fields and, when given, the role.
    ///
    /// A role change replaces the user's grouping inside the same transaction
    /// as the row update.
    #[instrument(skip(self, input), fields(user_id = %id), err)]
    pub async fn update(&self, id: UserId, input: UpdateUserInput) -> Result<User, UserError> {
        let current = self.get(id).await?;
        let changes = input.into_changes(Utc::now());
        if changes.is_empty() {
            return Ok(current);
        }

        if let Some(email) = &changes.email {
            if *email != current.email && self.store.email_exists(email, Some(id)).await? {
                return Err(UserError::EmailTaken);
            }
        }
        if let Some(username) = &changes.username {
            if *username != current.username && self.store.username_exists(username, Some(id)).await? {
                return Err(UserError::UsernameTaken);
            }
        }

        let user = self.store.update_with_grouping(id, changes).await?;
        if user.role != current.role {
            info!(user_id = %id, from = %current.role, to = %user.role, "user role changed");
        } else {
            info!(user_id = %id, "user updated");
        }
        Ok(user)
    }

    pub async fn update_role(&self, id: UserId, role: &Role) -> Result<User, UserError> {
        if role.is_blank() {
            return Err(UserError::Validation("role is required".to_string()));
        }
        self.update(id, UpdateUserInput::role(role.as_str().to_string())).await
    }

    /// Delete the user row and all of its grouping rules.
    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn delete(&self, id: UserId) -> Result<(), UserError> {
        self.store.delete_with_groupings(id).await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    /// Self-service password change; the current password must verify.
    #[instrument(skip(self, input), fields(user_id = %id), err)]
    pub async fn update_password(
        &self,
        id: UserId,
        input: UpdatePasswordInput,
    ) -> Result<User, UserError> {
        if input.current_password.trim().is_empty() || input.new_password.trim().is_empty() {
            return Err(UserError::EmptyInput);
        }
        if input.current_password == input.new_password {
            return Err(UserError::SameAsCurrent);
        }

        let user = self.get(id).await?;
        if !verify_password(&input.current_password, &user.password_hash) {
            return Err(UserError::IncorrectPassword);
        }

        let password_hash = hash_password(&input.new_password)?;
        let user = self.store.set_password_hash(id, password_hash).await?;
        info!(user_id = %id, "password updated");
        Ok(user)
    }

    /// Create the root admin when no user exists yet. Returns `None` when the
    /// table already has users.
    #[instrument(skip(self, admin), fields(username = %admin.username), err)]
    pub async fn bootstrap_root_admin(&self, admin: RootAdmin) -> Result<Option<User>, UserError> {
        if self.store.count_users().await? > 0 {
            return Ok(None);
        }

        let email = admin
            .email
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| format!("{}@localhost", admin.username.trim()));

        let user = self
            .create(CreateUserInput {
                username: admin.username,
                email,
                name: String::new(),
                password: admin.password,
                role: admin.role,
            })
            .await?;
        info!(user_id = %user.id, "root admin bootstrapped");
        Ok(Some(user))
    }
}
