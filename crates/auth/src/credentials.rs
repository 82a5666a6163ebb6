//! Credential verification (password hashing with Argon2).

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use thiserror::Error;

/// Login identity (username or email) plus plaintext password.
///
/// Only ever lives for the duration of a login or password check; it is never
/// persisted and its `Debug` output never contains the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    identity: String,
    password: String,
}

impl Credential {
    pub fn new(identity: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            password: password.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_incomplete(&self) -> bool {
        self.identity.trim().is_empty() || self.password.trim().is_empty()
    }
}

impl core::fmt::Debug for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Hash a plaintext password into a PHC string (Argon2id, random salt).
pub fn hash_password(plain: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::Hashing(e.to_string()))
}

/// Check a plaintext password against a stored PHC string.
///
/// An unparseable stored hash never verifies.
pub fn verify_password(plain: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("p1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("p1", &hash));
        assert!(!verify_password("p2", &hash));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("secret").unwrap();
        let b = hash_password("secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("p1", "not-a-phc-string"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn debug_redacts_password() {
        let cred = Credential::new("bob", "hunter2");
        let dbg = format!("{cred:?}");
        assert!(dbg.contains("bob"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn blank_fields_are_incomplete() {
        assert!(Credential::new("  ", "x").is_incomplete());
        assert!(Credential::new("bob", "").is_incomplete());
        assert!(!Credential::new("bob", "x").is_incomplete());
    }
}
