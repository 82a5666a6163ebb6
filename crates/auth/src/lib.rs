//! `gatekeeper-auth`: authentication/authorization boundary.
//!
//! This crate is decoupled from HTTP and from any concrete storage engine:
//! persistence is reached only through the [`PolicyStore`] and [`UserStore`]
//! traits.

pub mod claims;
pub mod credentials;
pub mod enforcer;
pub mod model;
pub mod policy;
pub mod roles;
pub mod store;
pub mod token;
pub mod user;

pub use claims::{TOKEN_TTL_SECS, TokenClaims, TokenValidationError, validate_time_window};
pub use credentials::{Credential, CredentialError, hash_password, verify_password};
pub use enforcer::{PolicyEnforcer, PolicyError};
pub use policy::{GroupingRule, PolicyRule, PolicySnapshot, default_policies};
pub use roles::Role;
pub use store::{PolicyStore, StoreError, UserStore};
pub use token::{IssuedToken, KeyError, TokenError, TokenService};
pub use user::{
    CreateUserInput, NewUser, RootAdmin, UpdatePasswordInput, UpdateUserInput, User,
    UserChanges, UserError, UserLifecycle,
};
