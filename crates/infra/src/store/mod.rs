//! User + policy rule storage.
//!
//! Both adapters keep user rows and `casbin_rule` records in one place so a
//! user mutation and its grouping-rule mutation share a single transaction.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryDirectory;
pub use postgres::PostgresDirectory;

/// `ptype` of permission rules in `casbin_rule`.
pub const POLICY_PTYPE: &str = "p";

/// `ptype` of grouping rules in `casbin_rule`.
pub const GROUPING_PTYPE: &str = "g";
