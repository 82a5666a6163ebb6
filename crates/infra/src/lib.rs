//! Infrastructure layer: storage adapters for users and policy rules.

pub mod store;

#[cfg(test)]
mod integration_tests;

pub use store::{InMemoryDirectory, PostgresDirectory};
