pub mod admin;
pub mod auth;
pub mod system;
pub mod users;

use gatekeeper_core::UserId;

use crate::app::errors::ApiError;

/// Parse a `:id` path segment.
pub(crate) fn user_id(raw: &str) -> Result<UserId, ApiError> {
    Ok(raw.parse::<UserId>()?)
}
