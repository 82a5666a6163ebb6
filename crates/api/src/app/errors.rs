//! Error → HTTP response mapping.
//!
//! Store and driver details are logged here and never sent to the client.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use gatekeeper_auth::{PolicyError, TokenError, UserError};
use gatekeeper_core::DomainError;

use crate::app::dto::Envelope;
use crate::cookie;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// Cookie present but not a JWT; the cookie is cleared.
    #[error("Missing or malformed JWT")]
    MalformedToken,

    #[error("{0}")]
    Unauthorized(String),

    /// Token failed verification; the cookie is cleared.
    #[error("Error when processing identity")]
    InvalidToken,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal Server Error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::MalformedToken | ApiError::Conflict(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidToken | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn clears_cookie(&self) -> bool {
        matches!(self, ApiError::MalformedToken | ApiError::InvalidToken)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Envelope::failure(self.to_string())).into_response();
        if self.clears_cookie() {
            response
                .headers_mut()
                .insert(header::SET_COOKIE, cookie::expired_cookie());
        }
        response
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => ApiError::MalformedToken,
            TokenError::Expired => ApiError::Unauthorized("JWT expired".to_string()),
            TokenError::NotYetValid => ApiError::Unauthorized("JWT not active yet".to_string()),
            TokenError::Invalid(reason) => {
                warn!(%reason, "token rejected");
                ApiError::InvalidToken
            }
            TokenError::Signing(reason) => {
                error!(%reason, "token signing failed");
                ApiError::Internal
            }
        }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Validation(msg) => ApiError::BadRequest(msg),
            UserError::EmptyInput | UserError::SameAsCurrent | UserError::IncorrectPassword => {
                ApiError::BadRequest(err.to_string())
            }
            UserError::EmailTaken | UserError::UsernameTaken => ApiError::Conflict(err.to_string()),
            UserError::NotFound => ApiError::NotFound(err.to_string()),
            UserError::StoreInconsistent(_) | UserError::Store(_) | UserError::Hashing(_) => {
                error!(error = %err, "user operation failed");
                ApiError::Internal
            }
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        error!(error = %err, "policy evaluation failed");
        ApiError::Internal
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidId(msg) => ApiError::BadRequest(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_map_to_pipeline_statuses() {
        assert_eq!(ApiError::from(TokenError::Malformed).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(TokenError::Expired).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(TokenError::NotYetValid).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(TokenError::Invalid("sig".into())).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn only_malformed_and_invalid_clear_the_cookie() {
        let cleared = ApiError::from(TokenError::Invalid("sig".into())).into_response();
        assert!(cleared.headers().contains_key(header::SET_COOKIE));

        let kept = ApiError::from(TokenError::Expired).into_response();
        assert!(!kept.headers().contains_key(header::SET_COOKIE));
    }

    #[test]
    fn store_details_are_not_exposed() {
        let err = ApiError::from(UserError::StoreInconsistent("deadlock on casbin_rule".into()));
        assert_eq!(err, ApiError::Internal);
        assert_eq!(err.to_string(), "Internal Server Error");
    }

    #[test]
    fn unparsable_path_id_is_a_bad_request() {
        let err = ApiError::from("abc".parse::<gatekeeper_core::UserId>().unwrap_err());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn duplicates_are_bad_requests() {
        let err = ApiError::from(UserError::EmailTaken);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Email is already registered");
    }
}
