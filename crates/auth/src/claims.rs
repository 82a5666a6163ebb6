use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatekeeper_core::UserId;

/// Fixed validity window of an issued token.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

/// Registered JWT claims carried by an identity token.
///
/// Times are NumericDate seconds, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer (the host the login request was addressed to).
    pub iss: String,

    /// Subject: user id in decimal form.
    pub sub: String,

    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl TokenClaims {
    /// Claims for `subject`, valid from `now` for exactly [`TOKEN_TTL_SECS`].
    pub fn new(issuer: impl Into<String>, subject: UserId, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: issuer.into(),
            sub: subject.as_subject(),
            iat,
            nbf: iat,
            exp: iat + TOKEN_TTL_SECS,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,
}

/// Deterministically validate a token's time window against `now`.
///
/// Missing bounds are not checked here; presence of `exp` is enforced during
/// signature verification.
pub fn validate_time_window(
    not_before: Option<i64>,
    expires_at: Option<i64>,
    now: DateTime<Utc>,
) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if let Some(exp) = expires_at {
        if now >= exp {
            return Err(TokenValidationError::Expired);
        }
    }
    if let Some(nbf) = not_before {
        if now < nbf {
            return Err(TokenValidationError::NotYetValid);
        }
    }
    Ok(())
}
