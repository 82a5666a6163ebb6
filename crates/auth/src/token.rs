//! Identity token issuance and verification (ES256 JWT).
//!
//! Key material is read once when the service is built and then shared
//! read-only; verification never touches the filesystem.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Deserialize;
use thiserror::Error;

use gatekeeper_core::UserId;

use crate::claims::{TokenClaims, TokenValidationError, validate_time_window};

const ALGORITHM: Algorithm = Algorithm::ES256;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {kind} key: {message}")]
    Parse { kind: &'static str, message: String },
}

/// Verification/issuance failure.
///
/// The variants map one-to-one onto how the HTTP layer treats the stored
/// cookie: `Malformed` and `Invalid` clear it, `Expired`/`NotYetValid` keep it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("missing or malformed token")]
    Malformed,

    #[error("token has expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,

    #[error("token rejected: {0}")]
    Invalid(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<TokenValidationError> for TokenError {
    fn from(value: TokenValidationError) -> Self {
        match value {
            TokenValidationError::Expired => TokenError::Expired,
            TokenValidationError::NotYetValid => TokenError::NotYetValid,
        }
    }
}

/// A freshly signed token plus the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Time bounds read from an unverified payload.
#[derive(Debug, Deserialize)]
struct TimeBounds {
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Build from PEM material: PKCS#8 private key and SPKI public key (P-256).
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, KeyError> {
        let encoding = EncodingKey::from_ec_pem(private_pem).map_err(|e| KeyError::Parse {
            kind: "private",
            message: e.to_string(),
        })?;
        let decoding = DecodingKey::from_ec_pem(public_pem).map_err(|e| KeyError::Parse {
            kind: "public",
            message: e.to_string(),
        })?;
        Ok(Self { encoding, decoding })
    }

    /// Read both key files once. Any failure here is fatal for the process.
    pub fn load(private_path: &Path, public_path: &Path) -> Result<Self, KeyError> {
        let private_pem = read_key(private_path)?;
        let public_pem = read_key(public_path)?;
        let service = Self::from_pem(&private_pem, &public_pem)?;
        tracing::info!(
            private_key = %private_path.display(),
            public_key = %public_path.display(),
            "token signing keys loaded"
        );
        Ok(service)
    }

    pub fn issue(&self, issuer: &str, subject: UserId) -> Result<IssuedToken, TokenError> {
        self.issue_at(issuer, subject, Utc::now())
    }

    pub fn issue_at(
        &self,
        issuer: &str,
        subject: UserId,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let claims = TokenClaims::new(issuer, subject, now);
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
        })
    }

    pub fn verify(&self, token: &str) -> Result<UserId, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` against `now` and return its subject.
    ///
    /// Structure and time window are checked before the signature, so a token
    /// past its expiry is `Expired` whatever its signature.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<UserId, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Malformed);
        }

        let bounds = decode::<TimeBounds>(token, &DecodingKey::from_secret(&[]), &unverified())
            .map_err(|e| classify_structural(&e))?
            .claims;
        validate_time_window(bounds.nbf, bounds.exp, now)?;

        let claims = decode::<TokenClaims>(token, &self.decoding, &verified())
            .map_err(|e| TokenError::Invalid(describe(&e)))?
            .claims;

        claims
            .sub
            .parse::<UserId>()
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }
}

fn read_key(path: &Path) -> Result<Vec<u8>, KeyError> {
    std::fs::read(path).map_err(|source| KeyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Structural decoding only: no signature, no time or claim checks.
fn unverified() -> Validation {
    let mut validation = Validation::new(ALGORITHM);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims.clear();
    validation
}

/// Signature + required claims; time bounds were already checked.
fn verified() -> Validation {
    let mut validation = Validation::new(ALGORITHM);
    validation.leeway = 0;
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.set_required_spec_claims(&["exp", "sub"]);
    validation
}

fn classify_structural(err: &JwtError) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            TokenError::Malformed
        }
        _ => TokenError::Invalid(describe(err)),
    }
}

fn describe(err: &JwtError) -> String {
    match err.kind() {
        ErrorKind::InvalidSignature => "signature mismatch".to_string(),
        ErrorKind::InvalidAlgorithm => "unexpected signing algorithm".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing claim '{claim}'"),
        other => format!("{other:?}"),
    }
}
