//! Authorization pipeline for protected routes.
//!
//! Order per request: read the `jwt` cookie, verify it, reload the policy
//! rules, enforce `(subject, path, method)`. The first failing step answers
//! the request; handlers only run after every step passed.

use axum::{
    body::Body,
    extract::{OriginalUri, State},
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use gatekeeper_core::UserId;

use crate::app::AppState;
use crate::app::errors::ApiError;
use crate::context::PrincipalContext;
use crate::cookie;

/// Attempts made to reload policy rules before giving up with a 500.
const RELOAD_ATTEMPTS: usize = 2;

pub async fn authorize(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    let token = cookie::read_token(req.headers());
    // Nested routers see a stripped URI; policies are written against the full path.
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();

    match admit(&state, token, &path, &method).await {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

async fn admit(
    state: &AppState,
    token: Option<String>,
    path: &str,
    method: &Method,
) -> Result<PrincipalContext, ApiError> {
    let token = token.ok_or_else(|| ApiError::Unauthorized("Missing JWT".to_string()))?;
    let user_id = state.tokens.verify(&token)?;

    reload_policy(state).await?;

    let allowed = state
        .enforcer
        .enforce(&user_id.as_subject(), path, method.as_str())
        .await?;
    if !allowed {
        debug!(user_id = %user_id, %path, %method, "request denied by policy");
        return Err(ApiError::Forbidden("Unauthorized".to_string()));
    }

    Ok(PrincipalContext::new(user_id))
}

async fn reload_policy(state: &AppState) -> Result<(), ApiError> {
    let mut attempt = 1;
    loop {
        match state.enforcer.reload_policy().await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < RELOAD_ATTEMPTS => {
                warn!(error = %err, attempt, "policy reload failed; retrying");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Self-service routes: the path id must be the caller's own.
pub fn ensure_self(principal: &PrincipalContext, target: UserId) -> Result<(), ApiError> {
    if principal.user_id() != target {
        return Err(ApiError::Forbidden("Unauthorized".to_string()));
    }
    Ok(())
}
