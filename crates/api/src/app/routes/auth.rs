//! Login / logout. Both are public; the pipeline does not run here.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::info;

use gatekeeper_auth::Credential;

use crate::app::AppState;
use crate::app::dto::{self, Envelope, LoginRequest};
use crate::app::errors::ApiError;
use crate::cookie;

const DEFAULT_ISSUER: &str = "localhost";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

/// POST /api/auth/login - verify credentials and set the `jwt` cookie
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = dto::body(payload)?;
    let user = state
        .users
        .authenticate(&Credential::new(req.identity, req.password))
        .await?;

    let issuer = headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .unwrap_or(DEFAULT_ISSUER);
    let issued = state.tokens.issue(issuer, user.id)?;
    let session = cookie::session_cookie(&issued.token, issued.expires_at).ok_or(ApiError::Internal)?;

    info!(user_id = %user.id, "login succeeded");
    let mut response = Envelope::ok("Login successfully", user).into_response();
    response.headers_mut().insert(header::SET_COOKIE, session);
    Ok(response)
}

/// POST /api/auth/logout - expire the `jwt` cookie
pub async fn logout() -> Response {
    let mut response = Envelope::message("Logout successfully").into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, cookie::expired_cookie());
    response
}
