//! Self-service routes. The policy pattern `/api/users/:id/*` matches any id,
//! so each handler also checks the id against the caller.

use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
    routing::{get, put},
};

use crate::app::AppState;
use crate::app::dto::{self, Envelope, UpdatePasswordRequest};
use crate::app::errors::ApiError;
use crate::context::PrincipalContext;
use crate::middleware::ensure_self;

use super::user_id;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/profile", get(profile))
        .route("/:id/password", put(update_password))
}

/// GET /api/users/:id/profile
pub async fn profile(
    State(state): State<AppState>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = user_id(&id)?;
    ensure_self(&principal, id)?;
    let user = state.users.get(id).await?;
    Ok(Envelope::ok("Profile retrieved", user).into_response())
}

/// PUT /api/users/:id/password
pub async fn update_password(
    State(state): State<AppState>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = user_id(&id)?;
    ensure_self(&principal, id)?;
    let req = dto::body(payload)?;
    let user = state.users.update_password(id, req.into()).await?;
    Ok(Envelope::ok("Update password successfully", user).into_response())
}
