//! Admin user management. Reached only through the authorization pipeline;
//! the seeded policy grants `/api/admin/*` to the `admin` role.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::app::AppState;
use crate::app::dto::{self, CreateUserRequest, Envelope, UpdateUserRequest};
use crate::app::errors::ApiError;

use super::user_id;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

/// GET /api/admin/users
pub async fn list_users(State(state): State<AppState>) -> Result<Response, ApiError> {
    let users = state.users.list().await?;
    Ok(Envelope::ok("Users retrieved", users).into_response())
}

/// GET /api/admin/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let user = state.users.get(user_id(&id)?).await?;
    Ok(Envelope::ok("User retrieved", user).into_response())
}

/// POST /api/admin/users - create a user and its role binding
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = dto::body(payload)?;
    let user = state.users.create(req.into()).await?;
    Ok((
        StatusCode::CREATED,
        Envelope::ok("New user registered successfully", user),
    )
        .into_response())
}

/// PUT /api/admin/users/:id - partial update; a new role replaces the binding
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = user_id(&id)?;
    let req = dto::body(payload)?;
    let user = state.users.update(id, req.into()).await?;
    Ok(Envelope::ok("Update user successfully", user).into_response())
}

/// DELETE /api/admin/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.users.delete(user_id(&id)?).await?;
    Ok(Envelope::message("Delete user successfully").into_response())
}
