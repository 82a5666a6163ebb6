//! Request bodies and the response envelope.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};

use gatekeeper_auth::{CreateUserInput, UpdatePasswordInput, UpdateUserInput};

use crate::app::errors::ApiError;

/// Every JSON body the API produces has this shape.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            error: false,
            message: message.into(),
            data: Some(data),
        })
    }
}

impl Envelope<()> {
    pub fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            error: false,
            message: message.into(),
            data: None,
        })
    }

    pub fn failure(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            error: true,
            message: message.into(),
            data: None,
        })
    }
}

/// Unwrap a JSON body, turning extractor rejections into a 400 envelope.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(format!("Invalid request params: {}", rejection.body_text())))
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
}

impl From<CreateUserRequest> for CreateUserInput {
    fn from(req: CreateUserRequest) -> Self {
        CreateUserInput {
            username: req.username,
            email: req.email,
            name: req.name,
            password: req.password,
            role: req.role,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

impl From<UpdateUserRequest> for UpdateUserInput {
    fn from(req: UpdateUserRequest) -> Self {
        UpdateUserInput {
            username: req.username,
            email: req.email,
            name: req.name,
            role: req.role,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

impl From<UpdatePasswordRequest> for UpdatePasswordInput {
    fn from(req: UpdatePasswordRequest) -> Self {
        UpdatePasswordInput {
            current_password: req.current_password,
            new_password: req.new_password,
        }
    }
}
