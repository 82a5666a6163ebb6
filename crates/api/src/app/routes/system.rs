use axum::{http::StatusCode, response::IntoResponse};

use crate::app::dto::Envelope;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Envelope::failure("API Endpoint is unavailable"),
    )
}
