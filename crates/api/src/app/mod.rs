//! HTTP application wiring (Axum router + shared state).
//!
//! - `services.rs`: builds [`AppState`] from configuration (store choice,
//!   schema, policy seeding, root admin)
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request bodies and the response envelope
//! - `errors.rs`: error → response mapping

use std::sync::Arc;

use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use gatekeeper_auth::{PolicyEnforcer, TokenService, UserLifecycle};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Shared per-process state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub enforcer: Arc<PolicyEnforcer>,
    pub users: UserLifecycle,
}

impl AppState {
    pub fn new(tokens: Arc<TokenService>, enforcer: Arc<PolicyEnforcer>, users: UserLifecycle) -> Self {
        Self {
            tokens,
            enforcer,
            users,
        }
    }
}

/// Build the full HTTP router.
pub fn build_app(state: AppState) -> Router {
    // Every route in here runs the authorization pipeline first. The nested
    // fallbacks keep unknown paths under these prefixes behind it as well.
    let protected = Router::new()
        .nest(
            "/api/admin",
            routes::admin::router().fallback(routes::system::not_found),
        )
        .nest(
            "/api/users",
            routes::users::router().fallback(routes::system::not_found),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authorize,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/auth", routes::auth::router())
        .merge(protected)
        .fallback(routes::system::not_found)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
