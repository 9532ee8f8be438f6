//! Router assembly.
//!
//! - `services.rs`: store selection and the shared [`services::AppServices`]
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request bodies and query strings
//! - `errors.rs`: the `{success, data, error}` envelope

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Full router over fresh in-memory services.
pub fn build_app(jwt_secret: String) -> Router {
    build_app_with(jwt_secret, Arc::new(services::AppServices::in_memory()))
}

/// Full router over the given services. Used by `main.rs`.
pub fn build_app_with(jwt_secret: String, services: Arc<services::AppServices>) -> Router {
    let jwt = Arc::new(bierp_auth::Hs256JwtValidator::new(jwt_secret.into_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Everything except /health requires a bearer token.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
