//! Emporium storefront library.
//!
//! This crate provides the storefront server as a library, allowing the
//! router to be tested in-process and the CLI to reuse its services.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::{Router, middleware as axum_middleware};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::state::AppState;

/// Directory served under `/static`.
pub const STATIC_DIR: &str = "crates/storefront/static";

/// Build the complete application router.
///
/// The route guard is a layer on the whole router, so it sees every request
/// before routing, including paths with no handler. Security headers wrap the
/// guard so its redirects carry them too.
pub fn app(state: AppState) -> Router {
    routes::routes(&state)
        .nest_service("/static", ServeDir::new(STATIC_DIR))
        .layer(axum_middleware::from_fn(
            middleware::request_id_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::route_guard_middleware,
        ))
        .layer(axum_middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .with_state(state)
}

fn make_request_span(request: &axum::http::Request<axum::body::Body>) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = tracing::field::Empty,
    )
}
