//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                         - Liveness
//! GET  /health/ready                   - Readiness (database)
//!
//! # Pages
//! GET  /login                          - Sign-in page
//! GET  /signup                         - Sign-up page
//! GET  /admin                          - Redirect to /admin/dashboard
//! GET  /admin/dashboard                - Admin dashboard (verified server-side)
//!
//! # Auth API
//! POST /api/auth/session-login         - ID token -> session cookie
//! POST /api/auth/logout                - Clear cookie, revoke sessions
//! POST /api/auth/verify-session        - Admin check for a session
//!
//! # Orders API (signed in)
//! GET  /api/orders                     - Own orders
//! POST /api/orders                     - Place an order
//!
//! # Admin API (admin claim)
//! GET  /api/admin/orders               - All orders
//! GET  /api/admin/analytics            - Revenue summary
//! POST /api/admin/users/reset-password - Send a reset email
//! POST /api/admin/users/set-admin      - Grant admin
//! POST /api/admin/users/revoke-admin   - Revoke admin
//!
//! # Webhooks (not rate limited)
//! POST /api/webhooks/stripe            - Payment intent events
//! ```

pub mod admin;
pub mod auth;
pub mod health;
pub mod orders;
pub mod pages;
pub mod webhooks;

use axum::{
    Router,
    extract::FromRequest,
    middleware,
    routing::{get, post},
};

use crate::error::AppError;
use crate::middleware::{auth_rate_limiter, rate_limit_middleware};
use crate::state::AppState;

/// JSON request body whose rejections answer 400 with the API's error body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Create the auth API router.
///
/// Sign-in carries its own stricter per-IP limiter on top of the API limit.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/session-login",
            post(auth::session_login).layer(auth_rate_limiter()),
        )
        .route("/logout", post(auth::logout))
        .route("/verify-session", post(auth::verify_session))
}

/// Create the admin API router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(admin::orders))
        .route("/analytics", get(admin::analytics))
        .route("/users/reset-password", post(admin::reset_password))
        .route("/users/set-admin", post(admin::set_admin))
        .route("/users/revoke-admin", post(admin::revoke_admin))
}

/// Create the rate-limited JSON API router.
pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth_routes())
        .route("/orders", get(orders::list).post(orders::create))
        .nest("/admin", admin_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
}

/// Create the page router.
pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(pages::login))
        .route("/signup", get(pages::signup))
        .route("/admin", get(pages::admin_index))
        .route("/admin/dashboard", get(pages::dashboard))
}

/// Create all routes for the storefront.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .merge(page_routes())
        .nest("/api", api_routes(state))
        .route("/api/webhooks/stripe", post(webhooks::stripe))
}
