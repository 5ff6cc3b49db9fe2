//! Edge route guard.
//!
//! Runs before routing on every request and decides on cookie *presence*
//! alone. It never verifies the cookie: a forged or expired session still gets
//! past the guard and is rejected by the handler that verifies it. The guard
//! only keeps signed-out visitors away from admin pages and sends signed-in
//! visitors past the login forms.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;

use crate::state::AppState;

/// Where authenticated visitors land.
pub const ADMIN_HOME: &str = "/admin/dashboard";
const LOGIN_PATH: &str = "/login";
const ADMIN_PREFIX: &str = "/admin";

/// What the guard does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Continue to the router unchanged.
    Pass,
    /// Continue, and mark the response uncacheable.
    PassNoStore,
    /// Redirect to the given location.
    Redirect(String),
}

/// Decide what to do with a request for `path`.
///
/// Rules, first match wins:
/// 1. `/dashboard` redirects to the admin dashboard.
/// 2. An admin path without a session goes to `/login?redirect=<path>`.
/// 3. An admin path with a session passes, uncached.
/// 4. `/login` or `/signup` with a session goes to the admin dashboard.
/// 5. Anything else passes.
#[must_use]
pub fn decide(path: &str, has_session: bool) -> GuardDecision {
    if path == "/dashboard" {
        return GuardDecision::Redirect(ADMIN_HOME.to_string());
    }

    if is_admin_path(path) {
        if !has_session {
            return GuardDecision::Redirect(format!(
                "{LOGIN_PATH}?redirect={}",
                urlencoding::encode(path)
            ));
        }
        return GuardDecision::PassNoStore;
    }

    if has_session && (path == LOGIN_PATH || path == "/signup") {
        return GuardDecision::Redirect(ADMIN_HOME.to_string());
    }

    GuardDecision::Pass
}

/// `/admin` itself or anything below it, but not `/administrator`.
fn is_admin_path(path: &str) -> bool {
    path.strip_prefix(ADMIN_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Middleware applying [`decide`] with the configured session cookie.
pub async fn route_guard_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let has_session = jar
        .get(&state.config().session.cookie_name)
        .is_some_and(|c| !c.value().is_empty());

    match decide(request.uri().path(), has_session) {
        GuardDecision::Pass => next.run(request).await,
        GuardDecision::PassNoStore => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store, must-revalidate"),
            );
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            response
        }
        GuardDecision::Redirect(location) => {
            tracing::debug!(path = %request.uri().path(), %location, "Route guard redirect");
            Redirect::temporary(&location).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_without_session_goes_to_login() {
        assert_eq!(
            decide("/admin/orders", false),
            GuardDecision::Redirect("/login?redirect=%2Fadmin%2Forders".into())
        );
        assert_eq!(
            decide("/admin", false),
            GuardDecision::Redirect("/login?redirect=%2Fadmin".into())
        );
    }

    #[test]
    fn test_admin_with_session_passes_uncached() {
        assert_eq!(decide("/admin/dashboard", true), GuardDecision::PassNoStore);
        assert_eq!(decide("/admin", true), GuardDecision::PassNoStore);
    }

    #[test]
    fn test_dashboard_alias() {
        assert_eq!(
            decide("/dashboard", false),
            GuardDecision::Redirect(ADMIN_HOME.into())
        );
        assert_eq!(
            decide("/dashboard", true),
            GuardDecision::Redirect(ADMIN_HOME.into())
        );
    }

    #[test]
    fn test_login_pages_skip_when_signed_in() {
        assert_eq!(
            decide("/login", true),
            GuardDecision::Redirect(ADMIN_HOME.into())
        );
        assert_eq!(
            decide("/signup", true),
            GuardDecision::Redirect(ADMIN_HOME.into())
        );
        assert_eq!(decide("/login", false), GuardDecision::Pass);
        assert_eq!(decide("/signup", false), GuardDecision::Pass);
    }

    #[test]
    fn test_other_paths_pass() {
        assert_eq!(decide("/", false), GuardDecision::Pass);
        assert_eq!(decide("/api/orders", false), GuardDecision::Pass);
        assert_eq!(decide("/administrator", false), GuardDecision::Pass);
        assert_eq!(decide("/api/admin/orders", false), GuardDecision::Pass);
    }
}
