//! Session extractors for route handlers.
//!
//! Both extractors read the session cookie, verify it against the identity
//! provider, and attach the account to the Sentry scope. Rejections are
//! `AppError`s, so API callers get JSON 401/403 bodies.

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;

use crate::error::{AppError, set_sentry_user};
use crate::models::{CurrentUser, VerifiedAdmin};
use crate::services::AuthService;
use crate::state::AppState;

/// Extractor that requires a verified session with the admin claim.
///
/// # Example
///
/// ```rust,ignore
/// async fn dashboard(RequireAdmin(admin): RequireAdmin) -> impl IntoResponse {
///     format!("Hello, {}!", admin.uid)
/// }
/// ```
pub struct RequireAdmin(pub VerifiedAdmin);

/// Extractor that requires any verified session.
pub struct RequireUser(pub CurrentUser);

/// Session cookie value, if present and non-empty.
#[must_use]
pub fn session_cookie(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let cookie = session_cookie(&jar, &state.config().session.cookie_name);

        let admin = AuthService::new(state.identity())
            .verify_admin_session(cookie.as_deref())
            .await?;

        set_sentry_user(&admin.uid, admin.email.as_deref());
        Ok(Self(admin))
    }
}

impl FromRequestParts<AppState> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let cookie = session_cookie(&jar, &state.config().session.cookie_name);

        let user = AuthService::new(state.identity())
            .verify_user_session(cookie.as_deref())
            .await?;

        set_sentry_user(&user.uid, user.email.as_deref());
        Ok(Self(user))
    }
}
