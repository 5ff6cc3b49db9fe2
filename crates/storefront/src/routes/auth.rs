//! Session lifecycle and verification endpoints.
//!
//! ```text
//! POST /api/auth/session-login   - Exchange an ID token for a session cookie
//! POST /api/auth/logout          - Clear the cookie and revoke sessions
//! POST /api/auth/verify-session  - Report whether a session is an admin's
//! ```

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::UserRepository;
use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::route_guard::ADMIN_HOME;
use crate::middleware::session_cookie;
use crate::services::AuthError;
use crate::services::auth::{AuthService, mirror_profile};
use crate::state::AppState;

use super::ApiJson;

/// Keep a client-supplied redirect only if it is a same-origin absolute path.
#[must_use]
pub fn sanitize_redirect(redirect: Option<&str>) -> String {
    match redirect {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => ADMIN_HOME.to_string(),
    }
}

// =============================================================================
// Session login / logout
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLoginRequest {
    pub id_token: String,
    pub redirect: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLoginResponse {
    pub status: &'static str,
    pub redirect_to: String,
}

/// Exchange a fresh ID token for a session cookie.
pub async fn session_login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(request): ApiJson<SessionLoginRequest>,
) -> Result<(CookieJar, Json<SessionLoginResponse>)> {
    if request.id_token.trim().is_empty() {
        return Err(AppError::BadRequest("idToken is required".to_string()));
    }

    let session = &state.config().session;
    let (cookie_value, user) = AuthService::new(state.identity())
        .create_session(&request.id_token, session.ttl)
        .await?;

    mirror_profile(&UserRepository::new(state.pool()), &user).await;
    set_sentry_user(&user.uid, user.email.as_deref());

    let max_age = i64::try_from(session.ttl.as_secs()).unwrap_or(i64::MAX);
    let cookie = Cookie::build((session.cookie_name.clone(), cookie_value))
        .http_only(true)
        .secure(state.config().secure_cookies())
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .build();

    Ok((
        jar.add(cookie),
        Json(SessionLoginResponse {
            status: "success",
            redirect_to: sanitize_redirect(request.redirect.as_deref()),
        }),
    ))
}

/// Clear the session cookie and revoke the account's sessions if it verifies.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let name = state.config().session.cookie_name.clone();

    if let Some(cookie) = session_cookie(&jar, &name)
        && let Err(e) = AuthService::new(state.identity())
            .revoke_session(&cookie)
            .await
    {
        tracing::warn!(error = %e, "Failed to revoke sessions on logout");
    }
    clear_sentry_user();

    (
        jar.remove(Cookie::build(name).path("/")),
        Json(json!({ "status": "success" })),
    )
}

// =============================================================================
// Session verification
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct VerifySessionRequest {
    pub session: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionResponse {
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifySessionResponse {
    fn denied(status: StatusCode, err: &AuthError) -> Response {
        let body = Self {
            is_admin: false,
            uid: None,
            email: None,
            error: Some(err.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// Verify a session token (from the body, or the session cookie) and report
/// whether it belongs to an admin.
///
/// The body is optional and parsed leniently; an unreadable body is treated as
/// carrying no session.
pub async fn verify_session(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response> {
    let request: VerifySessionRequest = serde_json::from_slice(&body).unwrap_or_default();
    let token = request
        .session
        .filter(|s| !s.is_empty())
        .or_else(|| session_cookie(&jar, &state.config().session.cookie_name));

    match AuthService::new(state.identity())
        .verify_admin_session(token.as_deref())
        .await
    {
        Ok(admin) => Ok(Json(VerifySessionResponse {
            is_admin: true,
            uid: Some(admin.uid.into_inner()),
            email: admin.email,
            error: None,
        })
        .into_response()),
        Err(err @ (AuthError::NoSession | AuthError::InvalidSession)) => {
            Ok(VerifySessionResponse::denied(StatusCode::UNAUTHORIZED, &err))
        }
        Err(err @ AuthError::NotAuthorized) => {
            Ok(VerifySessionResponse::denied(StatusCode::FORBIDDEN, &err))
        }
        Err(err) => Err(err.into()),
    }
}
