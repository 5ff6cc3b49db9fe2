//! Server-rendered page shells.
//!
//! Sign-in itself happens in the browser against the identity provider; these
//! pages only carry the sanitized post-login redirect and post the resulting
//! ID token to `/api/auth/session-login`.

use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::auth::sanitize_redirect;
use crate::error::{AppError, Result, set_sentry_user};
use crate::middleware::route_guard::ADMIN_HOME;
use crate::middleware::session_cookie;
use crate::services::{AuthError, AuthService};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RedirectQuery {
    pub redirect: Option<String>,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub redirect: String,
}

#[derive(Template)]
#[template(path = "signup.html")]
pub struct SignupTemplate {
    pub redirect: String,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    /// Email, or uid for accounts without one.
    pub signed_in_as: String,
}

#[derive(Template)]
#[template(path = "forbidden.html")]
pub struct ForbiddenTemplate;

fn render(template: &impl Template) -> Result<Html<String>> {
    template
        .render()
        .map(Html)
        .map_err(|e| AppError::Internal(format!("template render failed: {e}")))
}

pub async fn login(Query(query): Query<RedirectQuery>) -> Result<Html<String>> {
    render(&LoginTemplate {
        redirect: sanitize_redirect(query.redirect.as_deref()),
    })
}

pub async fn signup(Query(query): Query<RedirectQuery>) -> Result<Html<String>> {
    render(&SignupTemplate {
        redirect: sanitize_redirect(query.redirect.as_deref()),
    })
}

/// `/admin` has no page of its own.
pub async fn admin_index() -> Redirect {
    Redirect::temporary(ADMIN_HOME)
}

/// Admin dashboard shell, verified server-side.
///
/// The route guard only checked that a cookie exists. A cookie that fails
/// verification sends the visitor back to login; a non-admin gets a 403 page.
pub async fn dashboard(State(state): State<AppState>, jar: CookieJar) -> Result<Response> {
    let cookie = session_cookie(&jar, &state.config().session.cookie_name);

    match AuthService::new(state.identity())
        .verify_admin_session(cookie.as_deref())
        .await
    {
        Ok(admin) => {
            set_sentry_user(&admin.uid, admin.email.as_deref());
            Ok(render(&DashboardTemplate {
                signed_in_as: admin.email.unwrap_or_else(|| admin.uid.into_inner()),
            })?
            .into_response())
        }
        Err(AuthError::NoSession | AuthError::InvalidSession) => Ok(Redirect::temporary(&format!(
            "/login?redirect={}",
            urlencoding::encode(ADMIN_HOME)
        ))
        .into_response()),
        Err(AuthError::NotAuthorized) => {
            Ok((StatusCode::FORBIDDEN, render(&ForbiddenTemplate)?).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_login_template_escapes_redirect() {
        let html = LoginTemplate {
            redirect: "/admin?a=\"><script>".to_string(),
        }
        .render()
        .unwrap();
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_dashboard_shows_email() {
        let html = DashboardTemplate {
            signed_in_as: "owner@example.com".to_string(),
        }
        .render()
        .unwrap();
        assert!(html.contains("owner@example.com"));
    }
}
