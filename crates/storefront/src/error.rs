//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. Server-side failures are
//! captured to Sentry before the response is built; clients only ever see a
//! short JSON message: `{"error": "..."}`, plus `"details"` for validation
//! failures.

use std::time::Duration;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::identity::IdentityError;
use crate::services::auth::AuthError;
use crate::services::claims::AdminClaimError;
use crate::services::orders::OrderError;
use crate::services::payments::PaymentError;

/// One invalid request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Session verification failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Identity provider operation failed.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Admin claim mutation failed.
    #[error("Claims error: {0}")]
    Claims(#[from] AdminClaimError),

    /// Payments provider operation failed.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Order placement failed.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Request fields failed validation.
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Client exceeded the API rate limit.
    #[error("Rate limited")]
    RateLimited { retry_after: Duration },

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

const INTERNAL: &str = "Internal server error";

impl AppError {
    /// Status code and client-facing message.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::Database(RepositoryError::NotFound) => {
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            Self::Auth(err) => match err {
                AuthError::NoSession | AuthError::InvalidSession | AuthError::InvalidIdToken => {
                    (StatusCode::UNAUTHORIZED, err.to_string())
                }
                AuthError::NotAuthorized => (StatusCode::FORBIDDEN, err.to_string()),
                AuthError::Identity(_) => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string()),
            },
            Self::Claims(err) => match err {
                AdminClaimError::InvalidTarget(_) | AdminClaimError::CreateRequiresEmail => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                AdminClaimError::NotFound => (StatusCode::NOT_FOUND, "User not found".to_string()),
                AdminClaimError::Identity(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string())
                }
            },
            Self::Identity(IdentityError::UserNotFound) => {
                (StatusCode::NOT_FOUND, "User not found".to_string())
            }
            Self::Payment(PaymentError::InvalidSignature(_) | PaymentError::InvalidPayload(_)) => {
                (StatusCode::BAD_REQUEST, "Invalid webhook".to_string())
            }
            Self::Order(OrderError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "Invalid order".to_string())
            }
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "Too many requests".to_string())
            }
            Self::Database(_)
            | Self::Identity(_)
            | Self::Payment(_)
            | Self::Order(_)
            | Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string()),
        }
    }

    /// HTTP status this error responds with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status_and_message().0
    }

    fn details(self) -> Option<Vec<FieldError>> {
        match self {
            Self::Validation(details) | Self::Order(OrderError::Validation(details)) => {
                Some(details)
            }
            _ => None,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let retry_after = match &self {
            Self::RateLimited { retry_after } => Some(retry_after_secs(*retry_after)),
            _ => None,
        };

        let body = ErrorBody {
            error: message,
            details: self.details(),
        };
        let mut response = (status, Json(body)).into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Whole seconds for `Retry-After`, rounded up, at least 1.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("navigation", "Viewed product page", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
