//! Identity provider boundary.
//!
//! The provider owns accounts, issues session cookies, and stores the custom
//! claims that decide admin access. Everything above this module talks to it
//! through [`IdentityProvider`], so the server can run against Firebase in
//! production and against [`LocalIdentityProvider`] in development and tests.

mod firebase;
mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use emporium_core::{CustomClaims, CustomClaimsError, Email, Uid};

use crate::config::IdentityConfig;

pub use firebase::FirebaseIdentityProvider;
pub use local::{LOCAL_ID_AUDIENCE, LOCAL_ISSUER, LOCAL_SESSION_AUDIENCE, LocalIdentityProvider};

/// Errors from the identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Token is malformed, forged, or issued for someone else.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    /// Session predates a refresh-token revocation.
    #[error("session revoked")]
    Revoked,

    #[error("account disabled")]
    UserDisabled,

    #[error("account not found")]
    UserNotFound,

    #[error("an account with this email already exists")]
    EmailExists,

    #[error("invalid custom claims: {0}")]
    InvalidClaims(#[from] CustomClaimsError),

    /// Could not reach the provider.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider answered with an error we do not map.
    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    /// Signing or verification key problem.
    #[error("key error: {0}")]
    Key(String),
}

impl IdentityError {
    /// Whether the error is a verdict on the presented credential rather than
    /// a failure to reach a verdict.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken(_)
                | Self::Expired
                | Self::Revoked
                | Self::UserDisabled
                | Self::UserNotFound
        )
    }
}

/// A verified session cookie.
#[derive(Debug, Clone)]
pub struct DecodedSession {
    pub uid: Uid,
    pub email: Option<String>,
    /// When the user originally signed in (seconds since epoch).
    pub auth_time: i64,
    pub expires_at: i64,
    /// Claims embedded when the cookie was minted. May be stale; use the live
    /// account record for authorization.
    pub claims: CustomClaims,
}

/// An account as the provider currently sees it.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub uid: Uid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub disabled: bool,
    pub custom_claims: CustomClaims,
    /// Sessions authenticated before this instant (seconds) are revoked.
    pub tokens_valid_after: Option<i64>,
}

impl UserRecord {
    /// Whether a session that authenticated at `auth_time` predates the
    /// account's last revocation.
    #[must_use]
    pub fn revokes(&self, auth_time: i64) -> bool {
        self.tokens_valid_after
            .is_some_and(|valid_after| auth_time < valid_after)
    }
}

/// Operations the storefront needs from an identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a session cookie's signature, expiry, issuer and audience.
    ///
    /// With `check_revoked`, the live account is also consulted: a missing
    /// account, a disabled account, or a revocation after sign-in all fail.
    async fn verify_session_cookie(
        &self,
        cookie: &str,
        check_revoked: bool,
    ) -> Result<DecodedSession, IdentityError>;

    /// Exchange a freshly issued ID token for a session cookie.
    async fn create_session_cookie(
        &self,
        id_token: &str,
        valid_for: Duration,
    ) -> Result<String, IdentityError>;

    /// Fetch the live account. Missing accounts are `UserNotFound`.
    async fn get_user(&self, uid: &Uid) -> Result<UserRecord, IdentityError>;

    async fn get_user_by_email(&self, email: &Email) -> Result<UserRecord, IdentityError>;

    /// Create an account with no password; the owner sets one via reset.
    async fn create_user(&self, email: &Email) -> Result<UserRecord, IdentityError>;

    /// Replace the account's custom claims with `claims`.
    async fn set_custom_claims(&self, uid: &Uid, claims: &CustomClaims)
    -> Result<(), IdentityError>;

    /// Invalidate every session issued to the account so far.
    async fn revoke_refresh_tokens(&self, uid: &Uid) -> Result<(), IdentityError>;

    /// Ask the provider to email a password reset link.
    async fn send_password_reset(&self, email: &Email) -> Result<(), IdentityError>;
}

/// Build the provider selected in configuration.
///
/// # Errors
///
/// Returns `IdentityError::Key` if the service account key cannot be loaded.
pub fn from_config(config: &IdentityConfig) -> Result<Arc<dyn IdentityProvider>, IdentityError> {
    match config {
        IdentityConfig::Firebase(firebase) => {
            Ok(Arc::new(FirebaseIdentityProvider::new(firebase.clone())?))
        }
        IdentityConfig::Local { signing_secret } => {
            tracing::warn!("Using the local identity provider; accounts live in memory only");
            Ok(Arc::new(LocalIdentityProvider::new(signing_secret)))
        }
    }
}

/// Claims carried by a session token.
///
/// Standard fields are typed; everything else, custom claims included, lands
/// in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SessionTokenClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionTokenClaims {
    pub(crate) fn into_session(self) -> Result<DecodedSession, IdentityError> {
        if self.sub.is_empty() {
            return Err(IdentityError::InvalidToken("empty subject".to_string()));
        }
        Ok(DecodedSession {
            uid: Uid::new(self.sub),
            email: self.email,
            auth_time: self.auth_time.unwrap_or(self.iat),
            expires_at: self.exp,
            claims: CustomClaims::from_token_claims(self.extra),
        })
    }
}

/// Map a `jsonwebtoken` failure onto the provider error vocabulary.
pub(crate) fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> IdentityError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => IdentityError::Expired,
        other => IdentityError::InvalidToken(format!("{other:?}")),
    }
}
