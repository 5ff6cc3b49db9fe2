//! Session verification service.
//!
//! Turns a session cookie into an identity and, for admin routes, an
//! authorization decision. Authorization always reads the *live* account from
//! the identity provider: claims embedded in the cookie may be up to a session
//! lifetime old, and a revoked admin must lose access immediately.

mod error;

pub use error::AuthError;

use std::time::Duration;

use tracing::instrument;

use emporium_core::{Uid, UserRole};

use crate::db::UserRepository;
use crate::identity::{IdentityError, IdentityProvider, UserRecord};
use crate::models::{CurrentUser, VerifiedAdmin};

/// Session verification and sign-in.
pub struct AuthService<'a> {
    identity: &'a dyn IdentityProvider,
}

impl<'a> AuthService<'a> {
    #[must_use]
    pub const fn new(identity: &'a dyn IdentityProvider) -> Self {
        Self { identity }
    }

    /// Verify a session cookie and require the admin claim.
    ///
    /// # Errors
    ///
    /// - `AuthError::NoSession` if `cookie` is absent or empty
    /// - `AuthError::InvalidSession` if verification fails or the account is gone
    /// - `AuthError::NotAuthorized` if the live account is not an admin
    /// - `AuthError::Identity` if the provider fails while re-fetching the account
    #[instrument(skip_all)]
    pub async fn verify_admin_session(
        &self,
        cookie: Option<&str>,
    ) -> Result<VerifiedAdmin, AuthError> {
        let user = self.verified_account(cookie).await?;

        if !user.custom_claims.is_admin() {
            tracing::info!(uid = %user.uid, "Verified session lacks admin claim");
            return Err(AuthError::NotAuthorized);
        }

        Ok(VerifiedAdmin {
            uid: user.uid,
            email: user.email,
        })
    }

    /// Verify a session cookie for any signed-in account.
    ///
    /// # Errors
    ///
    /// Same as [`Self::verify_admin_session`], minus `NotAuthorized`.
    #[instrument(skip_all)]
    pub async fn verify_user_session(
        &self,
        cookie: Option<&str>,
    ) -> Result<CurrentUser, AuthError> {
        let user = self.verified_account(cookie).await?;
        Ok(CurrentUser {
            is_admin: user.custom_claims.is_admin(),
            uid: user.uid,
            email: user.email,
        })
    }

    /// Exchange an ID token for a session cookie.
    ///
    /// Returns the cookie and the account it belongs to.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidIdToken` if the provider rejects the token,
    /// `AuthError::Identity` if the provider fails.
    #[instrument(skip_all)]
    pub async fn create_session(
        &self,
        id_token: &str,
        valid_for: Duration,
    ) -> Result<(String, UserRecord), AuthError> {
        let cookie = self
            .identity
            .create_session_cookie(id_token, valid_for)
            .await
            .map_err(|e| reject_or_fail(e, AuthError::InvalidIdToken))?;

        let session = self
            .identity
            .verify_session_cookie(&cookie, false)
            .await
            .map_err(|e| reject_or_fail(e, AuthError::InvalidIdToken))?;
        let user = self.identity.get_user(&session.uid).await?;

        tracing::info!(uid = %user.uid, "Session created");
        Ok((cookie, user))
    }

    /// Revoke every session of the account behind `cookie`, if it verifies.
    ///
    /// Returns the uid whose sessions were revoked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Identity` if revocation fails at the provider.
    #[instrument(skip_all)]
    pub async fn revoke_session(&self, cookie: &str) -> Result<Option<Uid>, AuthError> {
        let Ok(session) = self.identity.verify_session_cookie(cookie, false).await else {
            return Ok(None);
        };
        self.identity.revoke_refresh_tokens(&session.uid).await?;
        tracing::info!(uid = %session.uid, "Revoked sessions on logout");
        Ok(Some(session.uid))
    }

    async fn verified_account(&self, cookie: Option<&str>) -> Result<UserRecord, AuthError> {
        let cookie = cookie.filter(|c| !c.is_empty()).ok_or(AuthError::NoSession)?;

        let session = self
            .identity
            .verify_session_cookie(cookie, true)
            .await
            .map_err(|e| {
                if e.is_rejection() {
                    tracing::debug!(error = %e, "Session rejected");
                } else {
                    tracing::warn!(error = %e, "Session verification failed");
                }
                AuthError::InvalidSession
            })?;

        match self.identity.get_user(&session.uid).await {
            Ok(user) => Ok(user),
            Err(IdentityError::UserNotFound) => Err(AuthError::InvalidSession),
            Err(e) => Err(AuthError::Identity(e)),
        }
    }
}

/// Mirror the signed-in account into `users`. Failures are logged, never raised.
pub async fn mirror_profile(users: &UserRepository<'_>, user: &UserRecord) {
    let role = UserRole::from_admin(user.custom_claims.is_admin());
    if let Err(e) = users
        .upsert(
            &user.uid,
            user.email.as_deref(),
            user.display_name.as_deref(),
            role,
        )
        .await
    {
        tracing::warn!(uid = %user.uid, error = %e, "Failed to mirror user profile");
    }
}

fn reject_or_fail(err: IdentityError, rejection: AuthError) -> AuthError {
    if err.is_rejection() {
        tracing::debug!(error = %err, "Credential rejected");
        rejection
    } else {
        AuthError::Identity(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use emporium_core::{CustomClaims, Email};

    use super::*;
    use crate::identity::LocalIdentityProvider;

    const TTL: Duration = Duration::from_secs(3600);

    fn provider() -> LocalIdentityProvider {
        LocalIdentityProvider::new(&SecretString::from("p4$Vt9!Qe2@Lm7#Rx5%Zc8^Nb3&Hk6*W"))
    }

    async fn session_for(provider: &LocalIdentityProvider, email: &str, admin: bool) -> String {
        let user = provider
            .create_user(&Email::parse(email).unwrap())
            .await
            .unwrap();
        if admin {
            provider
                .set_custom_claims(&user.uid, &CustomClaims::new().with_admin(true))
                .await
                .unwrap();
        }
        let id_token = provider.issue_id_token(&user.uid).await.unwrap();
        provider.create_session_cookie(&id_token, TTL).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_or_empty_cookie() {
        let provider = provider();
        let auth = AuthService::new(&provider);
        assert!(matches!(
            auth.verify_admin_session(None).await,
            Err(AuthError::NoSession)
        ));
        assert!(matches!(
            auth.verify_admin_session(Some("")).await,
            Err(AuthError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_garbage_cookie_is_invalid_session() {
        let provider = provider();
        let auth = AuthService::new(&provider);
        assert!(matches!(
            auth.verify_admin_session(Some("not.a.jwt")).await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_non_admin_is_not_authorized() {
        let provider = provider();
        let cookie = session_for(&provider, "shopper@example.com", false).await;
        let auth = AuthService::new(&provider);

        assert!(matches!(
            auth.verify_admin_session(Some(&cookie)).await,
            Err(AuthError::NotAuthorized)
        ));
        let user = auth.verify_user_session(Some(&cookie)).await.unwrap();
        assert!(!user.is_admin);
    }

    #[tokio::test]
    async fn test_admin_verified() {
        let provider = provider();
        let cookie = session_for(&provider, "owner@example.com", true).await;
        let auth = AuthService::new(&provider);

        let admin = auth.verify_admin_session(Some(&cookie)).await.unwrap();
        assert_eq!(admin.email.as_deref(), Some("owner@example.com"));
    }

    #[tokio::test]
    async fn test_live_claims_win_over_cookie_claims() {
        let provider = provider();
        let cookie = session_for(&provider, "owner@example.com", true).await;
        let auth = AuthService::new(&provider);
        let admin = auth.verify_admin_session(Some(&cookie)).await.unwrap();

        // Claim removed after the cookie was minted.
        provider
            .set_custom_claims(&admin.uid, &CustomClaims::new())
            .await
            .unwrap();

        assert!(matches!(
            auth.verify_admin_session(Some(&cookie)).await,
            Err(AuthError::NotAuthorized)
        ));
    }

    #[tokio::test]
    async fn test_revoked_session_is_invalid() {
        let provider = provider();
        let cookie = session_for(&provider, "owner@example.com", true).await;
        let auth = AuthService::new(&provider);

        let revoked = auth.revoke_session(&cookie).await.unwrap();
        assert!(revoked.is_some());
        assert!(matches!(
            auth.verify_admin_session(Some(&cookie)).await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_create_session_rejects_bad_id_token() {
        let provider = provider();
        let auth = AuthService::new(&provider);
        assert!(matches!(
            auth.create_session("bogus", TTL).await,
            Err(AuthError::InvalidIdToken)
        ));
    }
}
