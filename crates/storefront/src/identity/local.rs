//! In-process identity provider for local development and tests.
//!
//! Accounts live in memory. ID tokens and session cookies are HS256 JWTs
//! signed with `LOCAL_IDENTITY_SECRET`, with distinct audiences so one cannot
//! be replayed as the other. Revocation and disabled accounts behave like the
//! hosted provider.
//!
//! Token times are whole seconds. Revocation cuts off at the start of the
//! next second, and a sign-in before that second arrives is stamped with it,
//! so sessions issued before a revocation are always revoked and sessions
//! issued after it never are.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use emporium_core::{CustomClaims, Email, Uid};

use super::{
    DecodedSession, IdentityError, IdentityProvider, SessionTokenClaims, UserRecord,
    map_jwt_error,
};

/// Issuer of every locally signed token.
pub const LOCAL_ISSUER: &str = "emporium-local";
/// Audience of ID tokens (proof of a fresh sign-in).
pub const LOCAL_ID_AUDIENCE: &str = "local-id";
/// Audience of session cookies.
pub const LOCAL_SESSION_AUDIENCE: &str = "local-session";

const ID_TOKEN_TTL_SECS: i64 = 60 * 60;
const UID_LENGTH: usize = 28;

/// Memory-backed [`IdentityProvider`].
pub struct LocalIdentityProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    users: RwLock<HashMap<Uid, UserRecord>>,
}

impl LocalIdentityProvider {
    #[must_use]
    pub fn new(signing_secret: &SecretString) -> Self {
        let secret = signing_secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Sign in as `uid`, returning an ID token suitable for
    /// [`IdentityProvider::create_session_cookie`].
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` or `UserDisabled` for unusable accounts.
    pub async fn issue_id_token(&self, uid: &Uid) -> Result<String, IdentityError> {
        let user = self.get_user(uid).await?;
        if user.disabled {
            return Err(IdentityError::UserDisabled);
        }
        let now = Utc::now().timestamp();
        let auth_time = user.tokens_valid_after.map_or(now, |after| after.max(now));
        self.sign(&user, LOCAL_ID_AUDIENCE, auth_time, now, now + ID_TOKEN_TTL_SECS)
    }

    /// Enable or disable an account.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if the account does not exist.
    pub async fn set_disabled(&self, uid: &Uid, disabled: bool) -> Result<(), IdentityError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(uid).ok_or(IdentityError::UserNotFound)?;
        user.disabled = disabled;
        Ok(())
    }

    fn sign(
        &self,
        user: &UserRecord,
        audience: &str,
        auth_time: i64,
        iat: i64,
        exp: i64,
    ) -> Result<String, IdentityError> {
        let mut extra: Map<String, Value> = user.custom_claims.as_map().clone();
        extra.insert("aud".to_string(), Value::String(audience.to_string()));
        extra.insert("iss".to_string(), Value::String(LOCAL_ISSUER.to_string()));

        let claims = SessionTokenClaims {
            sub: user.uid.as_str().to_string(),
            iat,
            exp,
            auth_time: Some(auth_time),
            email: user.email.clone(),
            extra,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| IdentityError::Key(format!("jwt encode: {e}")))
    }

    fn decode(&self, token: &str, audience: &str) -> Result<SessionTokenClaims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(&[audience]);
        validation.set_issuer(&[LOCAL_ISSUER]);

        decode::<SessionTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| map_jwt_error(&e))
    }

    async fn find_by_email(&self, email: &Email) -> Option<UserRecord> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email.as_deref() == Some(email.as_str()))
            .cloned()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn verify_session_cookie(
        &self,
        cookie: &str,
        check_revoked: bool,
    ) -> Result<DecodedSession, IdentityError> {
        let session = self.decode(cookie, LOCAL_SESSION_AUDIENCE)?.into_session()?;

        if check_revoked {
            let user = self.get_user(&session.uid).await?;
            if user.disabled {
                return Err(IdentityError::UserDisabled);
            }
            if user.revokes(session.auth_time) {
                return Err(IdentityError::Revoked);
            }
        }

        Ok(session)
    }

    async fn create_session_cookie(
        &self,
        id_token: &str,
        valid_for: Duration,
    ) -> Result<String, IdentityError> {
        let id_claims = self.decode(id_token, LOCAL_ID_AUDIENCE)?;
        let user = self.get_user(&Uid::new(id_claims.sub.clone())).await?;
        if user.disabled {
            return Err(IdentityError::UserDisabled);
        }

        let now = Utc::now().timestamp();
        let ttl = i64::try_from(valid_for.as_secs())
            .map_err(|_| IdentityError::InvalidToken("session duration too long".to_string()))?;
        let auth_time = id_claims.auth_time.unwrap_or(id_claims.iat);
        self.sign(&user, LOCAL_SESSION_AUDIENCE, auth_time, now, now + ttl)
    }

    async fn get_user(&self, uid: &Uid) -> Result<UserRecord, IdentityError> {
        self.users
            .read()
            .await
            .get(uid)
            .cloned()
            .ok_or(IdentityError::UserNotFound)
    }

    async fn get_user_by_email(&self, email: &Email) -> Result<UserRecord, IdentityError> {
        self.find_by_email(email)
            .await
            .ok_or(IdentityError::UserNotFound)
    }

    async fn create_user(&self, email: &Email) -> Result<UserRecord, IdentityError> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.email.as_deref() == Some(email.as_str()))
        {
            return Err(IdentityError::EmailExists);
        }

        let uid = Uid::new(
            rng()
                .sample_iter(&Alphanumeric)
                .take(UID_LENGTH)
                .map(char::from)
                .collect::<String>(),
        );
        let record = UserRecord {
            uid: uid.clone(),
            email: Some(email.as_str().to_string()),
            display_name: None,
            disabled: false,
            custom_claims: CustomClaims::new(),
            tokens_valid_after: None,
        };
        users.insert(uid, record.clone());
        drop(users);

        tracing::info!(uid = %record.uid, email = %email, "Created local account");
        Ok(record)
    }

    async fn set_custom_claims(
        &self,
        uid: &Uid,
        claims: &CustomClaims,
    ) -> Result<(), IdentityError> {
        claims.validate()?;
        let mut users = self.users.write().await;
        let user = users.get_mut(uid).ok_or(IdentityError::UserNotFound)?;
        user.custom_claims = claims.clone();
        Ok(())
    }

    async fn revoke_refresh_tokens(&self, uid: &Uid) -> Result<(), IdentityError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(uid).ok_or(IdentityError::UserNotFound)?;
        user.tokens_valid_after = Some(Utc::now().timestamp() + 1);
        Ok(())
    }

    async fn send_password_reset(&self, email: &Email) -> Result<(), IdentityError> {
        let user = self.get_user_by_email(email).await?;
        tracing::info!(uid = %user.uid, "Password reset requested (local provider sends no email)");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SESSION_TTL: Duration = Duration::from_secs(60 * 60);

    fn provider() -> LocalIdentityProvider {
        LocalIdentityProvider::new(&SecretString::from("q7R!v2#Lm9@Xc4$Tz8&Hn1*Bp6^Wd3%K"))
    }

    async fn signed_in(provider: &LocalIdentityProvider, email: &str) -> (Uid, String) {
        let user = provider
            .create_user(&Email::parse(email).unwrap())
            .await
            .unwrap();
        let id_token = provider.issue_id_token(&user.uid).await.unwrap();
        let cookie = provider
            .create_session_cookie(&id_token, SESSION_TTL)
            .await
            .unwrap();
        (user.uid, cookie)
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let provider = provider();
        let (uid, cookie) = signed_in(&provider, "shopper@example.com").await;

        let session = provider.verify_session_cookie(&cookie, true).await.unwrap();
        assert_eq!(session.uid, uid);
        assert_eq!(session.email.as_deref(), Some("shopper@example.com"));
        assert!(!session.claims.is_admin());
    }

    #[tokio::test]
    async fn test_id_token_is_not_a_session() {
        let provider = provider();
        let user = provider
            .create_user(&Email::parse("a@example.com").unwrap())
            .await
            .unwrap();
        let id_token = provider.issue_id_token(&user.uid).await.unwrap();

        let err = provider
            .verify_session_cookie(&id_token, false)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_foreign_signature_rejected() {
        let provider = provider();
        let (_, cookie) = signed_in(&provider, "a@example.com").await;

        let other = LocalIdentityProvider::new(&SecretString::from("Zz9!Yy8@Xx7#Ww6$Vv5%Uu4^Tt3&Ss2*"));
        let err = other.verify_session_cookie(&cookie, false).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_revocation_applies_only_when_checked() {
        let provider = provider();
        let (uid, cookie) = signed_in(&provider, "a@example.com").await;

        provider.revoke_refresh_tokens(&uid).await.unwrap();

        assert!(provider.verify_session_cookie(&cookie, false).await.is_ok());
        let err = provider.verify_session_cookie(&cookie, true).await.unwrap_err();
        assert!(matches!(err, IdentityError::Revoked));
    }

    #[tokio::test]
    async fn test_sign_in_right_after_revocation_is_valid() {
        let provider = provider();
        let (uid, old) = signed_in(&provider, "a@example.com").await;

        provider.revoke_refresh_tokens(&uid).await.unwrap();
        let id_token = provider.issue_id_token(&uid).await.unwrap();
        let fresh = provider
            .create_session_cookie(&id_token, SESSION_TTL)
            .await
            .unwrap();

        assert!(matches!(
            provider.verify_session_cookie(&old, true).await,
            Err(IdentityError::Revoked)
        ));
        let session = provider.verify_session_cookie(&fresh, true).await.unwrap();
        assert_eq!(session.uid, uid);
    }

    #[tokio::test]
    async fn test_disabled_account_rejected() {
        let provider = provider();
        let (uid, cookie) = signed_in(&provider, "a@example.com").await;

        provider.set_disabled(&uid, true).await.unwrap();

        let err = provider.verify_session_cookie(&cookie, true).await.unwrap_err();
        assert!(matches!(err, IdentityError::UserDisabled));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let provider = provider();
        let email = Email::parse("dup@example.com").unwrap();
        provider.create_user(&email).await.unwrap();
        assert!(matches!(
            provider.create_user(&email).await,
            Err(IdentityError::EmailExists)
        ));
    }

    #[tokio::test]
    async fn test_claims_validated_and_stored() {
        let provider = provider();
        let user = provider
            .create_user(&Email::parse("a@example.com").unwrap())
            .await
            .unwrap();

        let claims = CustomClaims::new().with_admin(true);
        provider.set_custom_claims(&user.uid, &claims).await.unwrap();
        assert!(provider.get_user(&user.uid).await.unwrap().custom_claims.is_admin());

        assert!(matches!(
            provider.set_custom_claims(&Uid::new("missing"), &claims).await,
            Err(IdentityError::UserNotFound)
        ));
    }
}
