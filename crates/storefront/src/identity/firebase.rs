//! Firebase Authentication over the Identity Toolkit REST API.
//!
//! Admin calls authenticate with a service account: a short-lived RS256
//! assertion is exchanged for an OAuth2 access token, which is cached until a
//! minute before it expires. Session cookies are verified locally against the
//! provider's published signing keys, cached for an hour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

use emporium_core::{CustomClaims, Email, Uid};

use super::{
    DecodedSession, IdentityError, IdentityProvider, SessionTokenClaims, UserRecord,
    map_jwt_error,
};
use crate::config::FirebaseConfig;

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const IDENTITY_TOOLKIT: &str = "https://identitytoolkit.googleapis.com/v1";
const OAUTH_SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform \
                            https://www.googleapis.com/auth/identitytoolkit";
const SESSION_ISSUER_PREFIX: &str = "https://session.firebase.google.com/";

const ASSERTION_TTL_SECS: i64 = 60 * 60;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const KEYS_TTL: Duration = Duration::from_secs(60 * 60);
const KEYS_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct AccessToken {
    token: SecretString,
    expires_at: i64,
}

impl AccessToken {
    fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at - TOKEN_REFRESH_MARGIN_SECS
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

/// Account as returned by `accounts:lookup`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    custom_attributes: Option<String>,
    /// Seconds since epoch, as a decimal string.
    #[serde(default)]
    valid_since: Option<String>,
}

impl TryFrom<AccountInfo> for UserRecord {
    type Error = IdentityError;

    fn try_from(info: AccountInfo) -> Result<Self, Self::Error> {
        let custom_claims = info
            .custom_attributes
            .as_deref()
            .map(CustomClaims::from_json_str)
            .transpose()?
            .unwrap_or_default();
        let tokens_valid_after = info.valid_since.and_then(|v| v.parse::<i64>().ok());

        Ok(Self {
            uid: Uid::new(info.local_id),
            email: info.email,
            display_name: info.display_name,
            disabled: info.disabled,
            custom_claims,
            tokens_valid_after,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCookieResponse {
    session_cookie: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

/// Session cookie signing keys by key id.
type SessionKeys = HashMap<String, DecodingKey>;

/// Cached session cookie signing keys.
///
/// A key id missing from the cached set triggers a reload, at most once per
/// `KEYS_FORCED_REFRESH_INTERVAL`, so rotated keys are picked up before the
/// cache entry expires.
struct SessionKeyStore {
    url: String,
    http: reqwest::Client,
    cache: Cache<String, Arc<SessionKeys>>,
    last_forced_refresh: Mutex<Option<Instant>>,
}

impl SessionKeyStore {
    fn new(url: String, http: reqwest::Client) -> Self {
        Self {
            url,
            http,
            cache: Cache::builder().max_capacity(4).time_to_live(KEYS_TTL).build(),
            last_forced_refresh: Mutex::new(None),
        }
    }

    async fn key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        if let Some(key) = self.load().await?.get(kid) {
            return Ok(key.clone());
        }
        if !self.claim_forced_refresh(Instant::now()).await {
            return Err(unknown_key_id());
        }

        tracing::info!(kid, "Unknown session key id; reloading signing keys");
        self.cache.invalidate(&self.url).await;
        self.load().await?.get(kid).cloned().ok_or_else(unknown_key_id)
    }

    async fn claim_forced_refresh(&self, now: Instant) -> bool {
        let mut last = self.last_forced_refresh.lock().await;
        if last.is_some_and(|at| now.duration_since(at) < KEYS_FORCED_REFRESH_INTERVAL) {
            return false;
        }
        *last = Some(now);
        true
    }

    async fn load(&self) -> Result<Arc<SessionKeys>, IdentityError> {
        let url = self.url.clone();
        let http = self.http.clone();

        self.cache
            .try_get_with(url.clone(), async move {
                let body: Value = http.get(&url).send().await?.error_for_status()?.json().await?;
                let keys = parse_session_keys(body)?;
                tracing::info!(count = keys.len(), "Loaded session cookie signing keys");
                Ok::<_, IdentityError>(Arc::new(keys))
            })
            .await
            .map_err(|e| IdentityError::Key(format!("could not load session keys: {e}")))
    }
}

fn unknown_key_id() -> IdentityError {
    IdentityError::InvalidToken("unknown key id".to_string())
}

/// [`IdentityProvider`] backed by Firebase Authentication.
pub struct FirebaseIdentityProvider {
    config: FirebaseConfig,
    http: reqwest::Client,
    signing_key: EncodingKey,
    access_token: RwLock<Option<AccessToken>>,
    session_keys: SessionKeyStore,
}

impl FirebaseIdentityProvider {
    /// Create a provider from service account configuration.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Key` if the private key is not a valid RSA PEM,
    /// or `IdentityError::Transport` if the HTTP client cannot be built.
    pub fn new(config: FirebaseConfig) -> Result<Self, IdentityError> {
        let signing_key = EncodingKey::from_rsa_pem(config.private_key.expose_secret().as_bytes())
            .map_err(|e| IdentityError::Key(format!("invalid service account key: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let session_keys = SessionKeyStore::new(config.session_keys_url.clone(), http.clone());

        Ok(Self {
            config,
            http,
            signing_key,
            access_token: RwLock::new(None),
            session_keys,
        })
    }

    fn project_url(&self, path: &str) -> String {
        format!("{IDENTITY_TOOLKIT}/projects/{}/{path}", self.config.project_id)
    }

    fn session_issuer(&self) -> String {
        format!("{SESSION_ISSUER_PREFIX}{}", self.config.project_id)
    }

    /// Return a cached access token, minting a new one when it is close to expiry.
    async fn bearer_token(&self) -> Result<SecretString, IdentityError> {
        let now = Utc::now().timestamp();
        if let Some(token) = self.access_token.read().await.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.token.clone());
        }

        let mut guard = self.access_token.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(token) = guard.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.token.clone());
        }

        let token = self.fetch_access_token(now).await?;
        let secret = token.token.clone();
        *guard = Some(token);
        Ok(secret)
    }

    #[instrument(skip(self))]
    async fn fetch_access_token(&self, now: i64) -> Result<AccessToken, IdentityError> {
        let claims = AssertionClaims {
            iss: &self.config.client_email,
            scope: OAUTH_SCOPES,
            aud: TOKEN_ENDPOINT,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| IdentityError::Key(format!("assertion signing failed: {e}")))?;

        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(IdentityError::Provider {
                status: status.as_u16(),
                message: format!("token exchange failed: {message}"),
            });
        }

        let body: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = body.expires_in, "Obtained service account access token");
        Ok(AccessToken {
            token: SecretString::from(body.access_token),
            expires_at: now + body.expires_in,
        })
    }

    /// POST an authenticated JSON request and decode the JSON response.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<T, IdentityError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response
            .json::<ErrorEnvelope>()
            .await
            .map(|e| e.error.message)
            .unwrap_or_default();
        Err(map_provider_error(status.as_u16(), message))
    }

    async fn lookup(&self, body: Value) -> Result<UserRecord, IdentityError> {
        let response: LookupResponse = self.call(&self.project_url("accounts:lookup"), &body).await?;
        response
            .users
            .into_iter()
            .next()
            .ok_or(IdentityError::UserNotFound)?
            .try_into()
    }

}

/// Parse a key set published either as a JWKS document or as a map of key id
/// to PEM certificate.
fn parse_session_keys(body: Value) -> Result<SessionKeys, IdentityError> {
    if body.get("keys").is_some() {
        let set: JwkSet = serde_json::from_value(body)
            .map_err(|e| IdentityError::Key(format!("invalid JWKS: {e}")))?;
        return set
            .keys
            .iter()
            .filter_map(|jwk| jwk.common.key_id.clone().map(|kid| (kid, jwk)))
            .map(|(kid, jwk)| {
                DecodingKey::from_jwk(jwk)
                    .map(|key| (kid, key))
                    .map_err(|e| IdentityError::Key(format!("invalid JWK: {e}")))
            })
            .collect();
    }

    let certs: HashMap<String, String> = serde_json::from_value(body)
        .map_err(|e| IdentityError::Key(format!("unrecognised key document: {e}")))?;
    certs
        .into_iter()
        .map(|(kid, pem)| {
            DecodingKey::from_rsa_pem(pem.as_bytes())
                .map(|key| (kid, key))
                .map_err(|e| IdentityError::Key(format!("invalid certificate: {e}")))
        })
        .collect()
}

/// Map an Identity Toolkit error message such as `USER_NOT_FOUND` or
/// `INVALID_ID_TOKEN : detail` onto an [`IdentityError`].
fn map_provider_error(status: u16, message: String) -> IdentityError {
    let code = message
        .split([' ', ':'])
        .next()
        .unwrap_or_default();

    match code {
        "USER_NOT_FOUND" | "EMAIL_NOT_FOUND" => IdentityError::UserNotFound,
        "EMAIL_EXISTS" | "DUPLICATE_EMAIL" => IdentityError::EmailExists,
        "USER_DISABLED" => IdentityError::UserDisabled,
        "TOKEN_EXPIRED" => IdentityError::Expired,
        "INVALID_ID_TOKEN" | "INVALID_SESSION_COOKIE_DURATION" => {
            IdentityError::InvalidToken(message)
        }
        _ => IdentityError::Provider { status, message },
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    async fn verify_session_cookie(
        &self,
        cookie: &str,
        check_revoked: bool,
    ) -> Result<DecodedSession, IdentityError> {
        let header = decode_header(cookie).map_err(|e| map_jwt_error(&e))?;
        if header.alg != Algorithm::RS256 {
            return Err(IdentityError::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::InvalidToken("missing key id".to_string()))?;

        let key = self.session_keys.key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.config.project_id]);
        validation.set_issuer(&[self.session_issuer()]);

        let session = decode::<SessionTokenClaims>(cookie, &key, &validation)
            .map_err(|e| map_jwt_error(&e))?
            .claims
            .into_session()?;

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

    #[instrument(skip(self, id_token))]
    async fn create_session_cookie(
        &self,
        id_token: &str,
        valid_for: Duration,
    ) -> Result<String, IdentityError> {
        let url = format!(
            "{IDENTITY_TOOLKIT}/projects/{}:createSessionCookie",
            self.config.project_id
        );
        let body = json!({
            "idToken": id_token,
            "validDuration": valid_for.as_secs().to_string(),
        });
        let response: SessionCookieResponse = self.call(&url, &body).await?;
        Ok(response.session_cookie)
    }

    async fn get_user(&self, uid: &Uid) -> Result<UserRecord, IdentityError> {
        self.lookup(json!({ "localId": [uid.as_str()] })).await
    }

    async fn get_user_by_email(&self, email: &Email) -> Result<UserRecord, IdentityError> {
        self.lookup(json!({ "email": [email.as_str()] })).await
    }

    #[instrument(skip(self), fields(email = %email))]
    async fn create_user(&self, email: &Email) -> Result<UserRecord, IdentityError> {
        let created: SignUpResponse = self
            .call(&self.project_url("accounts"), &json!({ "email": email.as_str() }))
            .await?;
        tracing::info!(uid = %created.local_id, "Created account");
        self.get_user(&Uid::new(created.local_id)).await
    }

    #[instrument(skip(self, claims), fields(uid = %uid))]
    async fn set_custom_claims(
        &self,
        uid: &Uid,
        claims: &CustomClaims,
    ) -> Result<(), IdentityError> {
        claims.validate()?;
        let body = json!({
            "localId": uid.as_str(),
            "customAttributes": claims.to_json_string(),
        });
        let _: Value = self.call(&self.project_url("accounts:update"), &body).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(uid = %uid))]
    async fn revoke_refresh_tokens(&self, uid: &Uid) -> Result<(), IdentityError> {
        let body = json!({
            "localId": uid.as_str(),
            "validSince": Utc::now().timestamp().to_string(),
        });
        let _: Value = self.call(&self.project_url("accounts:update"), &body).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(email = %email))]
    async fn send_password_reset(&self, email: &Email) -> Result<(), IdentityError> {
        let body = json!({
            "requestType": "PASSWORD_RESET",
            "email": email.as_str(),
        });
        let _: Value = self
            .call(&self.project_url("accounts:sendOobCode"), &body)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_map_provider_error_codes() {
        assert!(matches!(
            map_provider_error(400, "USER_NOT_FOUND".into()),
            IdentityError::UserNotFound
        ));
        assert!(matches!(
            map_provider_error(400, "EMAIL_EXISTS".into()),
            IdentityError::EmailExists
        ));
        assert!(matches!(
            map_provider_error(400, "INVALID_ID_TOKEN : stale".into()),
            IdentityError::InvalidToken(_)
        ));
        assert!(matches!(
            map_provider_error(503, "BACKEND_ERROR".into()),
            IdentityError::Provider { status: 503, .. }
        ));
    }

    #[test]
    fn test_account_info_parses_claims_and_valid_since() {
        let info: AccountInfo = serde_json::from_value(json!({
            "localId": "abc",
            "email": "owner@example.com",
            "customAttributes": "{\"admin\":true,\"tier\":\"gold\"}",
            "validSince": "1700000000"
        }))
        .unwrap();

        let record = UserRecord::try_from(info).unwrap();
        assert_eq!(record.uid.as_str(), "abc");
        assert!(record.custom_claims.is_admin());
        assert_eq!(record.tokens_valid_after, Some(1_700_000_000));
        assert!(!record.disabled);
    }

    #[test]
    fn test_account_info_without_claims() {
        let info: AccountInfo = serde_json::from_value(json!({ "localId": "abc" })).unwrap();
        let record = UserRecord::try_from(info).unwrap();
        assert!(record.custom_claims.is_empty());
        assert_eq!(record.tokens_valid_after, None);
    }

    #[test]
    fn test_access_token_freshness_margin() {
        let token = AccessToken {
            token: SecretString::from("t"),
            expires_at: 1_000,
        };
        assert!(token.is_fresh(900));
        assert!(!token.is_fresh(950));
    }

    async fn seeded_store(kids: &[&str]) -> SessionKeyStore {
        let store = SessionKeyStore::new("http://127.0.0.1:1/keys".into(), reqwest::Client::new());
        seed(&store, kids).await;
        store
    }

    async fn seed(store: &SessionKeyStore, kids: &[&str]) {
        let keys: SessionKeys = kids
            .iter()
            .map(|kid| ((*kid).to_string(), DecodingKey::from_secret(b"k")))
            .collect();
        store.cache.insert(store.url.clone(), Arc::new(keys)).await;
    }

    #[tokio::test]
    async fn test_cached_key_served_without_fetch() {
        let store = seeded_store(&["current"]).await;
        assert!(store.key("current").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_key_id_reloads_once_per_interval() {
        let store = seeded_store(&["current"]).await;

        // The reload reaches the (unreachable) key endpoint.
        assert!(matches!(
            store.key("rotated").await,
            Err(IdentityError::Key(_))
        ));

        // A second miss inside the interval is answered from the cache.
        seed(&store, &["current"]).await;
        assert!(matches!(
            store.key("rotated").await,
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_forced_refresh_interval() {
        let store = seeded_store(&[]).await;
        let start = Instant::now();

        assert!(store.claim_forced_refresh(start).await);
        assert!(!store.claim_forced_refresh(start + Duration::from_secs(30)).await);
        assert!(
            store
                .claim_forced_refresh(start + KEYS_FORCED_REFRESH_INTERVAL)
                .await
        );
    }

    #[test]
    fn test_parse_session_keys_rejects_garbage() {
        assert!(parse_session_keys(json!({"kid": "not a pem"})).is_err());
        assert!(parse_session_keys(json!([1, 2])).is_err());
        assert!(parse_session_keys(json!({})).unwrap().is_empty());
    }
}
