//! Admin claim mutation.
//!
//! The `admin` custom claim on the identity provider is the only source of
//! authorization. Every change made here also refreshes the `users.role`
//! mirror and appends to `admin_audit_log`, both best effort.

use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use emporium_core::{Email, EmailError, Uid, UserRole};

use crate::db::{AuditAction, AuditRepository, UserRepository};
use crate::identity::{IdentityError, IdentityProvider, UserRecord};

/// Errors from admin claim mutation.
#[derive(Debug, Error)]
pub enum AdminClaimError {
    /// Neither or both of uid and email were given, or the email is malformed.
    #[error("{0}")]
    InvalidTarget(String),

    #[error("user not found")]
    NotFound,

    /// Accounts can only be created for an email target.
    #[error("cannot create an account without an email")]
    CreateRequiresEmail,

    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),
}

impl From<EmailError> for AdminClaimError {
    fn from(err: EmailError) -> Self {
        Self::InvalidTarget(err.to_string())
    }
}

/// Who a claim change applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminTarget {
    Uid(Uid),
    Email(Email),
}

impl AdminTarget {
    /// Build a target from optional request fields. Exactly one must be set.
    ///
    /// # Errors
    ///
    /// Returns `AdminClaimError::InvalidTarget` if zero or two fields are set,
    /// or the email does not parse.
    pub fn from_parts(uid: Option<&str>, email: Option<&str>) -> Result<Self, AdminClaimError> {
        let uid = uid.map(str::trim).filter(|s| !s.is_empty());
        let email = email.map(str::trim).filter(|s| !s.is_empty());
        match (uid, email) {
            (Some(uid), None) => Ok(Self::Uid(Uid::new(uid))),
            (None, Some(email)) => Ok(Self::Email(Email::parse(email)?)),
            (None, None) => Err(AdminClaimError::InvalidTarget(
                "uid or email is required".to_string(),
            )),
            (Some(_), Some(_)) => Err(AdminClaimError::InvalidTarget(
                "provide uid or email, not both".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for AdminTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uid(uid) => write!(f, "uid:{uid}"),
            Self::Email(email) => write!(f, "email:{email}"),
        }
    }
}

/// What to do when a grant targets an account that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingAccount {
    Create,
    Fail,
}

/// Outcome of a grant or revoke.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimChange {
    pub uid: Uid,
    pub email: Option<String>,
    /// Value of the admin claim after the call.
    pub admin: bool,
    /// `false` when the claim already had the requested value.
    pub changed: bool,
}

/// Grants and revokes the admin claim.
pub struct AdminClaimsService<'a> {
    identity: &'a dyn IdentityProvider,
    pool: Option<&'a PgPool>,
}

impl<'a> AdminClaimsService<'a> {
    #[must_use]
    pub const fn new(identity: &'a dyn IdentityProvider) -> Self {
        Self {
            identity,
            pool: None,
        }
    }

    /// Mirror changes into `users` and `admin_audit_log` on `pool`.
    #[must_use]
    pub const fn with_mirror(mut self, pool: &'a PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set `admin: true` on the target, keeping its other claims.
    ///
    /// # Errors
    ///
    /// - `AdminClaimError::NotFound` if the account is missing and `on_missing`
    ///   is `Fail`
    /// - `AdminClaimError::CreateRequiresEmail` if the account is missing, a
    ///   uid was given and `on_missing` is `Create`
    /// - `AdminClaimError::Identity` if the provider fails
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn grant_admin(
        &self,
        target: &AdminTarget,
        on_missing: MissingAccount,
        actor: Option<&Uid>,
    ) -> Result<ClaimChange, AdminClaimError> {
        let user = match self.lookup(target).await {
            Ok(user) => user,
            Err(AdminClaimError::NotFound) if on_missing == MissingAccount::Create => {
                let AdminTarget::Email(email) = target else {
                    return Err(AdminClaimError::CreateRequiresEmail);
                };
                let user = self.identity.create_user(email).await?;
                tracing::info!(uid = %user.uid, "Created account for admin grant");
                user
            }
            Err(e) => return Err(e),
        };

        self.apply(user, true, actor).await
    }

    /// Remove the admin claim from the target, keeping its other claims.
    ///
    /// # Errors
    ///
    /// Returns `AdminClaimError::NotFound` if the account does not exist,
    /// `AdminClaimError::Identity` if the provider fails.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn revoke_admin(
        &self,
        target: &AdminTarget,
        actor: Option<&Uid>,
    ) -> Result<ClaimChange, AdminClaimError> {
        let user = self.lookup(target).await?;
        self.apply(user, false, actor).await
    }

    /// Resolve a target to its live account.
    ///
    /// # Errors
    ///
    /// Returns `AdminClaimError::NotFound` if the account does not exist,
    /// `AdminClaimError::Identity` if the provider fails.
    pub async fn lookup(&self, target: &AdminTarget) -> Result<UserRecord, AdminClaimError> {
        let result = match target {
            AdminTarget::Uid(uid) => self.identity.get_user(uid).await,
            AdminTarget::Email(email) => self.identity.get_user_by_email(email).await,
        };
        result.map_err(|e| match e {
            IdentityError::UserNotFound => AdminClaimError::NotFound,
            other => AdminClaimError::Identity(other),
        })
    }

    async fn apply(
        &self,
        user: UserRecord,
        admin: bool,
        actor: Option<&Uid>,
    ) -> Result<ClaimChange, AdminClaimError> {
        if user.custom_claims.is_admin() == admin {
            tracing::info!(uid = %user.uid, admin, "Admin claim already set; nothing to do");
            return Ok(ClaimChange {
                uid: user.uid,
                email: user.email,
                admin,
                changed: false,
            });
        }

        let claims = user.custom_claims.with_admin(admin);
        self.identity.set_custom_claims(&user.uid, &claims).await?;
        tracing::info!(
            uid = %user.uid,
            admin,
            actor = actor.map(Uid::as_str),
            "Admin claim updated"
        );

        self.mirror(&user, admin, actor).await;

        Ok(ClaimChange {
            uid: user.uid,
            email: user.email,
            admin,
            changed: true,
        })
    }

    async fn mirror(&self, user: &UserRecord, admin: bool, actor: Option<&Uid>) {
        let Some(pool) = self.pool else {
            return;
        };

        if let Err(e) = UserRepository::new(pool)
            .upsert(
                &user.uid,
                user.email.as_deref(),
                user.display_name.as_deref(),
                UserRole::from_admin(admin),
            )
            .await
        {
            tracing::warn!(uid = %user.uid, error = %e, "Failed to mirror role; claim is authoritative");
        }

        let action = if admin {
            AuditAction::GrantAdmin
        } else {
            AuditAction::RevokeAdmin
        };
        if let Err(e) = AuditRepository::new(pool)
            .record(actor, &user.uid, action)
            .await
        {
            tracing::warn!(uid = %user.uid, error = %e, "Failed to record admin audit entry");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;

    use emporium_core::CustomClaims;

    use super::*;
    use crate::identity::LocalIdentityProvider;

    fn provider() -> LocalIdentityProvider {
        LocalIdentityProvider::new(&SecretString::from("m3#Ka8!Vz1@Pq6$Rt4%Yw9^Bn2&Jd7*X"))
    }

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    #[test]
    fn test_target_from_parts() {
        assert_eq!(
            AdminTarget::from_parts(Some("abc"), None).unwrap(),
            AdminTarget::Uid(Uid::new("abc"))
        );
        assert_eq!(
            AdminTarget::from_parts(None, Some(" Owner@Example.com ")).unwrap(),
            AdminTarget::Email(email("owner@example.com"))
        );
        assert!(matches!(
            AdminTarget::from_parts(None, None),
            Err(AdminClaimError::InvalidTarget(_))
        ));
        assert!(matches!(
            AdminTarget::from_parts(Some("abc"), Some("a@example.com")),
            Err(AdminClaimError::InvalidTarget(_))
        ));
        assert!(matches!(
            AdminTarget::from_parts(None, Some("not-an-email")),
            Err(AdminClaimError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_grant_is_idempotent() {
        let provider = provider();
        provider.create_user(&email("owner@example.com")).await.unwrap();
        let service = AdminClaimsService::new(&provider);
        let target = AdminTarget::Email(email("owner@example.com"));

        let first = service
            .grant_admin(&target, MissingAccount::Fail, None)
            .await
            .unwrap();
        assert!(first.admin);
        assert!(first.changed);

        let second = service
            .grant_admin(&target, MissingAccount::Fail, None)
            .await
            .unwrap();
        assert!(second.admin);
        assert!(!second.changed);
        assert_eq!(first.uid, second.uid);
    }

    #[tokio::test]
    async fn test_grant_merges_existing_claims() {
        let provider = provider();
        let user = provider.create_user(&email("owner@example.com")).await.unwrap();
        let existing = CustomClaims::from_value(json!({"tier": "gold"})).unwrap();
        provider.set_custom_claims(&user.uid, &existing).await.unwrap();

        let service = AdminClaimsService::new(&provider);
        service
            .grant_admin(&AdminTarget::Uid(user.uid.clone()), MissingAccount::Fail, None)
            .await
            .unwrap();

        let claims = provider.get_user(&user.uid).await.unwrap().custom_claims;
        assert!(claims.is_admin());
        assert_eq!(claims.get("tier"), Some(&json!("gold")));

        service
            .revoke_admin(&AdminTarget::Uid(user.uid.clone()), None)
            .await
            .unwrap();
        let claims = provider.get_user(&user.uid).await.unwrap().custom_claims;
        assert!(!claims.is_admin());
        assert_eq!(claims.get("tier"), Some(&json!("gold")));
    }

    #[tokio::test]
    async fn test_missing_account_handling() {
        let provider = provider();
        let service = AdminClaimsService::new(&provider);

        let target = AdminTarget::Email(email("new@example.com"));
        assert!(matches!(
            service.grant_admin(&target, MissingAccount::Fail, None).await,
            Err(AdminClaimError::NotFound)
        ));

        let created = service
            .grant_admin(&target, MissingAccount::Create, None)
            .await
            .unwrap();
        assert!(created.admin);
        assert_eq!(created.email.as_deref(), Some("new@example.com"));

        assert!(matches!(
            service
                .grant_admin(
                    &AdminTarget::Uid(Uid::new("missing")),
                    MissingAccount::Create,
                    None
                )
                .await,
            Err(AdminClaimError::CreateRequiresEmail)
        ));
    }

    #[tokio::test]
    async fn test_revoke_non_admin_is_noop() {
        let provider = provider();
        let user = provider.create_user(&email("a@example.com")).await.unwrap();
        let service = AdminClaimsService::new(&provider);

        let change = service
            .revoke_admin(&AdminTarget::Uid(user.uid), None)
            .await
            .unwrap();
        assert!(!change.admin);
        assert!(!change.changed);
    }
}
