//! Admin claim management commands.
//!
//! This is the bootstrap path: the first admin can only be created here,
//! since the HTTP endpoints already require an admin session.
//!
//! # Usage
//!
//! ```bash
//! emporium admin grant -e owner@example.com --create
//! emporium admin revoke -u 3xYzAbCdEf
//! emporium admin show -e owner@example.com
//! ```
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` (or `DATABASE_URL`) - mirror and audit log
//! - `IDENTITY_PROVIDER` and the provider's credentials (see the server's
//!   configuration); the in-memory `local` provider is rejected

use std::sync::Arc;

use emporium_storefront::config::{ConfigError, IdentityConfig, database_url_from_env};
use emporium_storefront::db::{AuditRepository, UserRepository, create_pool};
use emporium_storefront::identity::{self, IdentityError, IdentityProvider};
use emporium_storefront::services::{
    AdminClaimError, AdminClaimsService, AdminTarget, ClaimChange, MissingAccount,
};
use sqlx::PgPool;
use thiserror::Error;

const AUDIT_ENTRIES_SHOWN: i64 = 10;

/// Errors that can occur during admin operations.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The local provider keeps accounts in the server's memory, out of reach.
    #[error("IDENTITY_PROVIDER=local keeps accounts in server memory; the CLI needs a hosted provider")]
    LocalProvider,

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    Claims(#[from] AdminClaimError),
}

async fn connect() -> Result<(Arc<dyn IdentityProvider>, PgPool), AdminError> {
    let identity_config = IdentityConfig::from_env()?;
    if matches!(identity_config, IdentityConfig::Local { .. }) {
        return Err(AdminError::LocalProvider);
    }
    let provider = identity::from_config(&identity_config)?;

    let database_url = database_url_from_env()?;
    tracing::info!("Connecting to storefront database...");
    let pool = create_pool(&database_url).await?;

    Ok((provider, pool))
}

fn report(change: &ClaimChange) {
    let who = change.email.as_deref().unwrap_or_else(|| change.uid.as_str());
    if change.changed {
        tracing::info!("admin={} for {} (uid {})", change.admin, who, change.uid);
    } else {
        tracing::info!(
            "{} (uid {}) already has admin={}; nothing changed",
            who,
            change.uid,
            change.admin
        );
    }
}

/// Grant the admin claim.
///
/// With `create`, a missing email target is created first; the owner then
/// sets a password through the reset flow.
///
/// # Errors
///
/// Returns `AdminError` if configuration is incomplete, the target is invalid
/// or missing, or the provider fails.
pub async fn grant(uid: Option<&str>, email: Option<&str>, create: bool) -> Result<(), AdminError> {
    let target = AdminTarget::from_parts(uid, email)?;
    let (provider, pool) = connect().await?;

    let on_missing = if create {
        MissingAccount::Create
    } else {
        MissingAccount::Fail
    };
    let change = AdminClaimsService::new(provider.as_ref())
        .with_mirror(&pool)
        .grant_admin(&target, on_missing, None)
        .await?;

    report(&change);
    if change.changed {
        tracing::info!("Existing sessions keep working; the claim is read live on every check.");
    }
    Ok(())
}

/// Revoke the admin claim.
///
/// # Errors
///
/// Returns `AdminError` if configuration is incomplete, the target is invalid
/// or missing, or the provider fails.
pub async fn revoke(uid: Option<&str>, email: Option<&str>) -> Result<(), AdminError> {
    let target = AdminTarget::from_parts(uid, email)?;
    let (provider, pool) = connect().await?;

    let change = AdminClaimsService::new(provider.as_ref())
        .with_mirror(&pool)
        .revoke_admin(&target, None)
        .await?;

    report(&change);
    Ok(())
}

/// Show the live claim next to the mirrored role and the audit trail.
///
/// # Errors
///
/// Returns `AdminError` if configuration is incomplete, the target is invalid
/// or missing, or a lookup fails.
pub async fn show(uid: Option<&str>, email: Option<&str>) -> Result<(), AdminError> {
    let target = AdminTarget::from_parts(uid, email)?;
    let (provider, pool) = connect().await?;

    let user = AdminClaimsService::new(provider.as_ref())
        .lookup(&target)
        .await?;
    let mirrored = UserRepository::new(&pool).get(&user.uid).await;
    let audit = AuditRepository::new(&pool)
        .list_for_target(&user.uid, AUDIT_ENTRIES_SHOWN)
        .await;

    tracing::info!("uid:      {}", user.uid);
    tracing::info!("email:    {}", user.email.as_deref().unwrap_or("-"));
    tracing::info!("disabled: {}", user.disabled);
    tracing::info!("admin:    {} (identity provider)", user.custom_claims.is_admin());
    tracing::info!("claims:   {}", user.custom_claims.to_json_string());

    match mirrored {
        Ok(Some(profile)) => {
            tracing::info!("role:     {} (users mirror)", profile.role);
            if profile.role.is_admin() != user.custom_claims.is_admin() {
                tracing::warn!("Mirror is out of date; the identity provider claim is authoritative");
            }
        }
        Ok(None) => tracing::info!("role:     - (not mirrored yet)"),
        Err(e) => tracing::warn!("Could not read users mirror: {e}"),
    }

    match audit {
        Ok(entries) if entries.is_empty() => tracing::info!("audit:    no entries"),
        Ok(entries) => {
            tracing::info!("audit (newest first):");
            for entry in entries {
                tracing::info!(
                    "  {} {} by {}",
                    entry.created_at.to_rfc3339(),
                    entry.action,
                    entry.actor_uid.as_deref().unwrap_or("cli")
                );
            }
        }
        Err(e) => tracing::warn!("Could not read audit log: {e}"),
    }

    Ok(())
}
