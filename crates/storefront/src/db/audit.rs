//! Audit trail of admin claim changes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use emporium_core::Uid;

use super::RepositoryError;

/// What happened to the target account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    GrantAdmin,
    RevokeAdmin,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GrantAdmin => "grant_admin",
            Self::RevokeAdmin => "revoke_admin",
        }
    }
}

/// One audit log row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    /// `None` when the change came from the CLI.
    pub actor_uid: Option<String>,
    pub target_uid: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only repository for `admin_audit_log`.
pub struct AuditRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> AuditRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn record(
        &self,
        actor: Option<&Uid>,
        target: &Uid,
        action: AuditAction,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO admin_audit_log (actor_uid, target_uid, action)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(actor.map(Uid::as_str))
        .bind(target.as_str())
        .bind(action.as_str())
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Most recent entries for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_for_target(
        &self,
        target: &Uid,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query_as::<_, AuditEntry>(
            r"
            SELECT id, actor_uid, target_uid, action, created_at
            FROM admin_audit_log
            WHERE target_uid = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            ",
        )
        .bind(target.as_str())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_match_check_constraint() {
        assert_eq!(AuditAction::GrantAdmin.as_str(), "grant_admin");
        assert_eq!(AuditAction::RevokeAdmin.as_str(), "revoke_admin");
    }
}
