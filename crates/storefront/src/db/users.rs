//! Mirrored user profiles.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use emporium_core::{Uid, UserRole};

use super::RepositoryError;
use crate::models::UserProfile;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    uid: String,
    email: Option<String>,
    display_name: Option<String>,
    role: UserRole,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            uid: Uid::new(row.uid),
            email: row.email,
            display_name: row.display_name,
            role: row.role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for the `users` mirror.
pub struct UserRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> UserRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a profile by uid.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, uid: &Uid) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            r"
            SELECT uid, email, display_name, role, created_at, updated_at
            FROM users
            WHERE uid = $1
            ",
        )
        .bind(uid.as_str())
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(UserProfile::from))
    }

    /// Insert or refresh a profile, mirroring the account's current role.
    ///
    /// A `None` email or display name keeps whatever is already stored.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn upsert(
        &self,
        uid: &Uid,
        email: Option<&str>,
        display_name: Option<&str>,
        role: UserRole,
    ) -> Result<UserProfile, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            r"
            INSERT INTO users (uid, email, display_name, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (uid) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, users.email),
                display_name = COALESCE(EXCLUDED.display_name, users.display_name),
                role = EXCLUDED.role,
                updated_at = now()
            RETURNING uid, email, display_name, role, created_at, updated_at
            ",
        )
        .bind(uid.as_str())
        .bind(email)
        .bind(display_name)
        .bind(role)
        .fetch_one(self.pool)
        .await?;

        Ok(row.into())
    }
}
