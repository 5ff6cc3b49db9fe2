//! Mirrored user profile.

use chrono::{DateTime, Utc};
use serde::Serialize;

use emporium_core::{Uid, UserRole};

/// Display copy of an identity provider account.
///
/// `role` follows the admin claim whenever the claim is changed through this
/// system, but it can drift if the claim is edited elsewhere. Never use it for
/// authorization.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: Uid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
