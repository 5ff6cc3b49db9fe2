//! Identities resolved from a verified session cookie.

use serde::Serialize;

use emporium_core::Uid;

/// An account whose session verified and whose live claims grant admin.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedAdmin {
    pub uid: Uid,
    pub email: Option<String>,
}

/// Any account with a verified session.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub uid: Uid,
    pub email: Option<String>,
    /// Live value of the admin claim at verification time.
    pub is_admin: bool,
}
