//! Session verification error types.

use thiserror::Error;

use crate::identity::IdentityError;

/// Errors that can occur while verifying a session or signing in.
///
/// The `Display` strings of the first three variants are returned to clients
/// verbatim.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No session cookie (or an empty one) was presented.
    #[error("No session provided")]
    NoSession,

    /// The session failed verification: expired, malformed, forged, revoked,
    /// disabled, or the account no longer exists.
    #[error("Invalid session")]
    InvalidSession,

    /// The session is valid but the account lacks the admin claim.
    #[error("Not authorized")]
    NotAuthorized,

    /// The ID token offered at sign-in was rejected.
    #[error("Invalid ID token")]
    InvalidIdToken,

    /// The identity provider could not be reached or failed.
    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),
}
