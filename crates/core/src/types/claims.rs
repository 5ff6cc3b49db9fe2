//! Custom claims attached to identity provider accounts.
//!
//! The `admin` claim is the single source of truth for admin authorization.
//! It only grants access when it is the JSON boolean `true`; the strings
//! `"true"` or `"yes"` and the number `1` do not count.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the claim that marks an account as an administrator.
pub const ADMIN_CLAIM: &str = "admin";

/// Claim names reserved by the token format. Custom claims may not shadow them.
const RESERVED_CLAIMS: &[&str] = &[
    "acr",
    "amr",
    "at_hash",
    "aud",
    "auth_time",
    "azp",
    "c_hash",
    "cnf",
    "email",
    "email_verified",
    "exp",
    "firebase",
    "iat",
    "iss",
    "jti",
    "name",
    "nbf",
    "nonce",
    "picture",
    "sub",
    "user_id",
];

/// Errors raised when building a custom claims payload.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CustomClaimsError {
    #[error("custom claims payload must be at most {max} bytes, got {actual}")]
    TooLarge { max: usize, actual: usize },

    #[error("claim name `{0}` is reserved")]
    Reserved(String),

    #[error("custom claims must be a JSON object")]
    NotAnObject,
}

/// The developer-defined claims on an account.
///
/// Stored as a JSON object so claims written by other tools survive a
/// round trip through this system untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomClaims(Map<String, Value>);

impl CustomClaims {
    /// Maximum serialized size of a claims payload.
    pub const MAX_BYTES: usize = 1000;

    /// An empty claims object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build validated claims from a JSON value.
    ///
    /// `null` is treated as an empty object, matching how providers report
    /// accounts that never had claims set.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object, uses a reserved claim
    /// name, or exceeds [`Self::MAX_BYTES`] once serialized.
    pub fn from_value(value: Value) -> Result<Self, CustomClaimsError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => {
                let claims = Self(map);
                claims.validate()?;
                Ok(claims)
            }
            _ => Err(CustomClaimsError::NotAnObject),
        }
    }

    /// Parse claims from the JSON string form providers exchange.
    ///
    /// An empty string yields empty claims.
    ///
    /// # Errors
    ///
    /// Returns [`CustomClaimsError::NotAnObject`] for malformed JSON, or any
    /// error from [`Self::from_value`].
    pub fn from_json_str(raw: &str) -> Result<Self, CustomClaimsError> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: Value =
            serde_json::from_str(raw).map_err(|_| CustomClaimsError::NotAnObject)?;
        Self::from_value(value)
    }

    /// Check the reserved-name and size limits.
    ///
    /// # Errors
    ///
    /// Returns the first violated limit.
    pub fn validate(&self) -> Result<(), CustomClaimsError> {
        if let Some(name) = self.0.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str())) {
            return Err(CustomClaimsError::Reserved(name.clone()));
        }
        let actual = self.to_json_string().len();
        if actual > Self::MAX_BYTES {
            return Err(CustomClaimsError::TooLarge {
                max: Self::MAX_BYTES,
                actual,
            });
        }
        Ok(())
    }

    /// Whether the account holds the admin claim.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self.0.get(ADMIN_CLAIM), Some(Value::Bool(true)))
    }

    /// A copy of these claims with the admin claim granted or removed.
    ///
    /// Other claims are preserved. Revoking removes the key entirely rather
    /// than writing `false`.
    #[must_use]
    pub fn with_admin(&self, admin: bool) -> Self {
        let mut map = self.0.clone();
        if admin {
            map.insert(ADMIN_CLAIM.to_owned(), Value::Bool(true));
        } else {
            map.remove(ADMIN_CLAIM);
        }
        Self(map)
    }

    /// Look up a single claim.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to a compact JSON object string.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Borrow the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Remove reserved claim names from a map of token claims.
    ///
    /// Used when reading custom claims back out of a decoded token, where the
    /// standard claims share the same object.
    #[must_use]
    pub fn from_token_claims(mut map: Map<String, Value>) -> Self {
        map.retain(|k, _| !RESERVED_CLAIMS.contains(&k.as_str()));
        Self(map)
    }
}
