//! Core types for Emporium.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod claims;
pub mod email;
pub mod id;
pub mod price;
pub mod status;

pub use claims::{ADMIN_CLAIM, CustomClaims, CustomClaimsError};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{Currency, Price};
pub use status::*;
