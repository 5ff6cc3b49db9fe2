//! Domain models for the storefront.
//!
//! These are validated domain objects, separate from the database row types
//! in [`crate::db`].

pub mod analytics;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use analytics::{AnalyticsSummary, TopProduct};
pub use order::{Order, OrderItem, ShippingAddress};
pub use product::Product;
pub use session::{CurrentUser, VerifiedAdmin};
pub use user::UserProfile;
