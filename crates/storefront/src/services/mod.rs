//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `auth` - Session verification and sign-in
//! - `claims` - Admin claim grant/revoke with mirror and audit
//! - `orders` - Checkout with compensating actions
//! - `payments` - Stripe payment intents and webhook signatures

pub mod auth;
pub mod claims;
pub mod orders;
pub mod payments;

pub use auth::{AuthError, AuthService};
pub use claims::{AdminClaimError, AdminClaimsService, AdminTarget, ClaimChange, MissingAccount};
pub use orders::{Checkout, CreateOrderRequest, OrderError, OrderLedger, OrderService, PlacedOrder};
pub use payments::{PaymentError, PaymentGateway, StripeClient};
