//! Emporium Core - Shared types library.
//!
//! This crate provides the domain types used across all Emporium components:
//! - `storefront` - Public storefront API, admin API and route guard
//! - `cli` - Migrations and admin-claim bootstrap
//!
//! # Architecture
//!
//! The core crate contains only types and validation - no I/O, no database
//! access, no HTTP clients. The optional `postgres` feature adds `sqlx`
//! encodings so the storefront can bind these types directly.
//!
//! # Modules
//!
//! - [`types`] - Identifiers, emails, prices, statuses and custom claims

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
