pub mod admin;
pub mod migrate;
