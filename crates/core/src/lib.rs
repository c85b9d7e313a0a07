//! Cartwright Core - Shared cart identity types.
//!
//! This crate provides the types shared by every Cartwright component:
//! - `storefront` - Cart engine and its HTTP surface
//! - `cli` - Command-line tools for migrations and fixtures
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, cart owners, anonymous session ids, variant keys
//!   and quantities

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
