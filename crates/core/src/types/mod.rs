//! Core types for Cartwright.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod id;
pub mod line;
pub mod owner;

pub use id::*;
pub use line::{LineValueError, Quantity, VariantKey};
pub use owner::{AnonymousSessionId, CartOwner, SessionIdError};
