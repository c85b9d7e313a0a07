//! Domain models for the cart engine.

pub mod cart;

pub use cart::{Cart, LineItem, total_quantity};
