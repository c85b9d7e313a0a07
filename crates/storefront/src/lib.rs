//! Cartwright storefront library.
//!
//! Shopping-cart identity and merge engine served over HTTP: anonymous
//! browsers get a cart keyed by a cookie, logged-in customers get a cart keyed
//! by their user id, and logging in folds the former into the latter.
//!
//! This crate provides the storefront functionality as a library,
//! allowing it to be tested and reused.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod config;
pub mod db;
pub mod error;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
