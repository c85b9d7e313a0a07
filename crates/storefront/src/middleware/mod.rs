//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (capture errors, one hub per request)
//! 2. `TraceLayer` (request span carrying `request_id`)
//! 3. Request ID (propagate or assign `x-request-id`)
//!
//! Cart identity is resolved per handler by the [`CartIdentity`] extractor.

pub mod identity;
pub mod request_id;

pub use identity::CartIdentity;
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
