//! Database operations for storefront `PostgreSQL`.
//!
//! # Schema: `storefront`
//!
//! ## Tables
//!
//! - `product`, `product_variant` - Catalog rows read by the cart
//! - `customer_session` - Session tokens issued at login
//! - `cart` - One live cart per owner (anonymous session id or user id)
//! - `line_item` - Cart lines, unique per `(cart, product, variant key)`
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p cartwright-cli -- migrate
//! ```

pub mod carts;
pub mod catalog;
pub mod sessions;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::error::ErrorKind as DbErrorKind;
use sqlx::postgres::PgPoolOptions;

pub use carts::PgCartStore;
pub use catalog::PgCatalog;
pub use sessions::PgSessionValidator;

use crate::cart::CartError;

/// SQLSTATE for `serialization_failure`.
const SERIALIZATION_FAILURE: &str = "40001";

/// SQLSTATE for `deadlock_detected`.
const DEADLOCK_DETECTED: &str = "40P01";

/// SQLSTATE for `numeric_value_out_of_range` (a quantity sum overflowing `INT`).
const NUMERIC_OUT_OF_RANGE: &str = "22003";

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map a database error onto the cart error taxonomy.
#[must_use]
pub fn classify(err: &sqlx::Error) -> CartError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            if matches!(
                code.as_deref(),
                Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
            ) {
                return CartError::Conflict(db_err.message().to_owned());
            }
            if code.as_deref() == Some(NUMERIC_OUT_OF_RANGE) {
                return CartError::Validation(db_err.message().to_owned());
            }
            match db_err.kind() {
                DbErrorKind::UniqueViolation => CartError::Conflict(db_err.message().to_owned()),
                DbErrorKind::ForeignKeyViolation
                | DbErrorKind::CheckViolation
                | DbErrorKind::NotNullViolation => {
                    CartError::Validation(db_err.message().to_owned())
                }
                _ => CartError::Storage(db_err.message().to_owned()),
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => CartError::Transient(err.to_string()),
        _ => CartError::Storage(err.to_string()),
    }
}

impl From<sqlx::Error> for CartError {
    fn from(err: sqlx::Error) -> Self {
        classify(&err)
    }
}
