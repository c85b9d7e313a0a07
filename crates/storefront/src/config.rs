//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront; `https` enables `Secure` cookies
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `CART_ANONYMOUS_COOKIE` - Anonymous cart cookie name (default: `cw_cart`)
//! - `CART_AUTH_COOKIE` - Session-token cookie name (default: `cw_session`)
//! - `CART_ANONYMOUS_COOKIE_DAYS` - Anonymous cookie lifetime, 1 to 3650 (default: 30)
//! - `CART_CONFLICT_ATTEMPTS` - Attempts per cart operation on write conflicts (default: 3, min: 2)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.1)

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::cart::identity::{
    ANONYMOUS_COOKIE_DAYS, ANONYMOUS_COOKIE_NAME, AUTH_COOKIE_NAME, CookieSettings,
};
use crate::cart::{DEFAULT_CONFLICT_ATTEMPTS, MIN_CONFLICT_ATTEMPTS};

/// Longest accepted anonymous cookie lifetime, ten years.
pub const MAX_ANONYMOUS_COOKIE_DAYS: i64 = 3650;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: Url,
    /// Cart cookies and retry policy
    pub cart: CartConfig,
    /// Error tracking
    pub sentry: SentryConfig,
}

/// Cart engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartConfig {
    /// Cookie carrying the anonymous session id
    pub anonymous_cookie: String,
    /// Cookie carrying the session token
    pub auth_cookie: String,
    /// Lifetime of a newly minted anonymous cookie, in days
    pub anonymous_cookie_days: i64,
    /// Attempts per operation when a write conflict occurs
    pub conflict_attempts: u32,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            anonymous_cookie: ANONYMOUS_COOKIE_NAME.to_owned(),
            auth_cookie: AUTH_COOKIE_NAME.to_owned(),
            anonymous_cookie_days: ANONYMOUS_COOKIE_DAYS,
            conflict_attempts: DEFAULT_CONFLICT_ATTEMPTS,
        }
    }
}

/// Sentry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SentryConfig {
    /// Sentry DSN; tracking is disabled when unset
    pub dsn: Option<String>,
    /// Environment reported with events
    pub environment: Option<String>,
    /// Fraction of errors sent
    pub sample_rate: f32,
    /// Fraction of transactions sent
    pub traces_sample_rate: f32,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.1,
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let database_url = env.database_url("STOREFRONT_DATABASE_URL")?;
        let host = env.parsed_or("STOREFRONT_HOST", IpAddr::from([127, 0, 0, 1]))?;
        let port = env.parsed_or("STOREFRONT_PORT", 3000_u16)?;
        let base_url = env.required("STOREFRONT_BASE_URL").and_then(|raw| {
            Url::parse(&raw).map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string())
            })
        })?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            cart: CartConfig::from_env(&env)?,
            sentry: SentryConfig::from_env(&env)?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether the storefront is served over HTTPS.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.base_url.scheme() == "https"
    }

    /// Cookie settings for the identity resolver.
    #[must_use]
    pub fn cookie_settings(&self) -> CookieSettings {
        CookieSettings {
            anonymous_name: self.cart.anonymous_cookie.clone(),
            auth_name: self.cart.auth_cookie.clone(),
            anonymous_max_age_days: self.cart.anonymous_cookie_days,
            secure: self.is_https(),
        }
    }
}

impl CartConfig {
    fn from_env(env: &Env<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let anonymous_cookie = env.or_default("CART_ANONYMOUS_COOKIE", &defaults.anonymous_cookie);
        let auth_cookie = env.or_default("CART_AUTH_COOKIE", &defaults.auth_cookie);
        if anonymous_cookie == auth_cookie {
            return Err(ConfigError::InvalidEnvVar(
                "CART_AUTH_COOKIE".to_string(),
                "must differ from CART_ANONYMOUS_COOKIE".to_string(),
            ));
        }

        let anonymous_cookie_days =
            env.parsed_or("CART_ANONYMOUS_COOKIE_DAYS", defaults.anonymous_cookie_days)?;
        if !(1..=MAX_ANONYMOUS_COOKIE_DAYS).contains(&anonymous_cookie_days) {
            return Err(ConfigError::InvalidEnvVar(
                "CART_ANONYMOUS_COOKIE_DAYS".to_string(),
                format!("must be between 1 and {MAX_ANONYMOUS_COOKIE_DAYS}"),
            ));
        }

        let conflict_attempts =
            env.parsed_or("CART_CONFLICT_ATTEMPTS", defaults.conflict_attempts)?;
        if conflict_attempts < MIN_CONFLICT_ATTEMPTS {
            return Err(ConfigError::InvalidEnvVar(
                "CART_CONFLICT_ATTEMPTS".to_string(),
                format!("must be at least {MIN_CONFLICT_ATTEMPTS}"),
            ));
        }

        Ok(Self {
            anonymous_cookie,
            auth_cookie,
            anonymous_cookie_days,
            conflict_attempts,
        })
    }
}

impl SentryConfig {
    fn from_env(env: &Env<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            dsn: env.optional("SENTRY_DSN"),
            environment: env.optional("SENTRY_ENVIRONMENT"),
            sample_rate: env.rate_or("SENTRY_SAMPLE_RATE", defaults.sample_rate)?,
            traces_sample_rate: env
                .rate_or("SENTRY_TRACES_SAMPLE_RATE", defaults.traces_sample_rate)?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Variable source used while loading.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    /// Get an optional variable; empty values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    /// Get a required variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a variable, falling back to `default` when unset.
    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }

    /// Parse a sample rate in `0.0..=1.0`.
    fn rate_or(&self, key: &str, default: f32) -> Result<f32, ConfigError> {
        let rate = self.parsed_or(key, default)?;
        if (0.0..=1.0).contains(&rate) {
            Ok(rate)
        } else {
            Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("must be between 0.0 and 1.0 (got {rate})"),
            ))
        }
    }

    /// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
    fn database_url(&self, primary_key: &str) -> Result<SecretString, ConfigError> {
        self.optional(primary_key)
            .or_else(|| self.optional("DATABASE_URL"))
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar(primary_key.to_string()))
    }
}
