//! Identity Resolver: which browser and which customer a request comes from.
//!
//! Two independent answers are read from the request cookies:
//!
//! - the anonymous session id, minted on first contact and returned to the
//!   browser as a long-lived cookie (also for logged-in customers, so that a
//!   later logout continues under a stable anonymous identity);
//! - the authenticated user id, obtained by handing the session-token cookie
//!   to a [`SessionValidator`]. A missing, unknown or expired token, and a
//!   validator that cannot answer, all mean "not logged in" here.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use tower_sessions::cookie::{Cookie, SameSite, time::Duration};
use tracing::warn;

use cartwright_core::{AnonymousSessionId, CartOwner, UserId};

use super::error::Result;

/// Default anonymous cart cookie name.
pub const ANONYMOUS_COOKIE_NAME: &str = "cw_cart";

/// Default session-token cookie name.
pub const AUTH_COOKIE_NAME: &str = "cw_session";

/// Default anonymous cookie lifetime in days.
pub const ANONYMOUS_COOKIE_DAYS: i64 = 30;

/// Validates session tokens issued by the authentication service.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Returns the user the token belongs to, or `None` if the token is
    /// unknown or expired.
    async fn validate(&self, token: &str) -> Result<Option<UserId>>;
}

/// Cookie names and attributes used by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    /// Cookie carrying the anonymous session id.
    pub anonymous_name: String,
    /// Cookie carrying the session token.
    pub auth_name: String,
    /// Lifetime of a freshly minted anonymous cookie.
    pub anonymous_max_age_days: i64,
    /// Whether cookies are restricted to HTTPS.
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            anonymous_name: ANONYMOUS_COOKIE_NAME.to_owned(),
            auth_name: AUTH_COOKIE_NAME.to_owned(),
            anonymous_max_age_days: ANONYMOUS_COOKIE_DAYS,
            secure: false,
        }
    }
}

/// Who a request is acting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Browser-scoped id; always present.
    pub anonymous: AnonymousSessionId,
    /// Logged-in customer, if any.
    pub user: Option<UserId>,
}

impl Identity {
    /// Identity of a browser that is not logged in.
    #[must_use]
    pub const fn anonymous(anonymous: AnonymousSessionId) -> Self {
        Self {
            anonymous,
            user: None,
        }
    }

    /// Identity of a logged-in customer using the given browser.
    #[must_use]
    pub const fn authenticated(anonymous: AnonymousSessionId, user: UserId) -> Self {
        Self {
            anonymous,
            user: Some(user),
        }
    }

    /// The owner whose cart the request operates on. The user always wins.
    #[must_use]
    pub fn owner(&self) -> CartOwner {
        CartOwner::effective(&self.anonymous, self.user)
    }
}

/// Result of resolving a request.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    /// Cookie to send back when the anonymous id was minted by this request.
    pub minted_cookie: Option<Cookie<'static>>,
}

impl ResolvedIdentity {
    /// `Set-Cookie` header for the minted anonymous id, if any.
    #[must_use]
    pub fn set_cookie_header(&self) -> Option<(HeaderName, HeaderValue)> {
        let cookie = self.minted_cookie.as_ref()?;
        HeaderValue::from_str(&cookie.to_string())
            .ok()
            .map(|value| (header::SET_COOKIE, value))
    }
}

/// Resolves request cookies into an [`Identity`].
#[derive(Clone)]
pub struct IdentityResolver {
    validator: Arc<dyn SessionValidator>,
    cookies: CookieSettings,
}

impl IdentityResolver {
    /// Create a resolver backed by `validator`.
    #[must_use]
    pub fn new(validator: Arc<dyn SessionValidator>, cookies: CookieSettings) -> Self {
        Self { validator, cookies }
    }

    /// Cookie settings in effect.
    #[must_use]
    pub const fn cookies(&self) -> &CookieSettings {
        &self.cookies
    }

    /// Resolve the identity carried by `headers`.
    ///
    /// Never fails: an unusable anonymous cookie is replaced by a fresh one,
    /// and any problem with the session token means "not logged in".
    pub async fn resolve(&self, headers: &HeaderMap) -> ResolvedIdentity {
        let anonymous_raw = read_cookie(headers, &self.cookies.anonymous_name);
        let token = read_cookie(headers, &self.cookies.auth_name);

        let (anonymous, minted_cookie) =
            match anonymous_raw.and_then(|raw| AnonymousSessionId::parse(&raw).ok()) {
                Some(anonymous) => (anonymous, None),
                None => {
                    let anonymous = AnonymousSessionId::generate();
                    let cookie = self.anonymous_cookie(&anonymous);
                    (anonymous, Some(cookie))
                }
            };

        let user = match token.filter(|token| !token.is_empty()) {
            Some(token) => match self.validator.validate(&token).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(error = %e, "Session validation failed, treating request as anonymous");
                    None
                }
            },
            None => None,
        };

        ResolvedIdentity {
            identity: Identity { anonymous, user },
            minted_cookie,
        }
    }

    fn anonymous_cookie(&self, anonymous: &AnonymousSessionId) -> Cookie<'static> {
        Cookie::build((
            self.cookies.anonymous_name.clone(),
            anonymous.as_str().to_owned(),
        ))
        .path("/")
        .http_only(true)
        .secure(self.cookies.secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(self.cookies.anonymous_max_age_days))
        .build()
    }
}

/// First value of the named cookie across all `Cookie` headers.
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(std::result::Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_owned())
}
