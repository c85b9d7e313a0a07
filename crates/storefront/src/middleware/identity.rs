//! Cart identity extractor.
//!
//! Runs the identity resolver for a request. Handlers must attach
//! [`CartIdentity::set_cookie`] to their response so a freshly minted
//! anonymous id reaches the browser.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{HeaderName, HeaderValue, request::Parts},
};
use tracing::Span;

use crate::cart::identity::{Identity, ResolvedIdentity};
use crate::error::set_sentry_user;
use crate::state::AppState;

/// The resolved identity of the current request.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(identity: CartIdentity) -> impl IntoResponse {
///     (AppendHeaders(identity.set_cookie()), "hello")
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CartIdentity(pub ResolvedIdentity);

impl CartIdentity {
    /// Who the request acts for.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.0.identity
    }

    /// `Set-Cookie` header for a newly minted anonymous id.
    #[must_use]
    pub fn set_cookie(&self) -> Option<(HeaderName, HeaderValue)> {
        self.0.set_cookie_header()
    }
}

impl FromRequestParts<AppState> for CartIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let resolved = state.identity().resolve(&parts.headers).await;

        if let Some(user) = resolved.identity.user {
            Span::current().record("user_id", user.as_i32());
            set_sentry_user(&user);
        }

        Ok(Self(resolved))
    }
}
