//! Cart ownership: who a cart belongs to.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::id::UserId;

/// Errors that can occur when parsing an [`AnonymousSessionId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    /// The input string is empty.
    #[error("anonymous session id cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("anonymous session id must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains a character outside `[A-Za-z0-9_-]`.
    #[error("anonymous session id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Browser-scoped opaque identifier used to find a cart before login.
///
/// Minted once per browser and carried in a cookie. The value is treated as
/// an opaque lookup key; its only structure is a conservative character set
/// so that it is always safe to echo back in a `Set-Cookie` header.
///
/// ## Constraints
///
/// - Length: 1-64 characters
/// - Characters: ASCII letters, digits, `-` and `_`
///
/// ## Examples
///
/// ```
/// use cartwright_core::AnonymousSessionId;
///
/// let minted = AnonymousSessionId::generate();
/// assert_eq!(minted.as_str().len(), 32);
///
/// assert!(AnonymousSessionId::parse("3f9c0a7e52d14b6f").is_ok());
/// assert!(AnonymousSessionId::parse("").is_err());
/// assert!(AnonymousSessionId::parse("a;b").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct AnonymousSessionId(String);

impl AnonymousSessionId {
    /// Maximum accepted length of a session id.
    pub const MAX_LENGTH: usize = 64;

    /// Mint a fresh, random session id (UUID v4, simple form).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a session id received from a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, longer than 64 characters, or
    /// contains a character outside `[A-Za-z0-9_-]`.
    pub fn parse(s: &str) -> Result<Self, SessionIdError> {
        if s.is_empty() {
            return Err(SessionIdError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(SessionIdError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SessionIdError::InvalidCharacter(c));
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the session id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AnonymousSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AnonymousSessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The owner of a cart: exactly one of an anonymous browser session or an
/// authenticated user. There is no "both" and no "neither".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    /// A browser that has not logged in.
    Anonymous(AnonymousSessionId),
    /// A logged-in customer.
    Authenticated(UserId),
}

impl CartOwner {
    /// The effective owner for a request: the user when authenticated,
    /// otherwise the anonymous session.
    #[must_use]
    pub fn effective(anonymous: &AnonymousSessionId, user: Option<UserId>) -> Self {
        user.map_or_else(|| Self::Anonymous(anonymous.clone()), Self::Authenticated)
    }

    /// Rebuild an owner from the two nullable storage columns.
    ///
    /// Returns `None` unless exactly one column is set.
    #[must_use]
    pub fn from_columns(session_id: Option<String>, user_id: Option<i32>) -> Option<Self> {
        match (session_id, user_id) {
            (Some(session_id), None) => AnonymousSessionId::parse(&session_id)
                .ok()
                .map(Self::Anonymous),
            (None, Some(user_id)) => Some(Self::Authenticated(UserId::new(user_id))),
            _ => None,
        }
    }

    /// Split into the two nullable storage columns.
    #[must_use]
    pub fn to_columns(&self) -> (Option<&str>, Option<i32>) {
        match self {
            Self::Anonymous(session_id) => (Some(session_id.as_str()), None),
            Self::Authenticated(user_id) => (None, Some(user_id.as_i32())),
        }
    }

    /// Whether this owner is a logged-in user.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Short label used in logs and client views.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Anonymous(_) => "anonymous",
            Self::Authenticated(_) => "authenticated",
        }
    }
}

impl fmt::Display for CartOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous(session_id) => write!(f, "anonymous:{session_id}"),
            Self::Authenticated(user_id) => write!(f, "user:{user_id}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_parseable_and_unique() {
        let a = AnonymousSessionId::generate();
        let b = AnonymousSessionId::generate();
        assert_ne!(a, b);
        assert_eq!(AnonymousSessionId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(AnonymousSessionId::parse(""), Err(SessionIdError::Empty));
    }

    #[test]
    fn test_parse_too_long() {
        let long = "a".repeat(AnonymousSessionId::MAX_LENGTH + 1);
        assert!(matches!(
            AnonymousSessionId::parse(&long),
            Err(SessionIdError::TooLong { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_cookie_metacharacters() {
        for bad in ["a b", "a;b", "a=b", "a\"b", "caf\u{e9}"] {
            assert!(AnonymousSessionId::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_effective_owner_prefers_user() {
        let anon = AnonymousSessionId::parse("browser-1").unwrap();
        assert_eq!(
            CartOwner::effective(&anon, Some(UserId::new(5))),
            CartOwner::Authenticated(UserId::new(5))
        );
        assert_eq!(
            CartOwner::effective(&anon, None),
            CartOwner::Anonymous(anon.clone())
        );
    }

    #[test]
    fn test_columns_roundtrip() {
        let anon = CartOwner::Anonymous(AnonymousSessionId::parse("abc").unwrap());
        let (session_id, user_id) = anon.to_columns();
        assert_eq!(
            CartOwner::from_columns(session_id.map(String::from), user_id),
            Some(anon.clone())
        );

        let user = CartOwner::Authenticated(UserId::new(9));
        assert_eq!(user.to_columns(), (None, Some(9)));
    }

    #[test]
    fn test_from_columns_rejects_both_and_neither() {
        assert_eq!(CartOwner::from_columns(None, None), None);
        assert_eq!(CartOwner::from_columns(Some("abc".into()), Some(1)), None);
    }

    #[test]
    fn test_owner_serializes_tagged() {
        let json = serde_json::to_value(CartOwner::Authenticated(UserId::new(3))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "authenticated", "id": 3}));
    }
}
