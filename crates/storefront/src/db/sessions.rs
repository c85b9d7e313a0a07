//! Session-token validation against `storefront.customer_session`.

use async_trait::async_trait;
use sqlx::PgPool;

use cartwright_core::UserId;

use crate::cart::error::Result;
use crate::cart::identity::SessionValidator;

/// Resolves session tokens written by the login flow.
#[derive(Debug, Clone)]
pub struct PgSessionValidator {
    pool: PgPool,
}

impl PgSessionValidator {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionValidator for PgSessionValidator {
    async fn validate(&self, token: &str) -> Result<Option<UserId>> {
        let row: Option<(i32,)> = sqlx::query_as(
            r"
            SELECT user_id
            FROM storefront.customer_session
            WHERE token = $1 AND expires_at > now()
            ",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id,)| UserId::new(user_id)))
    }
}
