//! Read-only API-key lookups for request attribution.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::hash_key;
use crate::error::Result;

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Resolve a presented raw key to an active key id, touching
    /// `last_used_at` on the way. Unknown or inactive keys resolve to
    /// `None`; attribution is best-effort, never a gate.
    async fn resolve(&self, raw_key: &str) -> Result<Option<Uuid>>;
}

#[derive(Clone)]
pub struct PgApiKeyStore {
    pool: PgPool,
}

impl PgApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn resolve(&self, raw_key: &str) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE api_keys
            SET last_used_at = NOW()
            WHERE key_hash = $1 AND is_active
            RETURNING id
            "#,
        )
        .bind(hash_key(raw_key))
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }
}
