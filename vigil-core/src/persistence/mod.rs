//! Durable stores backed by Postgres, plus embedded migrations.

pub mod api_keys;
pub mod jobs;

pub use api_keys::{ApiKeyStore, PgApiKeyStore};
pub use jobs::{ClaimOutcome, JobStore, PgJobStore};

use sqlx::PgPool;

use crate::error::Result;

/// Apply embedded migrations. Run once at startup before any store is
/// handed out.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| crate::error::VigilError::Internal(format!("migration failed: {e}")))?;
    Ok(())
}
