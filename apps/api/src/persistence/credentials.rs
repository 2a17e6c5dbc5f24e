use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::analysis::model_resolver::{ModelConfigStore, ModelConfiguration};
use crate::credentials::{CredentialRecord, CredentialScope, CredentialStore};
use crate::models::api_key::{ApiKeyModelRow, ApiKeyRow};

/// `api_keys` table adapter.
pub struct PgCredentialStore {
    pool: PgPool,
    /// Ceiling for keys whose `max_requests` column is NULL.
    default_max_requests: u32,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, default_max_requests: u32) -> Self {
        Self {
            pool,
            default_max_requests,
        }
    }

    fn to_record(&self, row: ApiKeyRow) -> CredentialRecord {
        CredentialRecord {
            id: row.id,
            key: row.api_key,
            company_id: row.company_id,
            provider: row.provider,
            max_requests: row
                .max_requests
                .and_then(|m| u32::try_from(m).ok())
                .unwrap_or(self.default_max_requests),
        }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn list_active(&self, scope: CredentialScope) -> Result<Vec<CredentialRecord>> {
        const COLUMNS: &str = "SELECT id, api_key, company_id, provider, max_requests FROM api_keys";

        let rows = match scope {
            CredentialScope::Company(company_id) => {
                sqlx::query_as::<_, ApiKeyRow>(&format!(
                    "{COLUMNS} WHERE is_active = TRUE AND company_id = $1 ORDER BY created_at"
                ))
                .bind(company_id)
                .fetch_all(&self.pool)
                .await?
            }
            CredentialScope::Global => {
                sqlx::query_as::<_, ApiKeyRow>(&format!(
                    "{COLUMNS} WHERE is_active = TRUE AND company_id IS NULL ORDER BY created_at"
                ))
                .fetch_all(&self.pool)
                .await?
            }
            CredentialScope::All => {
                sqlx::query_as::<_, ApiKeyRow>(&format!(
                    "{COLUMNS} WHERE is_active = TRUE ORDER BY created_at"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(|row| self.to_record(row)).collect())
    }

    async fn increment_usage(&self, credential_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE api_keys SET usage_count = usage_count + 1, last_used_at = NOW() WHERE id = $1",
        )
        .bind(credential_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// `api_key_models` table adapter.
pub struct PgModelConfigStore {
    pool: PgPool,
}

impl PgModelConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ModelConfigStore for PgModelConfigStore {
    async fn fallback_order(&self, credential_id: Uuid) -> Result<Option<ModelConfiguration>> {
        let row = sqlx::query_as::<_, ApiKeyModelRow>(
            r#"
            SELECT primary_model, fallback_model_1, fallback_model_2, fallback_model_3
            FROM api_key_models
            WHERE api_key_id = $1
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ModelConfiguration {
            primary: r.primary_model,
            fallbacks: [r.fallback_model_1, r.fallback_model_2, r.fallback_model_3],
        }))
    }
}
