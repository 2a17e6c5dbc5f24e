use sqlx::FromRow;
use uuid::Uuid;

/// Active key as read for the rotation pool. No `Debug`: carries key material.
#[derive(Clone, FromRow)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub api_key: String,
    pub company_id: Option<Uuid>,
    pub provider: String,
    pub max_requests: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyModelRow {
    pub primary_model: String,
    pub fallback_model_1: Option<String>,
    pub fallback_model_2: Option<String>,
    pub fallback_model_3: Option<String>,
}
