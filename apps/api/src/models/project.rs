use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub title: String,
    pub job_description: String,
    /// Replaces the default recruiter persona for this project's analyses.
    pub custom_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}
