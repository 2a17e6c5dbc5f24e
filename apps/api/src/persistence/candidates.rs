use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{AnalysisRepository, CandidateStatus, CandidateUpdate, NewCandidate, ProjectRepository};
use crate::analysis::AnalysisResult;
use crate::models::candidate::CandidateRow;
use crate::models::project::ProjectRow;
use crate::queue::models::ProjectSnapshot;

/// `projects`, `candidates` and `analyses` tables.
#[derive(Clone)]
pub struct PgCandidateRepository {
    pool: PgPool,
}

impl PgCandidateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisRepository for PgCandidateRepository {
    async fn save_analysis(
        &self,
        candidate_id: Uuid,
        project_id: Uuid,
        result: &AnalysisResult,
    ) -> Result<Uuid> {
        let payload = serde_json::to_value(result).context("Failed to serialize analysis")?;
        let analysis_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO analyses (id, candidate_id, project_id, model, score, needs_review, result)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(analysis_id)
        .bind(candidate_id)
        .bind(project_id)
        .bind(result.model.as_deref())
        .bind(i16::from(result.score))
        .bind(result.needs_review)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        debug!("Saved analysis {analysis_id} for candidate {candidate_id}");
        Ok(analysis_id)
    }

    async fn update_candidate(&self, candidate_id: Uuid, update: &CandidateUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE candidates
            SET status = $2, score = $3, summary = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(candidate_id)
        .bind(update.status.as_str())
        .bind(update.score.map(i16::from))
        .bind(&update.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectRepository for PgCandidateRepository {
    async fn find_project(&self, project_id: Uuid) -> Result<Option<ProjectSnapshot>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, company_id, title, job_description, custom_prompt, created_at FROM projects WHERE id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|p| ProjectSnapshot {
            project_id: p.id,
            company_id: p.company_id,
            job_title: p.title,
            job_description: p.job_description,
            custom_prompt: p.custom_prompt,
        }))
    }

    async fn find_candidate(&self, candidate_id: Uuid) -> Result<Option<CandidateRow>> {
        Ok(
            sqlx::query_as::<_, CandidateRow>("SELECT * FROM candidates WHERE id = $1")
                .bind(candidate_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_candidate(&self, candidate: &NewCandidate) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO candidates (id, project_id, name, cv_text, cv_s3_key, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(candidate.project_id)
        .bind(&candidate.name)
        .bind(&candidate.cv_text)
        .bind(candidate.cv_s3_key.as_deref())
        .bind(CandidateStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}
