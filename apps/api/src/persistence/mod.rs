//! Persistence seams used by the queue and the HTTP surface, plus their Postgres adapters.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::AnalysisResult;
use crate::models::candidate::CandidateRow;
use crate::queue::models::ProjectSnapshot;

pub mod candidates;
pub mod credentials;

pub use candidates::PgCandidateRepository;
pub use credentials::{PgCredentialStore, PgModelConfigStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Analyzed,
    NeedsReview,
    Error,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Analyzed => "analyzed",
            CandidateStatus::NeedsReview => "needs_review",
            CandidateStatus::Error => "error",
        }
    }
}

/// Denormalized analysis outcome written back onto the candidate row.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateUpdate {
    pub score: Option<u8>,
    pub status: CandidateStatus,
    pub summary: String,
}

impl CandidateUpdate {
    pub fn from_result(result: &AnalysisResult) -> Self {
        Self {
            score: Some(result.score),
            status: if result.needs_review {
                CandidateStatus::NeedsReview
            } else {
                CandidateStatus::Analyzed
            },
            summary: result.summary.clone(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            score: None,
            status: CandidateStatus::Error,
            summary: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub project_id: Uuid,
    pub name: String,
    pub cv_text: String,
    pub cv_s3_key: Option<String>,
}

/// Where finished analyses go.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Stores the full result. Returns the analysis id.
    async fn save_analysis(
        &self,
        candidate_id: Uuid,
        project_id: Uuid,
        result: &AnalysisResult,
    ) -> anyhow::Result<Uuid>;

    async fn update_candidate(&self, candidate_id: Uuid, update: &CandidateUpdate)
        -> anyhow::Result<()>;
}

/// Project and candidate lookups for the HTTP surface.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_project(&self, project_id: Uuid) -> anyhow::Result<Option<ProjectSnapshot>>;

    async fn find_candidate(&self, candidate_id: Uuid) -> anyhow::Result<Option<CandidateRow>>;

    async fn create_candidate(&self, candidate: &NewCandidate) -> anyhow::Result<Uuid>;
}
