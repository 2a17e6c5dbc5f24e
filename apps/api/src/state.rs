use std::sync::Arc;

use crate::analysis::CandidateAnalyzer;
use crate::persistence::{AnalysisRepository, ProjectRepository};
use crate::progress::ProjectRooms;
use crate::queue::AnalysisQueue;
use crate::storage::CvStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub queue: AnalysisQueue,
    /// Used directly for synchronous re-analysis; queued work goes through `queue`.
    pub analyzer: Arc<dyn CandidateAnalyzer>,
    pub projects: Arc<dyn ProjectRepository>,
    pub analyses: Arc<dyn AnalysisRepository>,
    pub cv_store: Arc<dyn CvStore>,
    /// Live progress subscribers, served as SSE.
    pub rooms: Arc<ProjectRooms>,
}
