//! Candidate intake and re-analysis.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisInput, AnalysisResult};
use crate::errors::AppError;
use crate::persistence::{CandidateUpdate, NewCandidate};
use crate::queue::models::{CandidateSnapshot, QueueStatus, WorkItem};
use crate::state::AppState;
use crate::storage::{cv_object_key, extract_cv_text};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub candidate_id: Uuid,
    pub queue: QueueStatus,
}

struct UploadedCv {
    file_name: String,
    content_type: String,
    body: Bytes,
}

/// POST /api/v1/projects/:project_id/candidates
///
/// Multipart form: `cv` (file, required), `name` (text, optional).
/// Stores the original, creates the candidate and queues it for analysis.
pub async fn handle_upload_candidate(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let project = state
        .projects
        .find_project(project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {project_id} not found")))?;

    let mut cv: Option<UploadedCv> = None;
    let mut name: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        match field.name().map(str::to_string).as_deref() {
            Some("cv") => {
                let file_name = field.file_name().unwrap_or("cv.pdf").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/pdf")
                    .to_string();
                let body = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Could not read CV upload: {e}")))?;
                cv = Some(UploadedCv {
                    file_name,
                    content_type,
                    body,
                });
            }
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid name field: {e}")))?;
                name = Some(text);
            }
            _ => {}
        }
    }

    let cv = cv.ok_or_else(|| AppError::Validation("Missing 'cv' file field".to_string()))?;
    if cv.body.is_empty() {
        return Err(AppError::Validation("CV file is empty".to_string()));
    }

    let cv_text = extract_cv_text(cv.body.clone()).await;
    let s3_key = cv_object_key(project_id, &cv.file_name);
    state
        .cv_store
        .put_cv(&s3_key, cv.body, &cv.content_type)
        .await
        .map_err(|e| AppError::S3(format!("{e:#}")))?;

    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| name_from_file(&cv.file_name));

    let candidate_id = state
        .projects
        .create_candidate(&NewCandidate {
            project_id,
            name: name.clone(),
            cv_text: cv_text.clone(),
            cv_s3_key: Some(s3_key),
        })
        .await?;
    info!("Created candidate {candidate_id} ({name}) in project {project_id}");

    let item = WorkItem::new(candidate_id, CandidateSnapshot { name, cv_text }, project);
    let queue = match state.queue.enqueue(item).await {
        Ok(status) => status,
        Err(e) => {
            let update = CandidateUpdate::failed(e.to_string());
            if let Err(mark) = state.analyses.update_candidate(candidate_id, &update).await {
                warn!("Could not mark candidate {candidate_id} as failed: {mark:#}");
            }
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            candidate_id,
            queue,
        }),
    ))
}

/// POST /api/v1/candidates/:candidate_id/analyze
///
/// Runs one analysis synchronously, persists it and returns it.
pub async fn handle_analyze_candidate(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<AnalysisResult>, AppError> {
    let candidate = state
        .projects
        .find_candidate(candidate_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Candidate {candidate_id} not found")))?;
    let project = state
        .projects
        .find_project(candidate.project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {} not found", candidate.project_id)))?;

    let input = AnalysisInput {
        cv_text: candidate.cv_text,
        job_description: project.job_description,
        custom_prompt: project.custom_prompt,
    };
    let result = match state.analyzer.analyze(&input, project.company_id).await {
        Ok(result) => result,
        Err(e) => {
            let update = CandidateUpdate::failed(format!("Analysis failed: {e}"));
            if let Err(mark_err) = state.analyses.update_candidate(candidate_id, &update).await {
                warn!("Could not mark candidate {candidate_id} as failed: {mark_err:#}");
            }
            return Err(e.into());
        }
    };

    state
        .analyses
        .save_analysis(candidate_id, project.project_id, &result)
        .await?;
    state
        .analyses
        .update_candidate(candidate_id, &CandidateUpdate::from_result(&result))
        .await?;

    Ok(Json(result))
}

/// "jane_doe-cv.pdf" -> "jane doe cv"
fn name_from_file(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    let cleaned = stem
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        "Unnamed candidate".to_string()
    } else {
        cleaned
    }
}
