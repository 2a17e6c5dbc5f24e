pub mod candidates;
pub mod health;
pub mod queue;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/projects/:project_id/candidates",
            post(candidates::handle_upload_candidate),
        )
        .route(
            "/api/v1/candidates/:candidate_id/analyze",
            post(candidates::handle_analyze_candidate),
        )
        .route(
            "/api/v1/projects/:project_id/queue",
            get(queue::handle_queue_status).delete(queue::handle_cancel_queue),
        )
        .route(
            "/api/v1/projects/:project_id/events",
            get(queue::handle_project_events),
        )
        .with_state(state)
}
