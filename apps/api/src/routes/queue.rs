//! Queue inspection, cancellation and the live progress stream.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Serialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::queue::models::QueueStatus;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub project_id: Uuid,
    pub cancelled: bool,
    pub cleared: usize,
}

/// GET /api/v1/projects/:project_id/queue
pub async fn handle_queue_status(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<QueueStatus>, AppError> {
    state
        .queue
        .status(project_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No active queue for project {project_id}")))
}

/// DELETE /api/v1/projects/:project_id/queue
///
/// Clears pending work. Analyses already running still finish.
pub async fn handle_cancel_queue(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let cleared = state
        .queue
        .cancel(project_id)
        .ok_or_else(|| AppError::NotFound(format!("No active queue for project {project_id}")))?;

    Ok(Json(CancelResponse {
        project_id,
        cancelled: true,
        cleared,
    }))
}

/// GET /api/v1/projects/:project_id/events
///
/// Server-Sent Events stream of the project's progress events.
pub async fn handle_project_events(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.rooms.subscribe(project_id);
    debug!(
        "New progress subscriber for project {project_id} ({} connected)",
        state.rooms.subscriber_count(project_id)
    );
    let stream = BroadcastStream::new(receiver).filter_map(
        move |frame| match frame {
            Ok(frame) => Some(Ok(Event::default().event(frame.event).data(frame.data))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Progress subscriber for project {project_id} lagged, skipped {skipped} events");
                None
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}
