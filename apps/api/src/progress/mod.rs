//! Progress notifier: live analysis/queue events scoped to one project.
//!
//! Emission is synchronous and never fails the caller: the queue emits while
//! holding its registry lock so events leave in mutation order. Channels hand
//! the payload off (broadcast send, mpsc send) and return immediately.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

pub mod pubsub;
pub mod rooms;

pub use pubsub::RedisProgressChannel;
pub use rooms::ProjectRooms;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    AnalysisStarted {
        candidate_id: Uuid,
        candidate_name: String,
    },
    AnalysisCompleted {
        candidate_id: Uuid,
        candidate_name: String,
        score: u8,
        needs_review: bool,
    },
    AnalysisError {
        candidate_id: Uuid,
        candidate_name: String,
        error: String,
    },
    QueueProgress {
        total: usize,
        processed: usize,
        remaining: usize,
        percent_complete: u8,
        active_workers: usize,
    },
    QueueCompleted {
        total: usize,
        processed: usize,
    },
    QueueCancelled {
        cleared: usize,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::AnalysisStarted { .. } => "analysis_started",
            ProgressEvent::AnalysisCompleted { .. } => "analysis_completed",
            ProgressEvent::AnalysisError { .. } => "analysis_error",
            ProgressEvent::QueueProgress { .. } => "queue_progress",
            ProgressEvent::QueueCompleted { .. } => "queue_completed",
            ProgressEvent::QueueCancelled { .. } => "queue_cancelled",
        }
    }
}

/// Wire shape of one event.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    pub project_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

/// A push transport. Implementations must not block.
pub trait ProgressChannel: Send + Sync {
    fn emit_to_project(&self, project_id: Uuid, event_name: &str, payload: &Value);
}

/// Fans each event out to every configured channel.
#[derive(Clone, Default)]
pub struct Notifier {
    channels: Vec<Arc<dyn ProgressChannel>>,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn ProgressChannel>>) -> Self {
        Self { channels }
    }

    pub fn notify(&self, project_id: Uuid, event: ProgressEvent) {
        if self.channels.is_empty() {
            return;
        }
        let name = event.name();
        let message = ProgressMessage {
            project_id,
            timestamp: Utc::now(),
            event,
        };
        let payload = match serde_json::to_value(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize {name} event for project {project_id}: {e}");
                return;
            }
        };
        for channel in &self.channels {
            channel.emit_to_project(project_id, name, &payload);
        }
    }
}
