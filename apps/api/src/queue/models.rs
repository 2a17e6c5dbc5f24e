use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::progress::ProgressEvent;

/// ETA text while no item has finished yet.
pub const ETA_CALCULATING: &str = "calculating...";

#[derive(Debug, Clone)]
pub struct CandidateSnapshot {
    pub name: String,
    pub cv_text: String,
}

#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub project_id: Uuid,
    /// Owning company; `None` analyses on global credentials.
    pub company_id: Option<Uuid>,
    pub job_title: String,
    pub job_description: String,
    pub custom_prompt: Option<String>,
}

/// One candidate waiting for analysis. Lives only in memory.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub candidate_id: Uuid,
    pub candidate: CandidateSnapshot,
    pub project: ProjectSnapshot,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(candidate_id: Uuid, candidate: CandidateSnapshot, project: ProjectSnapshot) -> Self {
        Self {
            candidate_id,
            candidate,
            project,
            enqueued_at: Utc::now(),
        }
    }
}

/// Pending work and counters for one project.
#[derive(Debug)]
pub struct ProjectQueue {
    /// Identifies this instance; a queue re-created for the same project gets a new one.
    pub epoch: u64,
    pub pending: VecDeque<WorkItem>,
    pub processed: usize,
    pub total: usize,
    pub started_at: Instant,
    pub active_workers: usize,
    pub max_workers: usize,
    pub is_processing: bool,
}

impl ProjectQueue {
    pub fn new(epoch: u64, max_workers: usize) -> Self {
        Self {
            epoch,
            pending: VecDeque::new(),
            processed: 0,
            total: 0,
            started_at: Instant::now(),
            active_workers: 0,
            max_workers: max_workers.max(1),
            is_processing: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }

    pub fn percent_complete(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.processed.min(self.total) * 100) / self.total) as u8
    }

    /// Nothing pending, nobody working.
    pub fn is_idle(&self) -> bool {
        !self.is_processing && self.pending.is_empty() && self.active_workers == 0
    }

    /// Idle with every enqueued item accounted for.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.active_workers == 0 && self.processed >= self.total
    }

    /// Reserves worker slots for pending items. Returns how many tasks to spawn.
    pub fn reserve_workers(&mut self) -> usize {
        let free = self.max_workers.saturating_sub(self.active_workers);
        let spawn = free.min(self.pending.len());
        self.active_workers += spawn;
        spawn
    }

    pub fn estimated_time_remaining(&self) -> String {
        if self.processed == 0 {
            return ETA_CALCULATING.to_string();
        }
        let per_item = self.started_at.elapsed().as_secs_f64() / self.processed as f64;
        format_eta((per_item * self.remaining() as f64).round() as u64)
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            total: self.total,
            processed: self.processed,
            remaining: self.remaining(),
            percent_complete: self.percent_complete(),
            estimated_time_remaining: self.estimated_time_remaining(),
            active_workers: self.active_workers,
            max_workers: self.max_workers,
            is_processing: self.is_processing,
        }
    }

    pub fn progress_event(&self) -> ProgressEvent {
        ProgressEvent::QueueProgress {
            total: self.total,
            processed: self.processed,
            remaining: self.remaining(),
            percent_complete: self.percent_complete(),
            active_workers: self.active_workers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub processed: usize,
    pub remaining: usize,
    pub percent_complete: u8,
    pub estimated_time_remaining: String,
    pub active_workers: usize,
    pub max_workers: usize,
    pub is_processing: bool,
}

/// "N seconds" under a minute, "N minutes" under an hour, "Hh Mm" beyond.
pub fn format_eta(seconds: u64) -> String {
    match seconds {
        0..=59 => format!("{seconds} seconds"),
        60..=3599 => format!("{} minutes", (seconds + 30) / 60),
        _ => format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60),
    }
}
