use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::ProgressChannel;

/// Per-room buffer. Slow subscribers past this many events see a lag and skip ahead.
const ROOM_CAPACITY: usize = 256;

/// One event as delivered to a room subscriber.
#[derive(Debug, Clone)]
pub struct ProgressFrame {
    pub event: String,
    /// Serialized `ProgressMessage`.
    pub data: String,
}

/// In-process rooms: one broadcast channel per project with live subscribers.
#[derive(Default)]
pub struct ProjectRooms {
    rooms: Mutex<HashMap<Uuid, broadcast::Sender<ProgressFrame>>>,
}

impl ProjectRooms {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, broadcast::Sender<ProgressFrame>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Joins the project's room, creating it on first subscriber.
    pub fn subscribe(&self, project_id: Uuid) -> broadcast::Receiver<ProgressFrame> {
        self.lock()
            .entry(project_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, project_id: Uuid) -> usize {
        self.lock()
            .get(&project_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    pub fn room_count(&self) -> usize {
        self.lock().len()
    }

    /// Drops rooms whose subscribers have all gone. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut rooms = self.lock();
        let before = rooms.len();
        rooms.retain(|_, tx| tx.receiver_count() > 0);
        before - rooms.len()
    }
}

impl ProgressChannel for ProjectRooms {
    fn emit_to_project(&self, project_id: Uuid, event_name: &str, payload: &Value) {
        let mut rooms = self.lock();
        let Some(tx) = rooms.get(&project_id) else {
            return;
        };
        let frame = ProgressFrame {
            event: event_name.to_string(),
            data: payload.to_string(),
        };
        if tx.send(frame).is_err() {
            rooms.remove(&project_id);
            debug!("Closed progress room for project {project_id}: no subscribers left");
        }
    }
}
