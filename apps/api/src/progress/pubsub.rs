use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ProgressChannel;

/// Events buffered for the forwarder. Beyond this, new events are dropped.
const EVENT_BUFFER: usize = 1024;

/// Redis channel carrying one project's progress events.
pub fn channel_name(project_id: Uuid) -> String {
    format!("project:{project_id}:progress")
}

/// Time bounds for the forwarder's Redis round-trips.
#[derive(Debug, Clone, Copy)]
pub struct ForwarderLimits {
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    /// After a failed connect or publish, events are dropped for this long.
    pub reconnect_backoff: Duration,
}

impl Default for ForwarderLimits {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            publish_timeout: Duration::from_secs(2),
            reconnect_backoff: Duration::from_secs(10),
        }
    }
}

/// Publishes progress events to Redis for subscribers in other processes.
///
/// `emit_to_project` only enqueues into a bounded buffer; a single forwarding
/// task owns the connection and publishes in emission order.
pub struct RedisProgressChannel {
    tx: mpsc::Sender<(String, String)>,
}

impl RedisProgressChannel {
    pub fn spawn(client: redis::Client) -> Self {
        Self::spawn_with(client, EVENT_BUFFER, ForwarderLimits::default())
    }

    pub fn spawn_with(client: redis::Client, buffer: usize, limits: ForwarderLimits) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(forward(client, rx, limits));
        info!("Redis progress fan-out started (buffer: {buffer} events)");
        Self { tx }
    }

    /// Events waiting for the forwarder.
    pub fn backlog(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl ProgressChannel for RedisProgressChannel {
    fn emit_to_project(&self, project_id: Uuid, event_name: &str, payload: &Value) {
        let body = json!({ "event": event_name, "data": payload }).to_string();
        match self.tx.try_send((channel_name(project_id), body)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Redis progress buffer full, dropping {event_name} for project {project_id}");
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Redis forwarder is gone, dropping {event_name} for project {project_id}");
            }
        }
    }
}

async fn forward(
    client: redis::Client,
    mut rx: mpsc::Receiver<(String, String)>,
    limits: ForwarderLimits,
) {
    let mut connection: Option<MultiplexedConnection> = None;
    let mut retry_at: Option<Instant> = None;

    while let Some((channel, body)) = rx.recv().await {
        if connection.is_none() {
            if retry_at.is_some_and(|at| Instant::now() < at) {
                debug!("Redis in backoff, dropping progress event on {channel}");
                continue;
            }
            match timeout(limits.connect_timeout, client.get_multiplexed_async_connection()).await {
                Ok(Ok(conn)) => {
                    connection = Some(conn);
                    retry_at = None;
                }
                Ok(Err(e)) => {
                    warn!("Redis unavailable, dropping progress event on {channel}: {e}");
                    retry_at = Some(Instant::now() + limits.reconnect_backoff);
                    continue;
                }
                Err(_) => {
                    warn!(
                        "Redis connect timed out after {:?}, dropping progress event on {channel}",
                        limits.connect_timeout
                    );
                    retry_at = Some(Instant::now() + limits.reconnect_backoff);
                    continue;
                }
            }
        }

        let Some(conn) = connection.as_mut() else {
            continue;
        };
        let published: Result<redis::RedisResult<i64>, _> =
            timeout(limits.publish_timeout, conn.publish(&channel, &body)).await;
        match published {
            Ok(Ok(receivers)) => debug!("Published to {channel} ({receivers} receivers)"),
            Ok(Err(e)) => {
                warn!("Redis publish to {channel} failed: {e}");
                connection = None;
                retry_at = Some(Instant::now() + limits.reconnect_backoff);
            }
            Err(_) => {
                warn!("Redis publish to {channel} timed out");
                connection = None;
                retry_at = Some(Instant::now() + limits.reconnect_backoff);
            }
        }
    }

    debug!("Redis progress forwarder stopped");
}
