use std::sync::Arc;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::AnalysisQueue;
use crate::credentials::KeyPool;
use crate::progress::ProjectRooms;

const MB: u64 = 1024 * 1024;

impl AnalysisQueue {
    /// Evicts queues past their maximum age and queues with nothing left to do.
    /// Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let max_age = self.config().max_age;
        let mut registry = self.lock();
        let before = registry.queues.len();

        registry.queues.retain(|project_id, queue| {
            let age = queue.started_at.elapsed();
            if age > max_age {
                info!(
                    "Evicting queue for project {project_id}: older than {}s ({}/{} processed)",
                    max_age.as_secs(),
                    queue.processed,
                    queue.total
                );
                return false;
            }
            if queue.is_idle() {
                info!("Evicting idle queue for project {project_id}");
                return false;
            }
            true
        });

        before - registry.queues.len()
    }

    /// Acts on the process's resident set size: warns above the warning
    /// threshold, and above the critical one evicts the oldest queues that have
    /// no active workers. Returns how many were evicted.
    pub fn relieve_memory_pressure(&self, rss_bytes: u64) -> usize {
        let config = self.config();
        if rss_bytes < config.memory_warn_bytes {
            return 0;
        }
        if rss_bytes < config.memory_critical_bytes {
            warn!(
                "Memory usage high: {} MB resident ({} MB warning threshold)",
                rss_bytes / MB,
                config.memory_warn_bytes / MB
            );
            return 0;
        }

        let mut registry = self.lock();
        let mut candidates: Vec<_> = registry
            .queues
            .iter()
            .filter(|(_, queue)| queue.active_workers == 0)
            .map(|(id, queue)| (*id, queue.started_at))
            .collect();
        candidates.sort_by_key(|(_, started_at)| *started_at);

        let evicted = candidates.len().min(config.pressure_evictions);
        for (project_id, _) in candidates.into_iter().take(evicted) {
            registry.queues.remove(&project_id);
        }
        warn!(
            "Memory usage critical: {} MB resident, evicted {} queues without active workers",
            rss_bytes / MB,
            evicted
        );
        evicted
    }
}

/// Resident memory of this process, sampled through sysinfo.
struct MemoryProbe {
    system: System,
    pid: Option<Pid>,
}

impl MemoryProbe {
    fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!("Memory monitoring disabled: {e}"))
            .ok();
        Self {
            system: System::new(),
            pid,
        }
    }

    fn resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system.process(pid).map(|p| p.memory())
    }
}

/// Background sweep: TTL/idle eviction, memory pressure, and pruning of
/// progress rooms whose subscribers are gone.
pub fn spawn_janitor(
    queue: AnalysisQueue,
    pool: Arc<KeyPool>,
    rooms: Arc<ProjectRooms>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = queue.config().sweep_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut memory = MemoryProbe::new();

        info!("Queue janitor started (interval: {}s)", period.as_secs());

        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;

            let swept = queue.sweep();
            let pressured = memory
                .resident_bytes()
                .map_or(0, |rss| queue.relieve_memory_pressure(rss));
            let reactivated = pool.reactivate_cooled_down();
            let rooms_closed = rooms.prune();

            debug!(
                "Janitor pass: {} queues swept, {} evicted for memory, {} credentials reactivated, {} rooms closed, {} queues tracked",
                swept,
                pressured,
                reactivated,
                rooms_closed,
                queue.project_count()
            );
        }
    })
}
