//! Per-project analysis queues.
//!
//! One registry owns every project's queue. Workers are tokio tasks that pop
//! items FIFO, call the analyzer, persist the outcome and report progress. The
//! registry sits behind a std mutex that is never held across an `.await`;
//! queue events are emitted while it is held so subscribers see them in
//! mutation order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisInput, AnalysisResult, CandidateAnalyzer};
use crate::credentials::KeyPool;
use crate::persistence::{AnalysisRepository, CandidateUpdate};
use crate::progress::{Notifier, ProgressEvent};

pub mod janitor;
pub mod models;

pub use janitor::spawn_janitor;
use models::{ProjectQueue, ProjectSnapshot, QueueStatus, WorkItem};

/// Tuning knobs, all overridable from the environment (see `Config`).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_projects: usize,
    pub sweep_interval: Duration,
    pub max_age: Duration,
    pub abandoned_grace: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub inter_request_delay: Duration,
    pub memory_warn_bytes: u64,
    pub memory_critical_bytes: u64,
    pub pressure_evictions: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_projects: 50,
            sweep_interval: Duration::from_secs(15 * 60),
            max_age: Duration::from_secs(2 * 60 * 60),
            abandoned_grace: Duration::from_secs(30),
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(1500),
            inter_request_delay: Duration::from_millis(1500),
            memory_warn_bytes: 512 * 1024 * 1024,
            memory_critical_bytes: 1024 * 1024 * 1024,
            pressure_evictions: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No usable API credentials for project {project_id}")]
    NoCredentials { project_id: Uuid },
}

#[derive(Debug, Default)]
struct Registry {
    queues: HashMap<Uuid, ProjectQueue>,
    next_epoch: u64,
}

impl Registry {
    /// The live queue for `project_id`, only if it is still the instance `epoch`.
    fn instance_mut(&mut self, project_id: Uuid, epoch: u64) -> Option<&mut ProjectQueue> {
        self.queues
            .get_mut(&project_id)
            .filter(|queue| queue.epoch == epoch)
    }
}

struct Shared {
    registry: Mutex<Registry>,
    pool: Arc<KeyPool>,
    analyzer: Arc<dyn CandidateAnalyzer>,
    repository: Arc<dyn AnalysisRepository>,
    notifier: Notifier,
    config: QueueConfig,
}

/// Handle to the queue registry. Cheap to clone; every clone shares state.
#[derive(Clone)]
pub struct AnalysisQueue {
    shared: Arc<Shared>,
}

impl AnalysisQueue {
    pub fn new(
        pool: Arc<KeyPool>,
        analyzer: Arc<dyn CandidateAnalyzer>,
        repository: Arc<dyn AnalysisRepository>,
        notifier: Notifier,
        config: QueueConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                pool,
                analyzer,
                repository,
                notifier,
                config,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, project_id: Uuid, event: ProgressEvent) {
        self.shared.notifier.notify(project_id, event);
    }

    pub fn project_count(&self) -> usize {
        self.lock().queues.len()
    }

    /// Appends a candidate to its project's queue and starts workers as needed.
    ///
    /// The first item of a project sizes the worker ceiling from the usable
    /// credentials of the project's scope; none at all rejects the item.
    pub async fn enqueue(&self, item: WorkItem) -> Result<QueueStatus, QueueError> {
        let mut item = item;
        let mut ceiling = None;
        loop {
            match self.admit(item, ceiling) {
                Ok(status) => return Ok(status),
                Err(returned) => {
                    ceiling = Some(self.size_workers(&returned.project).await?);
                    item = returned;
                }
            }
        }
    }

    /// Appends `item` under a single lock. A missing queue needs a worker
    /// ceiling; without one the item is handed back for sizing.
    fn admit(&self, item: WorkItem, ceiling: Option<usize>) -> Result<QueueStatus, WorkItem> {
        let project_id = item.project.project_id;
        let mut registry = self.lock();
        if !registry.queues.contains_key(&project_id) {
            let Some(max_workers) = ceiling else {
                return Err(item);
            };
            self.make_room(&mut registry, project_id);
            let epoch = registry.next_epoch;
            registry.next_epoch += 1;
            info!(
                "Created analysis queue for project {project_id} ({}, {max_workers} workers max)",
                item.project.job_title
            );
            registry
                .queues
                .insert(project_id, ProjectQueue::new(epoch, max_workers));
        }
        let Some(queue) = registry.queues.get_mut(&project_id) else {
            return Err(item);
        };

        debug!(
            "Queued candidate {} ({}) for project {}",
            item.candidate_id, item.candidate.name, project_id
        );
        queue.pending.push_back(item);
        queue.total += 1;
        queue.is_processing = true;
        let spawn = queue.reserve_workers();
        let epoch = queue.epoch;
        let status = queue.status();
        self.notify(project_id, queue.progress_event());
        drop(registry);

        for _ in 0..spawn {
            self.spawn_worker(project_id, epoch);
        }
        Ok(status)
    }

    async fn size_workers(&self, project: &ProjectSnapshot) -> Result<usize, QueueError> {
        match self.shared.pool.count_usable(project.company_id).await {
            Ok(0) => {
                warn!(
                    "Rejecting work for project {}: no usable API credentials",
                    project.project_id
                );
                Err(QueueError::NoCredentials {
                    project_id: project.project_id,
                })
            }
            Ok(usable) => Ok(usable),
            Err(e) => {
                warn!(
                    "Credential lookup failed while sizing queue for project {}: {}. Using 1 worker",
                    project.project_id, e
                );
                Ok(1)
            }
        }
    }

    /// Evicts the oldest non-processing queues until a new one fits.
    fn make_room(&self, registry: &mut Registry, incoming: Uuid) {
        let max_projects = self.shared.config.max_projects;
        while registry.queues.len() >= max_projects {
            let oldest = registry
                .queues
                .iter()
                .filter(|(_, queue)| !queue.is_processing)
                .min_by_key(|(_, queue)| queue.started_at)
                .map(|(id, _)| *id);

            match oldest {
                Some(project_id) => {
                    registry.queues.remove(&project_id);
                    info!(
                        "Evicted queue for project {project_id}: registry at capacity ({max_projects})"
                    );
                }
                None => {
                    warn!(
                        "All {} queues are processing; admitting project {} over the limit of {}",
                        registry.queues.len(),
                        incoming,
                        max_projects
                    );
                    break;
                }
            }
        }
    }

    fn spawn_worker(&self, project_id: Uuid, epoch: u64) {
        let queue = self.clone();
        tokio::spawn(async move { queue.run_worker(project_id, epoch).await });
    }

    async fn run_worker(self, project_id: Uuid, epoch: u64) {
        debug!("Worker started for project {project_id}");
        while let Some(item) = self.take_next(project_id, epoch) {
            sleep(self.jitter()).await;
            self.process_item(project_id, epoch, item).await;
            sleep(self.shared.config.inter_request_delay).await;
        }
        debug!("Worker for project {project_id} exited");
    }

    fn jitter(&self) -> Duration {
        let config = &self.shared.config;
        let (min, max) = (config.jitter_min, config.jitter_max.max(config.jitter_min));
        if min == max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    /// Pops the head item. An empty queue releases this worker's slot in the
    /// same critical section, and the last worker out closes the run.
    fn take_next(&self, project_id: Uuid, epoch: u64) -> Option<WorkItem> {
        let mut registry = self.lock();
        let queue = registry.instance_mut(project_id, epoch)?;
        if let Some(item) = queue.pending.pop_front() {
            return Some(item);
        }

        queue.active_workers = queue.active_workers.saturating_sub(1);
        if queue.active_workers == 0 {
            queue.is_processing = false;
            self.emit_queue_update_locked(&mut registry, project_id, true);
        }
        None
    }

    async fn process_item(&self, project_id: Uuid, epoch: u64, item: WorkItem) {
        let candidate_id = item.candidate_id;
        let candidate_name = item.candidate.name.clone();
        let waited = chrono::Utc::now() - item.enqueued_at;
        debug!(
            "Analyzing candidate {candidate_id} for project {project_id} after {}s in queue",
            waited.num_seconds()
        );
        self.notify(
            project_id,
            ProgressEvent::AnalysisStarted {
                candidate_id,
                candidate_name: candidate_name.clone(),
            },
        );

        match self.analyze_and_store(&item).await {
            Ok(result) => {
                self.notify(
                    project_id,
                    ProgressEvent::AnalysisCompleted {
                        candidate_id,
                        candidate_name,
                        score: result.score,
                        needs_review: result.needs_review,
                    },
                );
            }
            Err(message) => {
                warn!("Analysis failed for candidate {candidate_id}: {message}");
                let update = CandidateUpdate::failed(format!("Analysis failed: {message}"));
                if let Err(e) = self
                    .shared
                    .repository
                    .update_candidate(candidate_id, &update)
                    .await
                {
                    warn!("Could not mark candidate {candidate_id} as failed: {e:#}");
                }
                self.notify(
                    project_id,
                    ProgressEvent::AnalysisError {
                        candidate_id,
                        candidate_name,
                        error: message,
                    },
                );
            }
        }

        let mut registry = self.lock();
        if let Some(queue) = registry.instance_mut(project_id, epoch) {
            queue.processed += 1;
            let event = queue.progress_event();
            self.notify(project_id, event);
        }
    }

    async fn analyze_and_store(&self, item: &WorkItem) -> Result<AnalysisResult, String> {
        let input = AnalysisInput {
            cv_text: item.candidate.cv_text.clone(),
            job_description: item.project.job_description.clone(),
            custom_prompt: item.project.custom_prompt.clone(),
        };
        let result = self
            .shared
            .analyzer
            .analyze(&input, item.project.company_id)
            .await
            .map_err(|e| e.to_string())?;

        let repository = &self.shared.repository;
        repository
            .save_analysis(item.candidate_id, item.project.project_id, &result)
            .await
            .map_err(|e| format!("could not save analysis: {e:#}"))?;
        repository
            .update_candidate(item.candidate_id, &CandidateUpdate::from_result(&result))
            .await
            .map_err(|e| format!("could not update candidate: {e:#}"))?;
        Ok(result)
    }

    pub fn status(&self, project_id: Uuid) -> Option<QueueStatus> {
        self.lock().queues.get(&project_id).map(ProjectQueue::status)
    }

    /// Drops pending items and the queue itself. In-flight items still finish
    /// and persist. Returns how many pending items were cleared.
    pub fn cancel(&self, project_id: Uuid) -> Option<usize> {
        let mut registry = self.lock();
        let mut queue = registry.queues.remove(&project_id)?;
        let cleared = queue.pending.len();
        queue.pending.clear();
        queue.is_processing = false;
        info!(
            "Cancelled queue for project {project_id}: {cleared} pending items cleared, {} in flight",
            queue.active_workers
        );
        self.notify(project_id, ProgressEvent::QueueCancelled { cleared });
        Some(cleared)
    }

    /// Publishes the queue's progress. With `completed`, a drained queue is
    /// evicted and announced complete; an abandoned one is evicted after the
    /// grace period unless work resumes first.
    pub fn emit_queue_update(&self, project_id: Uuid, completed: bool) {
        let mut registry = self.lock();
        self.emit_queue_update_locked(&mut registry, project_id, completed);
    }

    fn emit_queue_update_locked(&self, registry: &mut Registry, project_id: Uuid, completed: bool) {
        let Some(queue) = registry.queues.get(&project_id) else {
            return;
        };
        self.notify(project_id, queue.progress_event());
        if !completed {
            return;
        }

        if queue.is_drained() {
            let (total, processed) = (queue.total, queue.processed);
            registry.queues.remove(&project_id);
            info!("Queue for project {project_id} completed ({processed}/{total}), evicted");
            self.notify(project_id, ProgressEvent::QueueCompleted { total, processed });
        } else if queue.active_workers == 0 {
            self.schedule_abandoned_eviction(project_id, queue.epoch);
        }
    }

    fn schedule_abandoned_eviction(&self, project_id: Uuid, epoch: u64) {
        let queue = self.clone();
        let grace = self.shared.config.abandoned_grace;
        debug!("Queue for project {project_id} idle with unfinished work, evicting in {grace:?}");
        tokio::spawn(async move {
            sleep(grace).await;
            let mut registry = queue.lock();
            let abandoned = registry
                .instance_mut(project_id, epoch)
                .is_some_and(|q| q.active_workers == 0 && !q.is_processing);
            if abandoned {
                registry.queues.remove(&project_id);
                info!("Evicted abandoned queue for project {project_id}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::analysis::parser::fallback_result;
    use crate::analysis::AnalysisError;
    use crate::credentials::pool::DEFAULT_COOLDOWN;
    use crate::credentials::testing::{record, StaticCredentialStore};
    use crate::llm_client::LlmError;
    use crate::persistence::testing::MemoryRepository;
    use crate::persistence::CandidateStatus;
    use crate::progress::testing::RecordingChannel;
    use crate::progress::ProgressChannel;
    use super::models::CandidateSnapshot;

    /// Scores every CV after a fixed delay and tracks concurrency.
    struct SlowAnalyzer {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<String>>,
        failing: HashSet<String>,
    }

    impl SlowAnalyzer {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                failing: HashSet::new(),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CandidateAnalyzer for SlowAnalyzer {
        async fn analyze(
            &self,
            input: &AnalysisInput,
            _scope: Option<Uuid>,
        ) -> Result<AnalysisResult, AnalysisError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(input.cv_text.clone());
            sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&input.cv_text) {
                return Err(AnalysisError::Transport {
                    model: "model-c".to_string(),
                    source: LlmError::Api {
                        status: 503,
                        message: "overloaded".to_string(),
                    },
                });
            }
            Ok(AnalysisResult {
                score: 70,
                summary: format!("Reviewed {}", input.cv_text),
                ..Default::default()
            })
        }
    }

    struct Fixture {
        queue: AnalysisQueue,
        analyzer: Arc<SlowAnalyzer>,
        repository: Arc<MemoryRepository>,
        events: Arc<RecordingChannel>,
    }

    fn fixture(credentials: usize, analyzer: SlowAnalyzer, config: QueueConfig) -> Fixture {
        let records = (0..credentials).map(|_| record(None, 100)).collect();
        let pool = Arc::new(KeyPool::new(
            Arc::new(StaticCredentialStore::new(records)),
            DEFAULT_COOLDOWN,
        ));
        let analyzer = Arc::new(analyzer);
        let repository = Arc::new(MemoryRepository::default());
        let events = Arc::new(RecordingChannel::default());
        let queue = AnalysisQueue::new(
            pool,
            analyzer.clone(),
            repository.clone(),
            Notifier::new(vec![events.clone() as Arc<dyn ProgressChannel>]),
            config,
        );
        Fixture {
            queue,
            analyzer,
            repository,
            events,
        }
    }

    fn project(project_id: Uuid) -> ProjectSnapshot {
        ProjectSnapshot {
            project_id,
            company_id: None,
            job_title: "Backend Engineer".to_string(),
            job_description: "Rust services".to_string(),
            custom_prompt: None,
        }
    }

    fn item(project_id: Uuid, cv: &str) -> WorkItem {
        WorkItem::new(
            Uuid::new_v4(),
            CandidateSnapshot {
                name: format!("Candidate {cv}"),
                cv_text: cv.to_string(),
            },
            project(project_id),
        )
    }

    /// Long enough for any test run here to drain.
    async fn settle() {
        sleep(Duration::from_secs(120)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_items_two_credentials() {
        let f = fixture(2, SlowAnalyzer::new(Duration::from_secs(2)), QueueConfig::default());
        let project_id = Uuid::new_v4();

        let mut statuses = Vec::new();
        for cv in ["cv-1", "cv-2", "cv-3"] {
            statuses.push(f.queue.enqueue(item(project_id, cv)).await.unwrap());
        }
        assert_eq!(statuses[2].total, 3);
        assert_eq!(statuses[2].max_workers, 2);
        assert_eq!(statuses[2].active_workers, 2);

        settle().await;

        assert_eq!(f.analyzer.peak.load(Ordering::SeqCst), 2);
        assert_eq!(f.repository.analysis_count(), 3);
        assert!(f.queue.status(project_id).is_none());

        let progress = f.events.payloads_named(project_id, "queue_progress");
        assert!(progress.iter().all(|p| p["total"].as_u64() <= Some(3)));
        let processed: Vec<u64> = progress
            .iter()
            .filter(|p| p["total"] == 3)
            .filter_map(|p| p["processed"].as_u64())
            .collect();
        assert!(processed.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(processed.last(), Some(&3));

        let names = f.events.names_for(project_id);
        assert_eq!(names.last().map(String::as_str), Some("queue_completed"));
        let outcomes: Vec<_> = f
            .events
            .payloads_named(project_id, "analysis_completed")
            .into_iter()
            .chain(f.events.payloads_named(project_id, "analysis_error"))
            .collect();
        assert_eq!(outcomes.len(), 3);
        let candidates: HashSet<String> = outcomes
            .iter()
            .filter_map(|p| p["candidate_id"].as_str().map(str::to_string))
            .collect();
        assert_eq!(candidates.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_queue_is_sized_before_insert() {
        let f = fixture(3, SlowAnalyzer::new(Duration::ZERO), QueueConfig::default());
        let project_id = Uuid::new_v4();

        let returned = f.queue.admit(item(project_id, "cv-1"), None).unwrap_err();
        assert_eq!(returned.project.project_id, project_id);
        assert!(f.queue.status(project_id).is_none());

        f.queue.enqueue(item(project_id, "cv-1")).await.unwrap();
        settle().await;
        assert!(f.queue.status(project_id).is_none());

        // A fresh queue after eviction gets the full ceiling again.
        let status = f.queue.enqueue(item(project_id, "cv-2")).await.unwrap();
        assert_eq!(status.max_workers, 3);
        assert_eq!(status.total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_queue_admits_without_sizing() {
        let f = fixture(2, SlowAnalyzer::new(Duration::from_secs(5)), QueueConfig::default());
        let project_id = Uuid::new_v4();
        f.queue.enqueue(item(project_id, "cv-1")).await.unwrap();

        let status = f.queue.admit(item(project_id, "cv-2"), None).unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.max_workers, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_item_consumed_exactly_once_in_fifo_order() {
        let f = fixture(1, SlowAnalyzer::new(Duration::from_millis(300)), QueueConfig::default());
        let project_id = Uuid::new_v4();
        let cvs: Vec<String> = (0..8).map(|i| format!("cv-{i}")).collect();

        for cv in &cvs {
            f.queue.enqueue(item(project_id, cv)).await.unwrap();
        }
        settle().await;

        assert_eq!(f.analyzer.seen(), cvs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_consumed_once_across_workers() {
        let f = fixture(3, SlowAnalyzer::new(Duration::from_millis(700)), QueueConfig::default());
        let project_id = Uuid::new_v4();

        for i in 0..12 {
            f.queue
                .enqueue(item(project_id, &format!("cv-{i}")))
                .await
                .unwrap();
        }
        settle().await;

        let seen = f.analyzer.seen();
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(seen.len(), 12);
        assert_eq!(unique.len(), 12);
        assert!(f.analyzer.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_without_credentials_is_rejected() {
        let f = fixture(0, SlowAnalyzer::new(Duration::ZERO), QueueConfig::default());
        let project_id = Uuid::new_v4();

        let err = f.queue.enqueue(item(project_id, "cv")).await.unwrap_err();

        assert!(matches!(err, QueueError::NoCredentials { project_id: id } if id == project_id));
        assert!(f.queue.status(project_id).is_none());
        assert!(f.events.names_for(project_id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_reported_and_worker_continues() {
        let mut analyzer = SlowAnalyzer::new(Duration::from_millis(100));
        analyzer.failing.insert("cv-bad".to_string());
        let f = fixture(1, analyzer, QueueConfig::default());
        let project_id = Uuid::new_v4();

        let bad = item(project_id, "cv-bad");
        let bad_id = bad.candidate_id;
        let good = item(project_id, "cv-good");
        let good_id = good.candidate_id;
        f.queue.enqueue(bad).await.unwrap();
        f.queue.enqueue(good).await.unwrap();
        settle().await;

        let failed = f.repository.last_update(bad_id).unwrap();
        assert_eq!(failed.status, CandidateStatus::Error);
        assert!(failed.summary.contains("model-c"));
        assert_eq!(
            f.repository.last_update(good_id).unwrap().status,
            CandidateStatus::Analyzed
        );

        let errors = f.events.payloads_named(project_id, "analysis_error");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["candidate_id"], bad_id.to_string());
        assert_eq!(
            f.events.names_for(project_id).last().map(String::as_str),
            Some("queue_completed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_counts_as_item_error() {
        let f = fixture(1, SlowAnalyzer::new(Duration::from_millis(100)), QueueConfig::default());
        let project_id = Uuid::new_v4();
        let work = item(project_id, "cv-1");
        let candidate_id = work.candidate_id;
        f.repository.failing_saves.lock().unwrap().push(candidate_id);

        f.queue.enqueue(work).await.unwrap();
        settle().await;

        assert_eq!(
            f.repository.last_update(candidate_id).unwrap().status,
            CandidateStatus::Error
        );
        assert_eq!(f.events.payloads_named(project_id, "analysis_error").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_review_result_sets_status() {
        struct FallbackAnalyzer;

        #[async_trait]
        impl CandidateAnalyzer for FallbackAnalyzer {
            async fn analyze(
                &self,
                input: &AnalysisInput,
                _scope: Option<Uuid>,
            ) -> Result<AnalysisResult, AnalysisError> {
                Ok(fallback_result(&input.cv_text, "not json"))
            }
        }

        let f = fixture(1, SlowAnalyzer::new(Duration::ZERO), QueueConfig::default());
        let queue = AnalysisQueue::new(
            f.queue.shared.pool.clone(),
            Arc::new(FallbackAnalyzer),
            f.repository.clone(),
            Notifier::default(),
            QueueConfig::default(),
        );
        let project_id = Uuid::new_v4();
        let work = item(project_id, "x");
        let candidate_id = work.candidate_id;

        queue.enqueue(work).await.unwrap();
        settle().await;

        let update = f.repository.last_update(candidate_id).unwrap();
        assert_eq!(update.status, CandidateStatus::NeedsReview);
        assert_eq!(update.score, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_progress_and_eta() {
        let f = fixture(1, SlowAnalyzer::new(Duration::from_secs(5)), QueueConfig::default());
        let project_id = Uuid::new_v4();
        for i in 0..4 {
            f.queue
                .enqueue(item(project_id, &format!("cv-{i}")))
                .await
                .unwrap();
        }

        let status = f.queue.status(project_id).unwrap();
        assert_eq!(status.processed, 0);
        assert_eq!(status.estimated_time_remaining, models::ETA_CALCULATING);
        assert!(status.is_processing);

        // jitter (<= 1.5s) + 5s analysis finishes the first item well before 8s.
        sleep(Duration::from_secs(8)).await;
        let status = f.queue.status(project_id).unwrap();
        assert_eq!(status.processed, 1);
        assert_eq!(status.remaining, 3);
        assert_eq!(status.percent_complete, 25);
        assert!(status.estimated_time_remaining.ends_with("seconds"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_clears_pending_and_lets_in_flight_finish() {
        let f = fixture(1, SlowAnalyzer::new(Duration::from_secs(3)), QueueConfig::default());
        let project_id = Uuid::new_v4();
        for i in 0..5 {
            f.queue
                .enqueue(item(project_id, &format!("cv-{i}")))
                .await
                .unwrap();
        }

        // First item is in flight.
        sleep(Duration::from_secs(2)).await;
        assert_eq!(f.queue.cancel(project_id), Some(4));
        assert!(f.queue.status(project_id).is_none());

        settle().await;
        assert_eq!(f.repository.analysis_count(), 1);
        assert_eq!(f.analyzer.seen(), vec!["cv-0"]);
        let cancelled = f.events.payloads_named(project_id, "queue_cancelled");
        assert_eq!(cancelled[0]["cleared"], 4);
        assert!(f.queue.cancel(project_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_after_cancel_is_a_new_instance() {
        let f = fixture(1, SlowAnalyzer::new(Duration::from_secs(3)), QueueConfig::default());
        let project_id = Uuid::new_v4();
        f.queue.enqueue(item(project_id, "old-0")).await.unwrap();
        f.queue.enqueue(item(project_id, "old-1")).await.unwrap();
        sleep(Duration::from_secs(2)).await;
        f.queue.cancel(project_id);

        let status = f.queue.enqueue(item(project_id, "new-0")).await.unwrap();
        assert_eq!(status.total, 1);

        settle().await;
        assert_eq!(f.analyzer.seen(), vec!["old-0", "new-0"]);
        assert!(f.queue.status(project_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_update_evicts_drained_queue() {
        let f = fixture(1, SlowAnalyzer::new(Duration::ZERO), QueueConfig::default());
        let project_id = Uuid::new_v4();
        {
            let mut registry = f.queue.lock();
            let mut queue = ProjectQueue::new(7, 1);
            queue.total = 2;
            queue.processed = 2;
            registry.queues.insert(project_id, queue);
        }

        f.queue.emit_queue_update(project_id, false);
        assert!(f.queue.status(project_id).is_some());

        f.queue.emit_queue_update(project_id, true);
        assert!(f.queue.status(project_id).is_none());
        assert_eq!(
            f.events.names_for(project_id),
            vec!["queue_progress", "queue_progress", "queue_completed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_queue_evicted_after_grace() {
        let f = fixture(1, SlowAnalyzer::new(Duration::ZERO), QueueConfig::default());
        let project_id = Uuid::new_v4();
        {
            let mut registry = f.queue.lock();
            let mut queue = ProjectQueue::new(3, 1);
            queue.total = 4;
            queue.processed = 1;
            registry.queues.insert(project_id, queue);
        }

        f.queue.emit_queue_update(project_id, true);
        sleep(Duration::from_secs(10)).await;
        assert!(f.queue.status(project_id).is_some());

        sleep(Duration::from_secs(25)).await;
        assert!(f.queue.status(project_id).is_none());
        assert!(!f
            .events
            .names_for(project_id)
            .contains(&"queue_completed".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_eviction_skips_replaced_instance() {
        let f = fixture(1, SlowAnalyzer::new(Duration::ZERO), QueueConfig::default());
        let project_id = Uuid::new_v4();
        {
            let mut registry = f.queue.lock();
            let mut queue = ProjectQueue::new(3, 1);
            queue.total = 2;
            registry.queues.insert(project_id, queue);
        }
        f.queue.emit_queue_update(project_id, true);

        {
            let mut registry = f.queue.lock();
            let mut replacement = ProjectQueue::new(4, 1);
            replacement.total = 2;
            registry.queues.insert(project_id, replacement);
        }
        sleep(Duration::from_secs(60)).await;

        assert!(f.queue.status(project_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_idle_queue() {
        let config = QueueConfig {
            max_projects: 2,
            ..QueueConfig::default()
        };
        let f = fixture(1, SlowAnalyzer::new(Duration::from_secs(1)), config);
        let (old, newer, incoming) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        {
            let mut registry = f.queue.lock();
            registry.queues.insert(old, ProjectQueue::new(100, 1));
        }
        sleep(Duration::from_secs(1)).await;
        {
            let mut registry = f.queue.lock();
            registry.queues.insert(newer, ProjectQueue::new(101, 1));
        }

        f.queue.enqueue(item(incoming, "cv")).await.unwrap();

        assert!(f.queue.status(old).is_none());
        assert!(f.queue.status(newer).is_some());
        assert!(f.queue.status(incoming).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_admits_over_limit_when_all_processing() {
        let config = QueueConfig {
            max_projects: 1,
            ..QueueConfig::default()
        };
        let f = fixture(1, SlowAnalyzer::new(Duration::from_secs(5)), config);
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        f.queue.enqueue(item(first, "cv-a")).await.unwrap();
        f.queue.enqueue(item(second, "cv-b")).await.unwrap();

        assert_eq!(f.queue.project_count(), 2);
        settle().await;
        assert_eq!(f.repository.analysis_count(), 2);
    }
}
