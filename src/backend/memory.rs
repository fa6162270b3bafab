use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::info;
use vivid_worker_job::{BackoffType, Job, JobKind, JobSpec};

use super::{CleanupTask, QueueBackend};
use crate::errors::Result;
use crate::sql::get_job::LOST_WORKER_ERROR;

/// Capacity of the insert notification channel. Lagging listeners only
/// lose wake-ups, polling still finds their jobs.
const NOTIFY_CAPACITY: usize = 256;

/// Locks held longer than this are treated as abandoned.
const STALE_LOCK_HOURS: i64 = 4;

/// Process-local backend keeping jobs in memory.
///
/// Gives the same dispatch guarantees as [`PgBackend`](super::PgBackend)
/// within one process, but nothing survives a restart. Meant for tests
/// and embedding.
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<MemoryState>,
    inserted: broadcast::Sender<JobKind>,
}

#[derive(Default)]
struct MemoryState {
    last_id: i64,
    jobs: BTreeMap<i64, StoredJob>,
}

#[derive(Clone)]
struct StoredJob {
    id: i64,
    kind: JobKind,
    task_identifier: String,
    payload: Value,
    progress: i16,
    result: Option<Value>,
    run_at: DateTime<Utc>,
    attempts: i16,
    max_attempts: i16,
    backoff_type: BackoffType,
    backoff_delay_ms: i64,
    last_error: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredJob {
    fn to_job(&self) -> Job {
        Job::builder()
            .id(self.id)
            .kind(self.kind)
            .task_identifier(self.task_identifier.clone())
            .payload(self.payload.clone())
            .progress(self.progress)
            .result(self.result.clone())
            .run_at(self.run_at)
            .attempts(self.attempts)
            .max_attempts(self.max_attempts)
            .backoff_type(self.backoff_type)
            .backoff_delay_ms(self.backoff_delay_ms)
            .last_error(self.last_error.clone())
            .locked_at(self.locked_at)
            .locked_by(self.locked_by.clone())
            .completed_at(self.completed_at)
            .failed_at(self.failed_at)
            .created_at(self.created_at)
            .updated_at(self.updated_at)
            .build()
    }

    fn is_terminal(&self) -> bool {
        self.completed_at.is_some() || self.failed_at.is_some()
    }

    fn has_stale_lock(&self, now: DateTime<Utc>) -> bool {
        self.locked_at
            .is_some_and(|locked_at| locked_at < now - ChronoDuration::hours(STALE_LOCK_HOURS))
    }

    fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        let lock_is_free = self.locked_at.is_none() || self.has_stale_lock(now);
        !self.is_terminal()
            && self.attempts < self.max_attempts
            && lock_is_free
            && self.run_at <= now
    }

    /// Abandoned by a crashed worker with no attempt left to retry it.
    fn is_lost(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.attempts >= self.max_attempts && self.has_stale_lock(now)
    }

    fn is_locked_by(&self, worker_id: &str) -> bool {
        self.locked_by.as_deref() == Some(worker_id)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (inserted, _) = broadcast::channel(NOTIFY_CAPACITY);
        InMemoryBackend {
            inner: Arc::new(Inner {
                state: Mutex::new(MemoryState::default()),
                inserted,
            }),
        }
    }

    /// Snapshot of every stored job, ordered by id.
    pub async fn jobs(&self) -> Vec<Job> {
        let state = self.inner.state.lock().await;
        state.jobs.values().map(StoredJob::to_job).collect()
    }

    /// Makes every waiting job of `kind` runnable immediately, skipping
    /// scheduled starts and backoff delays.
    pub async fn make_jobs_run_now(&self, kind: JobKind) {
        let now = Utc::now();
        let mut state = self.inner.state.lock().await;
        for job in state.jobs.values_mut() {
            if job.kind == kind && !job.is_terminal() && job.locked_by.is_none() {
                job.run_at = now;
                job.touch();
            }
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        InMemoryBackend::new()
    }
}

impl QueueBackend for InMemoryBackend {
    async fn add_job(
        &self,
        kind: JobKind,
        task_identifier: &str,
        payload: Value,
        spec: JobSpec,
    ) -> Result<Job> {
        let policy = spec.resolve(kind.retry_policy());
        let now = Utc::now();

        let job = {
            let mut state = self.inner.state.lock().await;
            state.last_id += 1;
            let stored = StoredJob {
                id: state.last_id,
                kind,
                task_identifier: task_identifier.to_string(),
                payload,
                progress: 0,
                result: None,
                run_at: spec.run_at().unwrap_or(now),
                attempts: 0,
                max_attempts: policy.max_attempts,
                backoff_type: policy.backoff.backoff_type(),
                backoff_delay_ms: policy.backoff.base_delay().as_millis() as i64,
                last_error: None,
                locked_at: None,
                locked_by: None,
                completed_at: None,
                failed_at: None,
                created_at: now,
                updated_at: now,
            };
            let job = stored.to_job();
            state.jobs.insert(stored.id, stored);
            job
        };

        // No receiver simply means no worker is listening yet
        let _ = self.inner.inserted.send(kind);

        info!(queue = %kind, job_id = job.id(), task_identifier, "Job added to queue");
        Ok(job)
    }

    async fn get_job(
        &self,
        kind: JobKind,
        task_identifiers: &[String],
        worker_id: &str,
    ) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut state = self.inner.state.lock().await;

        for job in state.jobs.values_mut() {
            if job.kind == kind && job.is_lost(now) {
                job.failed_at = Some(now);
                job.last_error = Some(LOST_WORKER_ERROR.to_string());
                job.locked_by = None;
                job.locked_at = None;
                job.touch();
            }
        }

        let next = state
            .jobs
            .values_mut()
            .filter(|job| {
                job.kind == kind
                    && task_identifiers.contains(&job.task_identifier)
                    && job.is_runnable(now)
            })
            .min_by_key(|job| (job.run_at, job.id));

        Ok(next.map(|job| {
            job.attempts += 1;
            job.progress = 0;
            job.locked_by = Some(worker_id.to_string());
            job.locked_at = Some(now);
            job.touch();
            job.to_job()
        }))
    }

    async fn find_job(&self, kind: JobKind, job_id: i64) -> Result<Option<Job>> {
        let state = self.inner.state.lock().await;
        Ok(state
            .jobs
            .get(&job_id)
            .filter(|job| job.kind == kind)
            .map(StoredJob::to_job))
    }

    async fn update_progress(&self, job: &Job, worker_id: &str, progress: u8) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(job.id()) {
            Some(stored) if stored.is_locked_by(worker_id) => {
                stored.progress = stored.progress.max(i16::from(progress.min(100)));
                stored.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_job(&self, job: &Job, worker_id: &str, result: &Value) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(job.id()) {
            Some(stored) if stored.is_locked_by(worker_id) => {
                stored.completed_at = Some(Utc::now());
                stored.progress = 100;
                stored.result = Some(result.clone());
                stored.locked_by = None;
                stored.locked_at = None;
                stored.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_job(&self, job: &Job, worker_id: &str, message: &str) -> Result<bool> {
        let retry_delay = job.backoff().delay_for_attempt(*job.attempts());
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(job.id()) {
            Some(stored) if stored.is_locked_by(worker_id) => {
                let now = Utc::now();
                stored.last_error = Some(message.to_string());
                if stored.attempts >= stored.max_attempts {
                    stored.failed_at = Some(now);
                } else {
                    stored.run_at = ChronoDuration::from_std(retry_delay)
                        .ok()
                        .and_then(|delay| now.checked_add_signed(delay))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                }
                stored.locked_by = None;
                stored.locked_at = None;
                stored.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_job(&self, kind: JobKind, job_id: i64) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let removable = state
            .jobs
            .get(&job_id)
            .is_some_and(|job| job.kind == kind && !job.is_terminal());
        if removable {
            state.jobs.remove(&job_id);
        }
        Ok(removable)
    }

    async fn cleanup(&self, tasks: &[CleanupTask], kind: Option<JobKind>) -> Result<u64> {
        let mut state = self.inner.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            let in_scope = kind.is_none_or(|kind| job.kind == kind);
            let doomed = tasks
                .iter()
                .any(|task| task.matches(job.completed_at.is_some(), job.failed_at.is_some()));
            !(in_scope && doomed)
        });
        Ok((before - state.jobs.len()) as u64)
    }

    async fn listen(&self, kind: JobKind) -> Result<BoxStream<'static, ()>> {
        let receiver = self.inner.inserted.subscribe();
        let stream = stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(inserted) if inserted == kind => return Some(((), receiver)),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => return Some(((), receiver)),
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use vivid_worker_job::{Backoff, JobSpecBuilder, JobState};

    use super::*;

    fn send() -> Vec<String> {
        vec!["send".to_string()]
    }

    #[tokio::test]
    async fn dispatch_is_fifo_and_exclusive() {
        let backend = InMemoryBackend::new();
        let first = backend
            .add_job(JobKind::Email, "send", json!({ "n": 1 }), JobSpec::default())
            .await
            .unwrap();
        let second = backend
            .add_job(JobKind::Email, "send", json!({ "n": 2 }), JobSpec::default())
            .await
            .unwrap();

        let a = backend.get_job(JobKind::Email, &send(), "a").await.unwrap().unwrap();
        let b = backend.get_job(JobKind::Email, &send(), "b").await.unwrap().unwrap();
        assert_eq!(a.id(), first.id());
        assert_eq!(b.id(), second.id());
        assert!(backend.get_job(JobKind::Email, &send(), "c").await.unwrap().is_none());
        assert_eq!(a.state(), JobState::Active);
        assert_eq!(*a.attempts(), 1);
    }

    #[tokio::test]
    async fn other_queues_and_tags_are_not_dispatched() {
        let backend = InMemoryBackend::new();
        backend
            .add_job(JobKind::Email, "digest", json!({}), JobSpec::default())
            .await
            .unwrap();
        backend
            .add_job(JobKind::Webhook, "send", json!({}), JobSpec::default())
            .await
            .unwrap();

        assert!(backend.get_job(JobKind::Email, &send(), "w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_the_lock_owner_can_release() {
        let backend = InMemoryBackend::new();
        backend
            .add_job(JobKind::Email, "send", json!({}), JobSpec::default())
            .await
            .unwrap();
        let job = backend.get_job(JobKind::Email, &send(), "owner").await.unwrap().unwrap();

        assert!(!backend.complete_job(&job, "intruder", &json!(1)).await.unwrap());
        assert!(!backend.update_progress(&job, "intruder", 50).await.unwrap());
        assert!(backend.update_progress(&job, "owner", 50).await.unwrap());
        assert!(backend.complete_job(&job, "owner", &json!(1)).await.unwrap());
    }

    #[tokio::test]
    async fn progress_never_decreases_within_an_attempt() {
        let backend = InMemoryBackend::new();
        let added = backend
            .add_job(JobKind::ImageGeneration, "generate", json!({}), JobSpec::default())
            .await
            .unwrap();
        let generate = vec!["generate".to_string()];
        let job = backend
            .get_job(JobKind::ImageGeneration, &generate, "w")
            .await
            .unwrap()
            .unwrap();

        backend.update_progress(&job, "w", 50).await.unwrap();
        backend.update_progress(&job, "w", 10).await.unwrap();
        let stored = backend
            .find_job(JobKind::ImageGeneration, *added.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*stored.progress(), 50);
    }

    #[tokio::test]
    async fn failure_schedules_retry_then_fails_for_good() {
        let backend = InMemoryBackend::new();
        let spec = JobSpecBuilder::new()
            .max_attempts(2)
            .backoff(Backoff::Fixed(Duration::from_secs(60)))
            .build();
        let added = backend
            .add_job(JobKind::Email, "send", json!({}), spec)
            .await
            .unwrap();

        let job = backend.get_job(JobKind::Email, &send(), "w").await.unwrap().unwrap();
        assert!(backend.fail_job(&job, "w", "smtp down").await.unwrap());
        let stored = backend.find_job(JobKind::Email, *added.id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Waiting);
        assert!(*stored.run_at() > Utc::now() + ChronoDuration::seconds(50));
        assert!(backend.get_job(JobKind::Email, &send(), "w").await.unwrap().is_none());

        backend.make_jobs_run_now(JobKind::Email).await;
        let job = backend.get_job(JobKind::Email, &send(), "w").await.unwrap().unwrap();
        backend.fail_job(&job, "w", "smtp still down").await.unwrap();
        let stored = backend.find_job(JobKind::Email, *added.id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Failed);
        assert_eq!(stored.last_error().as_deref(), Some("smtp still down"));
    }

    #[tokio::test]
    async fn terminal_jobs_cannot_be_removed() {
        let backend = InMemoryBackend::new();
        let added = backend
            .add_job(JobKind::Training, "train", json!({}), JobSpec::default())
            .await
            .unwrap();
        let train = vec!["train".to_string()];
        let job = backend.get_job(JobKind::Training, &train, "w").await.unwrap().unwrap();
        backend.complete_job(&job, "w", &json!({})).await.unwrap();

        assert!(!backend.remove_job(JobKind::Training, *added.id()).await.unwrap());
        assert!(!backend.remove_job(JobKind::Training, 999).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_deletes_terminal_jobs_only() {
        let backend = InMemoryBackend::new();
        for _ in 0..2 {
            backend
                .add_job(JobKind::Email, "send", json!({}), JobSpec::default())
                .await
                .unwrap();
        }
        let job = backend.get_job(JobKind::Email, &send(), "w").await.unwrap().unwrap();
        backend.complete_job(&job, "w", &json!({})).await.unwrap();

        let deleted = backend
            .cleanup(&[CleanupTask::DeleteCompletedJobs], Some(JobKind::Email))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(backend.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn listeners_wake_on_their_queue_only() {
        let backend = InMemoryBackend::new();
        let mut email = backend.listen(JobKind::Email).await.unwrap();

        backend
            .add_job(JobKind::Webhook, "process", json!({}), JobSpec::default())
            .await
            .unwrap();
        backend
            .add_job(JobKind::Email, "send", json!({}), JobSpec::default())
            .await
            .unwrap();

        assert_eq!(email.next().await, Some(()));
    }

    async fn abandon(backend: &InMemoryBackend, job_id: i64) {
        let mut state = backend.inner.state.lock().await;
        let stored = state.jobs.get_mut(&job_id).unwrap();
        stored.locked_at = Some(Utc::now() - ChronoDuration::hours(5));
    }

    #[tokio::test]
    async fn stale_lock_with_attempts_left_is_reclaimed() {
        let backend = InMemoryBackend::new();
        let spec = JobSpecBuilder::new().max_attempts(2).build();
        let added = backend.add_job(JobKind::Email, "send", json!({}), spec).await.unwrap();

        backend.get_job(JobKind::Email, &send(), "crashed").await.unwrap().unwrap();
        assert!(backend.get_job(JobKind::Email, &send(), "other").await.unwrap().is_none());

        abandon(&backend, *added.id()).await;
        let job = backend.get_job(JobKind::Email, &send(), "other").await.unwrap().unwrap();
        assert_eq!(*job.attempts(), 2);
        assert_eq!(job.locked_by().as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn stale_lock_on_last_attempt_fails_the_job() {
        let backend = InMemoryBackend::new();
        let spec = JobSpecBuilder::new().max_attempts(1).build();
        let added = backend.add_job(JobKind::Email, "send", json!({}), spec).await.unwrap();

        backend.get_job(JobKind::Email, &send(), "crashed").await.unwrap().unwrap();
        abandon(&backend, *added.id()).await;

        assert!(backend.get_job(JobKind::Email, &send(), "other").await.unwrap().is_none());
        let stored = backend.find_job(JobKind::Email, *added.id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Failed);
        assert_eq!(*stored.attempts(), 1);
        assert_eq!(stored.last_error().as_deref(), Some(LOST_WORKER_ERROR));
        assert!(!backend.complete_job(&stored, "crashed", &json!(1)).await.unwrap());
    }
}
