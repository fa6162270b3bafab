use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use getset::Getters;
use thiserror::Error;
use vivid_worker_job::Job;

use crate::backend::ProgressReporter;
use crate::errors::VividWorkerError;

#[derive(Error, Debug)]
pub enum ProgressError {
    /// The job was cancelled while it was running
    #[error("Job '{0}' was removed while running")]
    JobRemoved(i64),
    #[error("Failed to report progress: {0}")]
    Backend(#[from] VividWorkerError),
}

/// Handed to a task handler for each attempt it runs.
#[derive(Getters, Clone)]
pub struct JobContext {
    /// The job as it was when the attempt started
    #[getset(get = "pub")]
    job: Arc<Job>,
    #[getset(get = "pub")]
    worker_id: String,
    reporter: Arc<dyn ProgressReporter>,
    removed: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(job: Arc<Job>, worker_id: String, reporter: Arc<dyn ProgressReporter>) -> Self {
        JobContext {
            job,
            worker_id,
            reporter,
            removed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn job_id(&self) -> i64 {
        *self.job.id()
    }

    /// Reports how far the attempt got, from 0 to 100.
    ///
    /// Fails with [`ProgressError::JobRemoved`] when the job no longer
    /// belongs to this attempt, the handler should stop at that point.
    pub async fn update_progress(&self, progress: u8) -> Result<(), ProgressError> {
        let owned = self
            .reporter
            .report_progress(&self.job, &self.worker_id, progress)
            .await?;

        if !owned {
            self.removed.store(true, Ordering::SeqCst);
            return Err(ProgressError::JobRemoved(self.job_id()));
        }

        Ok(())
    }

    /// Whether a progress report found the job gone.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vivid_worker_job::{JobKind, JobSpec};

    use super::*;
    use crate::backend::{InMemoryBackend, QueueBackend};

    async fn running_job(backend: &InMemoryBackend) -> JobContext {
        backend
            .add_job(JobKind::Training, "train", json!({}), JobSpec::default())
            .await
            .unwrap();
        let job = backend
            .get_job(JobKind::Training, &["train".to_string()], "worker")
            .await
            .unwrap()
            .unwrap();
        JobContext::new(Arc::new(job), "worker".into(), Arc::new(backend.clone()))
    }

    #[tokio::test]
    async fn progress_reaches_the_backend() {
        let backend = InMemoryBackend::new();
        let ctx = running_job(&backend).await;

        ctx.update_progress(25).await.unwrap();

        let job = backend
            .find_job(JobKind::Training, ctx.job_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*job.progress(), 25);
        assert!(!ctx.is_removed());
    }

    #[tokio::test]
    async fn removal_is_detected_on_next_report() {
        let backend = InMemoryBackend::new();
        let ctx = running_job(&backend).await;

        backend
            .remove_job(JobKind::Training, ctx.job_id())
            .await
            .unwrap();

        assert!(matches!(
            ctx.update_progress(75).await,
            Err(ProgressError::JobRemoved(_))
        ));
        assert!(ctx.is_removed());
    }
}
