use tracing::{debug, info};
use vivid_worker_job::{JobKind, JobStatus};

use crate::backend::{CleanupTask, QueueBackend};
use crate::errors::{Result, VividWorkerError};

/// Status lookups and cancellation across the four queues.
///
/// Queues are addressed by name (`image-generation`, `training`, `email`,
/// `webhooks`) and job ids are the strings returned at submission.
#[derive(Clone)]
pub struct JobControl<B: QueueBackend> {
    backend: B,
}

impl<B: QueueBackend> JobControl<B> {
    pub fn new(backend: B) -> Self {
        JobControl { backend }
    }

    /// Fails with `UnknownQueue` for a queue name that is not one of the
    /// four queues and with `JobNotFound` when the queue holds no such job.
    pub async fn get_job_status(&self, queue_name: &str, job_id: &str) -> Result<JobStatus> {
        let kind = JobKind::from_queue_name(queue_name)?;
        let not_found = || VividWorkerError::JobNotFound {
            queue: queue_name.to_string(),
            job_id: job_id.to_string(),
        };

        let id = job_id.parse::<i64>().map_err(|_| not_found())?;
        self.get_job_status_for(kind, id).await?.ok_or_else(not_found)
    }

    pub async fn get_job_status_for(&self, kind: JobKind, job_id: i64) -> Result<Option<JobStatus>> {
        let job = self.backend.find_job(kind, job_id).await?;
        Ok(job.map(JobStatus::from))
    }

    /// Removes a waiting or active job of a cancellable kind.
    ///
    /// Cancelling a job that is gone or already finished does nothing.
    /// Email and webhook jobs cannot be cancelled, asking to is an error.
    pub async fn cancel_job(&self, queue_name: &str, job_id: &str) -> Result<()> {
        let kind = JobKind::from_queue_name(queue_name)?;
        if !kind.is_cancellable() {
            return Err(VividWorkerError::CannotCancel(queue_name.to_string()));
        }

        let Ok(id) = job_id.parse::<i64>() else {
            debug!(queue = %kind, job_id, "Nothing to cancel, job id is not a valid id");
            return Ok(());
        };

        if self.backend.remove_job(kind, id).await? {
            info!(queue = %kind, job_id = id, "Job cancelled");
        } else {
            debug!(queue = %kind, job_id = id, "Nothing to cancel, job is gone or finished");
        }

        Ok(())
    }

    /// Runs housekeeping, restricted to `kind`'s queue when given.
    /// Returns the number of deleted jobs.
    pub async fn cleanup(&self, tasks: &[CleanupTask], kind: Option<JobKind>) -> Result<u64> {
        let deleted = self.backend.cleanup(tasks, kind).await?;
        info!(?tasks, queue = ?kind.map(JobKind::queue_name), deleted, "Cleanup done");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vivid_worker_job::{JobSpec, JobState};

    use super::*;
    use crate::backend::InMemoryBackend;

    async fn add(backend: &InMemoryBackend, kind: JobKind) -> String {
        backend
            .add_job(kind, kind.task_identifier(), json!({}), JobSpec::default())
            .await
            .unwrap()
            .id()
            .to_string()
    }

    #[tokio::test]
    async fn status_of_a_fresh_job() {
        let backend = InMemoryBackend::new();
        let control = JobControl::new(backend.clone());
        let id = add(&backend, JobKind::Training).await;

        let status = control.get_job_status("training", &id).await.unwrap();

        assert_eq!(status.id, id);
        assert_eq!(status.status, JobState::Waiting);
        assert_eq!(status.progress, 0);
        assert_eq!(status.result, None);
    }

    #[tokio::test]
    async fn job_is_only_found_in_its_own_queue() {
        let backend = InMemoryBackend::new();
        let control = JobControl::new(backend.clone());
        let id = add(&backend, JobKind::Training).await;

        let err = control.get_job_status("email", &id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn malformed_id_is_not_found() {
        let control = JobControl::new(InMemoryBackend::new());

        let err = control.get_job_status("webhooks", "abc").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn unknown_queue_is_rejected_before_lookup() {
        let control = JobControl::new(InMemoryBackend::new());

        let err = control.get_job_status("videos", "1").await.unwrap_err();
        assert!(matches!(err, VividWorkerError::UnknownQueue(q) if q == "videos"));

        let err = control.cancel_job("videos", "1").await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn cancelling_twice_is_fine() {
        let backend = InMemoryBackend::new();
        let control = JobControl::new(backend.clone());
        let id = add(&backend, JobKind::ImageGeneration).await;

        control.cancel_job("image-generation", &id).await.unwrap();
        control.cancel_job("image-generation", &id).await.unwrap();
        control.cancel_job("image-generation", "not-an-id").await.unwrap();

        assert!(backend.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn email_and_webhook_jobs_cannot_be_cancelled() {
        let backend = InMemoryBackend::new();
        let control = JobControl::new(backend.clone());

        for kind in [JobKind::Email, JobKind::Webhook] {
            let id = add(&backend, kind).await;
            let err = control.cancel_job(kind.queue_name(), &id).await.unwrap_err();
            assert!(matches!(err, VividWorkerError::CannotCancel(_)));
            assert!(control.get_job_status(kind.queue_name(), &id).await.is_ok());
        }
    }
}
