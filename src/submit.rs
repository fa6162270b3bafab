use serde_json::Value;
use tracing::info;
use validator::Validate;
use vivid_worker_job::{
    EmailPayload, ImageGenerationPayload, Job, JobKind, JobPayload, JobSpec, KindPayload,
    TrainingPayload, WebhookPayload,
};
use vivid_worker_task_handler::TaskHandler;

use crate::backend::QueueBackend;
use crate::context::JobContext;
use crate::errors::Result;

/// Entry point for enqueueing work.
///
/// Every job lands on its kind's queue with the kind's retry policy unless
/// a [`JobSpec`] overrides it. Payloads are validated first, and a rejected
/// payload never reaches the queue.
#[derive(Clone)]
pub struct JobSubmitter<B: QueueBackend> {
    backend: B,
}

impl<B: QueueBackend> JobSubmitter<B> {
    pub fn new(backend: B) -> Self {
        JobSubmitter { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the id of the created job.
    pub async fn submit_image_generation_job(&self, payload: ImageGenerationPayload) -> Result<String> {
        self.submit_payload(payload, JobSpec::default()).await
    }

    pub async fn submit_training_job(&self, payload: TrainingPayload) -> Result<String> {
        self.submit_payload(payload, JobSpec::default()).await
    }

    pub async fn submit_email_job(&self, payload: EmailPayload) -> Result<String> {
        self.submit_payload(payload, JobSpec::default()).await
    }

    pub async fn submit_webhook_job(&self, payload: WebhookPayload) -> Result<String> {
        self.submit_payload(payload, JobSpec::default()).await
    }

    /// Submits any payload, dispatching on its kind.
    pub async fn submit(&self, payload: JobPayload, spec: JobSpec) -> Result<String> {
        payload.validate()?;
        let kind = payload.kind();
        let job = self
            .backend
            .add_job(kind, kind.task_identifier(), payload.to_value()?, spec)
            .await?;
        Ok(job.id().to_string())
    }

    /// Enqueues a job for the handler `H` on the queue of its payload's kind.
    pub async fn add_job<H>(&self, payload: H::Payload, spec: JobSpec) -> Result<Job>
    where
        H: TaskHandler<JobContext>,
        H::Payload: KindPayload,
    {
        payload.validate()?;
        let payload = serde_json::to_value(payload)?;
        self.add_raw_job(<H::Payload as KindPayload>::KIND, H::IDENTIFIER, payload, spec)
            .await
    }

    /// Enqueues an unchecked payload under any name tag. Only workers that
    /// registered `task_identifier` will pick it up.
    pub async fn add_raw_job(
        &self,
        kind: JobKind,
        task_identifier: &str,
        payload: Value,
        spec: JobSpec,
    ) -> Result<Job> {
        let job = self
            .backend
            .add_job(kind, task_identifier, payload, spec)
            .await?;
        info!(queue = %kind, job_id = job.id(), task_identifier, "Job submitted");
        Ok(job)
    }

    async fn submit_payload<P: KindPayload>(&self, payload: P, spec: JobSpec) -> Result<String> {
        payload.validate()?;
        let payload = serde_json::to_value(payload)?;
        let job = self
            .backend
            .add_job(P::KIND, P::KIND.task_identifier(), payload, spec)
            .await?;
        Ok(job.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::errors::VividWorkerError;

    fn email(to: &str) -> EmailPayload {
        EmailPayload {
            to: to.into(),
            subject: "Welcome".into(),
            template: "welcome".into(),
            data: Map::new(),
        }
    }

    #[tokio::test]
    async fn submission_uses_kind_queue_and_policy() {
        let backend = InMemoryBackend::new();
        let submitter = JobSubmitter::new(backend.clone());

        let id = submitter
            .submit_email_job(email("ada@example.com"))
            .await
            .unwrap();

        let job = backend
            .find_job(JobKind::Email, id.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.kind(), &JobKind::Email);
        assert_eq!(job.task_identifier(), "send");
        assert_eq!(*job.max_attempts(), 5);
        assert_eq!(job.backoff(), JobKind::Email.retry_policy().backoff);
        assert_eq!(job.payload()["to"], json!("ada@example.com"));
    }

    #[tokio::test]
    async fn invalid_payload_creates_no_job() {
        let backend = InMemoryBackend::new();
        let submitter = JobSubmitter::new(backend.clone());

        let err = submitter
            .submit_email_job(email("not an address"))
            .await
            .unwrap_err();

        assert!(matches!(err, VividWorkerError::InvalidPayload(_)));
        assert!(backend.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn spec_overrides_policy() {
        let backend = InMemoryBackend::new();
        let submitter = JobSubmitter::new(backend.clone());

        let id = submitter
            .submit(
                JobPayload::Email(email("ada@example.com")),
                JobSpec::builder().max_attempts(1).build(),
            )
            .await
            .unwrap();

        let job = backend
            .find_job(JobKind::Email, id.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*job.max_attempts(), 1);
    }
}
