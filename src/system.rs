use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use getset::Getters;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vivid_worker_job::JobKind;

use crate::backend::QueueBackend;
use crate::builder::WorkerOptions;
use crate::collaborators::{
    CharacterStore, GenerationStore, ImageGenerator, Mailer, ModelTrainer, WebhookTransport,
};
use crate::control::JobControl;
use crate::processors::{
    EmailProcessor, ImageGenerationProcessor, TrainingProcessor, WebhookProcessor,
};
use crate::runner::{Worker, WorkerRuntimeError};
use crate::shutdown::ShutdownSignal;
use crate::submit::JobSubmitter;

type Registration = Box<dyn FnOnce(WorkerOptions) -> WorkerOptions + Send>;

#[derive(Error, Debug)]
pub enum JobSystemError {
    #[error("No processor registered for queue '{0}'")]
    MissingProcessor(JobKind),
}

/// The job layer wired together: one backend, the two facades and one
/// worker per served queue.
///
/// ```no_run
/// use vivid_worker::collaborators::simulated::*;
/// use vivid_worker::{InMemoryBackend, JobSystem, ReqwestWebhookTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let system = JobSystem::builder(InMemoryBackend::new())
///     .image_generation_processor(SimulatedImageGenerator::default(), LoggingStore)
///     .training_processor(SimulatedModelTrainer::default(), LoggingStore)
///     .email_processor(SimulatedMailer::default())
///     .webhook_processor(ReqwestWebhookTransport::new()?)
///     .build()?;
///
/// system.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Getters)]
#[getset(get = "pub")]
pub struct JobSystem<B: QueueBackend> {
    submitter: JobSubmitter<B>,
    control: JobControl<B>,
    workers: Vec<Worker<B>>,
    #[getset(skip)]
    shutdown_token: CancellationToken,
}

impl<B: QueueBackend> JobSystem<B> {
    pub fn builder(backend: B) -> JobSystemBuilder<B> {
        JobSystemBuilder::new(backend)
    }

    pub fn worker(&self, kind: JobKind) -> Option<&Worker<B>> {
        self.workers.iter().find(|worker| *worker.kind() == kind)
    }

    /// Runs every worker until shutdown. The first worker error stops the
    /// whole system.
    pub async fn run(&self) -> Result<(), WorkerRuntimeError> {
        let queues: Vec<&str> = self.workers.iter().map(|w| w.kind().queue_name()).collect();
        info!(?queues, "Starting workers");

        let result = try_join_all(self.workers.iter().map(|worker| worker.run())).await;
        if result.is_err() {
            self.request_shutdown();
        }
        result.map(|_| ())
    }

    /// Processes what every queue holds right now, then returns.
    pub async fn run_once(&self) -> Result<(), WorkerRuntimeError> {
        join_all(self.workers.iter().map(|worker| worker.run_once()))
            .await
            .into_iter()
            .collect()
    }

    pub fn request_shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

/// Registers the processor of each kind and the worker settings.
pub struct JobSystemBuilder<B: QueueBackend> {
    backend: B,
    registrations: BTreeMap<JobKind, Registration>,
    queues: BTreeSet<JobKind>,
    concurrency: BTreeMap<JobKind, usize>,
    poll_interval: Option<Duration>,
    shutdown_signal: Option<ShutdownSignal>,
    worker_id_prefix: Option<String>,
}

impl<B: QueueBackend> JobSystemBuilder<B> {
    pub fn new(backend: B) -> Self {
        JobSystemBuilder {
            backend,
            registrations: BTreeMap::new(),
            queues: JobKind::ALL.into_iter().collect(),
            concurrency: BTreeMap::new(),
            poll_interval: None,
            shutdown_signal: None,
            worker_id_prefix: None,
        }
    }

    pub fn image_generation_processor<G, S>(self, generator: G, store: S) -> Self
    where
        G: ImageGenerator,
        S: GenerationStore,
    {
        let processor = ImageGenerationProcessor::new(generator, store);
        self.register(JobKind::ImageGeneration, move |o| o.define_job(processor))
    }

    pub fn training_processor<T, S>(self, trainer: T, store: S) -> Self
    where
        T: ModelTrainer,
        S: CharacterStore,
    {
        let processor = TrainingProcessor::new(trainer, store);
        self.register(JobKind::Training, move |o| o.define_job(processor))
    }

    pub fn email_processor<M: Mailer>(self, mailer: M) -> Self {
        let processor = EmailProcessor::new(mailer);
        self.register(JobKind::Email, move |o| o.define_job(processor))
    }

    pub fn webhook_processor<T: WebhookTransport>(self, transport: T) -> Self {
        let processor = WebhookProcessor::new(transport);
        self.register(JobKind::Webhook, move |o| o.define_job(processor))
    }

    /// Only runs workers for `queues`. Defaults to all four.
    /// Submission and status work for every queue regardless.
    pub fn queues(mut self, queues: impl IntoIterator<Item = JobKind>) -> Self {
        self.queues = queues.into_iter().collect();
        self
    }

    /// Defaults to 1 for every queue.
    ///
    /// # Panics
    /// Panics if the value is 0.
    pub fn concurrency(mut self, kind: JobKind, value: usize) -> Self {
        assert!(value > 0, "Concurrency must be greater than 0");
        self.concurrency.insert(kind, value);
        self
    }

    /// Defaults to 1 second for every queue.
    ///
    /// # Panics
    /// Panics if the value is zero.
    pub fn poll_interval(mut self, value: Duration) -> Self {
        assert!(!value.is_zero(), "Poll interval must be greater than 0");
        self.poll_interval = Some(value);
        self
    }

    pub fn shutdown_signal(mut self, value: ShutdownSignal) -> Self {
        self.shutdown_signal = Some(value);
        self
    }

    pub fn worker_id_prefix(mut self, value: &str) -> Self {
        self.worker_id_prefix = Some(value.into());
        self
    }

    /// Fails when a served queue has no processor.
    pub fn build(mut self) -> Result<JobSystem<B>, JobSystemError> {
        let shutdown_token = CancellationToken::new();
        let mut workers = Vec::with_capacity(self.queues.len());

        for kind in self.queues.iter().copied() {
            let register = self
                .registrations
                .remove(&kind)
                .ok_or(JobSystemError::MissingProcessor(kind))?;

            let mut options = WorkerOptions::default()
                .concurrency(self.concurrency.get(&kind).copied().unwrap_or(1));
            if let Some(poll_interval) = self.poll_interval {
                options = options.poll_interval(poll_interval);
            }
            if let Some(signal) = &self.shutdown_signal {
                options = options.shutdown_signal(signal.clone());
            }
            if let Some(prefix) = &self.worker_id_prefix {
                options = options.worker_id_prefix(prefix);
            }
            options = options.shutdown_token(shutdown_token.clone());

            workers.push(register(options).init(self.backend.clone(), kind));
        }

        Ok(JobSystem {
            submitter: JobSubmitter::new(self.backend.clone()),
            control: JobControl::new(self.backend),
            workers,
            shutdown_token,
        })
    }

    fn register(
        mut self,
        kind: JobKind,
        registration: impl FnOnce(WorkerOptions) -> WorkerOptions + Send + 'static,
    ) -> Self {
        self.registrations.insert(kind, Box::new(registration));
        self
    }
}
