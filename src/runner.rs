use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use getset::Getters;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use vivid_worker_job::{Job, JobKind};
use vivid_worker_task_handler::{RunTaskError, SpawnTaskResult};

use crate::backend::QueueBackend;
use crate::builder::WorkerOptions;
use crate::context::JobContext;
use crate::errors::VividWorkerError;
use crate::shutdown::ShutdownSignal;
use crate::streams::{job_signal_stream, job_stream, StreamSource};

/// Type erased task handler.
///
/// Runs one attempt on its own tokio task given the job context, the raw
/// payload, a token aborting the attempt and an optional timeout.
pub type WorkerFn = Box<
    dyn Fn(
            JobContext,
            Value,
            CancellationToken,
            Option<Duration>,
        ) -> BoxFuture<'static, SpawnTaskResult<String>>
        + Send
        + Sync,
>;

/// Type erased [`TaskHandler::on_exhausted`](vivid_worker_task_handler::TaskHandler::on_exhausted).
pub type ExhaustedFn =
    Box<dyn Fn(JobContext, Value, String) -> BoxFuture<'static, bool> + Send + Sync>;

/// A handler registered under one name tag.
pub(crate) struct TaskFns {
    pub(crate) run: WorkerFn,
    pub(crate) on_exhausted: ExhaustedFn,
}

/// How long in-flight jobs may keep running once shutdown was requested.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A consumer bound to the queue of a single job kind.
///
/// Jobs are fetched when the backend notifies an insert and on every poll
/// tick, up to `concurrency` at a time.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker<B: QueueBackend> {
    pub(crate) kind: JobKind,
    pub(crate) worker_id: String,
    pub(crate) concurrency: NonZeroUsize,
    pub(crate) poll_interval: Duration,
    /// Name tags this worker runs. Jobs carrying any other tag are left untouched.
    pub(crate) task_identifiers: Vec<String>,
    #[getset(skip)]
    pub(crate) jobs: HashMap<String, TaskFns>,
    pub(crate) backend: B,
    pub(crate) shutdown_signal: ShutdownSignal,
    #[getset(skip)]
    pub(crate) shutdown_token: CancellationToken,
}

#[derive(Error, Debug)]
pub enum WorkerRuntimeError {
    #[error("Unexpected error occured while processing job : '{0}'")]
    ProcessJob(#[from] ProcessJobError),
    #[error("Failed to listen to job notifications : '{0}'")]
    Listen(#[from] VividWorkerError),
}

impl<B: QueueBackend> Worker<B> {
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }

    /// Processes jobs until the shutdown signal resolves or
    /// [`request_shutdown`](Self::request_shutdown) is called.
    ///
    /// In-flight jobs get five seconds to finish after shutdown. Past that
    /// they are aborted and recorded as failed attempts.
    pub async fn run(&self) -> Result<(), WorkerRuntimeError> {
        let listener = self.backend.listen(self.kind).await?;
        let job_signal = job_signal_stream(
            listener,
            self.poll_interval,
            self.shutdown_signal.clone(),
            self.concurrency,
        );

        info!(
            queue = %self.kind,
            worker_id = %self.worker_id,
            concurrency = self.concurrency.get(),
            "Listening for jobs..."
        );
        job_signal
            .map(Ok::<_, ProcessJobError>)
            .try_for_each_concurrent(self.concurrency.get(), |source| async move {
                if let Some(job_id) = process_one_job(self, source).await? {
                    debug!(queue = %self.kind, job_id, "Job processed");
                }
                Ok(())
            })
            .await?;

        info!(queue = %self.kind, worker_id = %self.worker_id, "Worker stopped");
        Ok(())
    }

    /// Processes every job available right now, then returns.
    ///
    /// A failing job does not stop the others.
    pub async fn run_once(&self) -> Result<(), WorkerRuntimeError> {
        let job_stream = job_stream(
            self.backend.clone(),
            self.kind,
            self.task_identifiers.clone(),
            self.worker_id.clone(),
            self.shutdown_signal.clone(),
        );

        job_stream
            .for_each_concurrent(self.concurrency.get(), |job| async move {
                let job_id = *job.id();
                match run_and_release_job(Arc::new(job), self, StreamSource::RunOnce).await {
                    Ok(_) => debug!(queue = %self.kind, job_id, "Job processed"),
                    Err(e) => error!(queue = %self.kind, job_id, error = %e, "Error while processing job"),
                }
            })
            .await;

        Ok(())
    }

    /// Stops fetching new jobs. Running jobs get the usual grace period.
    pub fn request_shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

#[derive(Error, Debug)]
pub enum ProcessJobError {
    #[error("An error occured while releasing a job : '{0}'")]
    ReleaseJobError(#[from] ReleaseJobError),
    #[error("An error occured while fetching a job to run : '{0}'")]
    GetJobError(#[from] VividWorkerError),
}

/// Fetches and runs a single job. Returns the id of the job run, if any.
async fn process_one_job<B: QueueBackend>(
    worker: &Worker<B>,
    source: StreamSource,
) -> Result<Option<i64>, ProcessJobError> {
    let job = worker
        .backend
        .get_job(worker.kind, &worker.task_identifiers, &worker.worker_id)
        .await
        .map_err(|e| {
            error!(queue = %worker.kind, error = %e, "Could not get job");
            e
        })?;

    match job {
        Some(job) => {
            let job_id = *job.id();
            run_and_release_job(Arc::new(job), worker, source).await?;
            Ok(Some(job_id))
        }
        None => {
            trace!(queue = %worker.kind, source = ?source, "No job found");
            Ok(None)
        }
    }
}

async fn run_and_release_job<B: QueueBackend>(
    job: Arc<Job>,
    worker: &Worker<B>,
    source: StreamSource,
) -> Result<(), ProcessJobError> {
    let ctx = JobContext::new(
        job.clone(),
        worker.worker_id.clone(),
        Arc::new(worker.backend.clone()),
    );

    let start = Instant::now();
    let job_result = run_job(&job, worker, ctx.clone(), source).await;
    let duration = start.elapsed();

    release_job(job_result, &job, &ctx, worker, duration)
        .await
        .map_err(|e| {
            error!(error = %e, "Release job error");
            e
        })?;
    Ok(())
}

#[derive(Error, Debug)]
enum RunJobError {
    #[error("Cannot find any task fn for given task identifier '{0}'. This is probably a bug !")]
    FnNotFound(String),
    #[error(transparent)]
    Task(#[from] RunTaskError<String>),
}

#[tracing::instrument(
    "run_job",
    skip_all,
    fields(
        queue = %worker.kind,
        job_id = job.id(),
        task_identifier = %job.task_identifier(),
        attempts = job.attempts(),
    )
)]
async fn run_job<B: QueueBackend>(
    job: &Job,
    worker: &Worker<B>,
    ctx: JobContext,
    source: StreamSource,
) -> Result<Value, RunJobError> {
    let task_fn = worker
        .jobs
        .get(job.task_identifier())
        .ok_or_else(|| RunJobError::FnNotFound(job.task_identifier().clone()))?;

    debug!(source = ?source, "Found task");

    let abort_token = CancellationToken::new();
    let task_fut = (task_fn.run)(
        ctx,
        job.payload().clone(),
        abort_token.clone(),
        worker.kind.timeout(),
    );
    tokio::pin!(task_fut);

    let shutdown_signal = worker.shutdown_signal.clone();
    let shutdown_timeout = async {
        shutdown_signal.await;
        tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
    };

    let SpawnTaskResult { duration, result } = tokio::select! {
        res = &mut task_fut => res,
        _ = shutdown_timeout => {
            warn!("Job interrupted by shutdown signal after 5 seconds timeout");
            abort_token.cancel();
            task_fut.await
        }
    };

    let value = result?;
    info!(duration = duration.as_millis(), "Completed task with success");

    Ok(value)
}

#[derive(Error, Debug)]
#[error("Failed to release job '{job_id}'. {source}")]
pub struct ReleaseJobError {
    job_id: i64,
    #[source]
    source: VividWorkerError,
}

/// Records the outcome of an attempt: completion on success, a retry or a
/// permanent failure otherwise.
///
/// Nothing is recorded for a job removed while running.
async fn release_job<B: QueueBackend>(
    job_result: Result<Value, RunJobError>,
    job: &Job,
    ctx: &JobContext,
    worker: &Worker<B>,
    duration: Duration,
) -> Result<(), ReleaseJobError> {
    let job_id = *job.id();
    let to_release_error = |source| ReleaseJobError { job_id, source };

    if ctx.is_removed() {
        info!(queue = %worker.kind, job_id, "Job was removed while running");
        return Ok(());
    }

    let released = match job_result {
        Ok(result) => worker
            .backend
            .complete_job(job, &worker.worker_id, &result)
            .await
            .map_err(to_release_error)?,
        Err(e) => {
            let message = e.to_string();

            if job.will_retry() {
                warn!(
                    error = %e,
                    queue = %worker.kind,
                    job_id,
                    attempts = job.attempts(),
                    max_attempts = job.max_attempts(),
                    duration = duration.as_millis(),
                    "Failed task"
                );
            } else {
                error!(
                    error = %e,
                    queue = %worker.kind,
                    job_id,
                    attempts = job.attempts(),
                    max_attempts = job.max_attempts(),
                    duration = duration.as_millis(),
                    "Job max attempts reached"
                );
            }

            let released = worker
                .backend
                .fail_job(job, &worker.worker_id, &message)
                .await
                .map_err(to_release_error)?;

            if released && !job.will_retry() {
                run_exhausted_hook(job, ctx, worker, message).await;
            }
            released
        }
    };

    if !released {
        info!(
            queue = %worker.kind,
            job_id,
            "Job is no longer owned by this worker, outcome discarded"
        );
    }

    Ok(())
}

/// Lets the handler settle the job's parent entity after the last attempt
/// failed. Runs for timeouts and aborts too, where the handler never saw
/// the failure.
async fn run_exhausted_hook<B: QueueBackend>(
    job: &Job,
    ctx: &JobContext,
    worker: &Worker<B>,
    reason: String,
) {
    let Some(task_fns) = worker.jobs.get(job.task_identifier()) else {
        return;
    };

    if !(task_fns.on_exhausted)(ctx.clone(), job.payload().clone(), reason).await {
        warn!(
            queue = %worker.kind,
            job_id = job.id(),
            "Exhausted job hook did not complete"
        );
    }
}
