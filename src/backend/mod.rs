//! Durable storage and dispatch of jobs.
//!
//! [`QueueBackend`] is the only place job state changes. Workers, the
//! submission facade and the control facade all go through it.

mod memory;
mod postgres;

use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;
use vivid_worker_job::{Job, JobKind, JobSpec};

pub use crate::sql::cleanup::CleanupTask;
pub use memory::InMemoryBackend;
pub use postgres::PgBackend;

use crate::errors::Result;

/// A store holding the four named queues.
///
/// Implementations must hand a given job to at most one worker at a time,
/// and every write made on behalf of a running attempt must be conditional
/// on the attempt still being owned by `worker_id`.
pub trait QueueBackend: Clone + Send + Sync + 'static {
    /// Persists a new waiting job on `kind`'s queue.
    fn add_job(
        &self,
        kind: JobKind,
        task_identifier: &str,
        payload: Value,
        spec: JobSpec,
    ) -> impl Future<Output = Result<Job>> + Send;

    /// Locks the next runnable job of `kind` whose name tag is in
    /// `task_identifiers`, incrementing its attempts and resetting progress.
    fn get_job(
        &self,
        kind: JobKind,
        task_identifiers: &[String],
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<Job>>> + Send;

    fn find_job(
        &self,
        kind: JobKind,
        job_id: i64,
    ) -> impl Future<Output = Result<Option<Job>>> + Send;

    /// Returns `false` once the attempt is no longer owned by `worker_id`.
    fn update_progress(
        &self,
        job: &Job,
        worker_id: &str,
        progress: u8,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn complete_job(
        &self,
        job: &Job,
        worker_id: &str,
        result: &Value,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Records a failed attempt, scheduling a retry after the job's backoff
    /// or failing it for good once attempts are exhausted.
    fn fail_job(
        &self,
        job: &Job,
        worker_id: &str,
        message: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Deletes a job that is still waiting or active.
    fn remove_job(&self, kind: JobKind, job_id: i64) -> impl Future<Output = Result<bool>> + Send;

    fn cleanup(
        &self,
        tasks: &[CleanupTask],
        kind: Option<JobKind>,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// A stream yielding whenever a job is added to `kind`'s queue.
    fn listen(
        &self,
        kind: JobKind,
    ) -> impl Future<Output = Result<BoxStream<'static, ()>>> + Send;
}

/// Object safe slice of [`QueueBackend`] used by running jobs to report
/// progress without knowing the backend type.
pub trait ProgressReporter: Send + Sync {
    fn report_progress<'a>(
        &'a self,
        job: &'a Job,
        worker_id: &'a str,
        progress: u8,
    ) -> BoxFuture<'a, Result<bool>>;
}

impl<B: QueueBackend> ProgressReporter for B {
    fn report_progress<'a>(
        &'a self,
        job: &'a Job,
        worker_id: &'a str,
        progress: u8,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(self.update_progress(job, worker_id, progress))
    }
}
