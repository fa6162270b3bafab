use futures::stream::BoxStream;
use futures::{future, StreamExt};
use getset::Getters;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::warn;
use vivid_worker_job::{Job, JobKind, JobSpec};

use super::{CleanupTask, QueueBackend};
use crate::errors::Result;
use crate::sql::{
    add_job::add_job, complete_job::complete_job, fail_job::fail_job, find_job::find_job,
    get_job::get_job, remove_job::remove_job, update_progress::update_progress,
};

/// Channel notified by the insert trigger, the payload is the queue name.
pub const JOBS_INSERT_CHANNEL: &str = "vivid_worker:jobs:insert";

/// Queue backend storing every queue in one PostgreSQL table.
///
/// Build it with [`QueueOptions`](crate::QueueOptions), which also runs the
/// schema migrations.
#[derive(Getters, Clone, Debug)]
#[getset(get = "pub")]
pub struct PgBackend {
    pg_pool: PgPool,
    /// Schema name, already escaped for interpolation in SQL
    escaped_schema: String,
}

impl PgBackend {
    /// Wraps a pool whose schema has already been migrated.
    pub fn new(pg_pool: PgPool, escaped_schema: String) -> Self {
        PgBackend {
            pg_pool,
            escaped_schema,
        }
    }
}

impl QueueBackend for PgBackend {
    async fn add_job(
        &self,
        kind: JobKind,
        task_identifier: &str,
        payload: Value,
        spec: JobSpec,
    ) -> Result<Job> {
        add_job(
            &self.pg_pool,
            &self.escaped_schema,
            kind,
            task_identifier,
            payload,
            &spec,
        )
        .await
    }

    async fn get_job(
        &self,
        kind: JobKind,
        task_identifiers: &[String],
        worker_id: &str,
    ) -> Result<Option<Job>> {
        get_job(
            &self.pg_pool,
            &self.escaped_schema,
            kind,
            task_identifiers,
            worker_id,
        )
        .await
    }

    async fn find_job(&self, kind: JobKind, job_id: i64) -> Result<Option<Job>> {
        find_job(&self.pg_pool, &self.escaped_schema, kind, job_id).await
    }

    async fn update_progress(&self, job: &Job, worker_id: &str, progress: u8) -> Result<bool> {
        update_progress(&self.pg_pool, &self.escaped_schema, job, worker_id, progress).await
    }

    async fn complete_job(&self, job: &Job, worker_id: &str, result: &Value) -> Result<bool> {
        complete_job(&self.pg_pool, &self.escaped_schema, job, worker_id, result).await
    }

    async fn fail_job(&self, job: &Job, worker_id: &str, message: &str) -> Result<bool> {
        let retry_delay = job.backoff().delay_for_attempt(*job.attempts());
        fail_job(
            &self.pg_pool,
            &self.escaped_schema,
            job,
            worker_id,
            message,
            retry_delay,
        )
        .await
    }

    async fn remove_job(&self, kind: JobKind, job_id: i64) -> Result<bool> {
        remove_job(&self.pg_pool, &self.escaped_schema, kind, job_id).await
    }

    async fn cleanup(&self, tasks: &[CleanupTask], kind: Option<JobKind>) -> Result<u64> {
        let mut deleted = 0;
        for task in tasks {
            deleted += task
                .execute(&self.pg_pool, &self.escaped_schema, kind)
                .await?;
        }
        Ok(deleted)
    }

    async fn listen(&self, kind: JobKind) -> Result<BoxStream<'static, ()>> {
        let mut pg_listener = PgListener::connect_with(&self.pg_pool).await?;
        pg_listener.listen(JOBS_INSERT_CHANNEL).await?;

        let stream = pg_listener
            .into_stream()
            .filter_map(move |notification| {
                future::ready(match notification {
                    Ok(notification) if notification.payload() == kind.queue_name() => Some(()),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, queue = %kind, "Failed to receive job notification");
                        None
                    }
                })
            });

        Ok(stream.boxed())
    }
}
