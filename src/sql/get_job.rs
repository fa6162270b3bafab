use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};
use vivid_worker_job::{Job, JobKind};

use crate::errors::Result;

/// How long a lock may be held before the job is considered abandoned by a
/// crashed worker.
pub const STALE_LOCK_INTERVAL: &str = "4 hours";

/// Recorded on jobs whose worker vanished during their last attempt.
pub const LOST_WORKER_ERROR: &str = "Worker lost during the last attempt";

/// Locks the next runnable job of `kind` whose name tag is one of
/// `task_identifiers`, starting a new attempt.
///
/// `skip locked` makes concurrent callers pick distinct rows, so a job is
/// never handed to two workers at once. Stale jobs without attempts left
/// are failed on the way instead of being run again.
pub async fn get_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    kind: JobKind,
    task_identifiers: &[String],
    worker_id: &str,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            with lost as (
                update {escaped_schema}._private_jobs as jobs
                    set
                        failed_at = now(),
                        last_error = '{LOST_WORKER_ERROR}',
                        locked_by = null,
                        locked_at = null
                    where jobs.queue_name = $2::text
                    and jobs.completed_at is null
                    and jobs.failed_at is null
                    and jobs.locked_at < now() - interval '{STALE_LOCK_INTERVAL}'
                    and jobs.attempts >= jobs.max_attempts
            ),
            j as (
                select jobs.id
                    from {escaped_schema}._private_jobs as jobs
                    where jobs.queue_name = $2::text
                    and jobs.task_identifier = any($3::text[])
                    and jobs.completed_at is null
                    and jobs.failed_at is null
                    and jobs.attempts < jobs.max_attempts
                    and (jobs.locked_at is null or jobs.locked_at < now() - interval '{STALE_LOCK_INTERVAL}')
                    and jobs.run_at <= now()
                    order by jobs.run_at asc, jobs.id asc
                    limit 1
                    for update
                    skip locked
            )
                update {escaped_schema}._private_jobs as jobs
                    set
                        attempts = jobs.attempts + 1,
                        progress = 0,
                        locked_by = $1::text,
                        locked_at = now()
                    from j
                    where jobs.id = j.id
                    returning jobs.*
        "#
    );

    let job = query_as(&sql)
        .bind(worker_id)
        .bind(kind.queue_name())
        .bind(task_identifiers)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}
