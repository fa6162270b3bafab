use indoc::formatdoc;
use sqlx::{query, PgExecutor};
use vivid_worker_job::Job;

use crate::errors::Result;

/// Raises the progress of a job locked by `worker_id`. Progress never goes
/// down within an attempt.
///
/// Returns `false` when the job is no longer locked by this worker, which
/// happens when it was cancelled while running.
pub async fn update_progress<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job: &Job,
    worker_id: &str,
    progress: u8,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}._private_jobs
                set progress = greatest(progress, $3::smallint)
                where id = $1::bigint and locked_by = $2::text
        "#
    );

    let res = query(&sql)
        .bind(job.id())
        .bind(worker_id)
        .bind(i16::from(progress.min(100)))
        .execute(executor)
        .await?;

    Ok(res.rows_affected() > 0)
}
