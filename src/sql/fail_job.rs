use std::time::Duration;

use indoc::formatdoc;
use sqlx::{query, PgExecutor};
use vivid_worker_job::Job;

use crate::errors::Result;

/// Records a failed attempt of a job locked by `worker_id`.
///
/// With attempts left, the job goes back to waiting and becomes runnable
/// after `retry_delay`. Otherwise it is failed for good.
pub async fn fail_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job: &Job,
    worker_id: &str,
    message: &str,
    retry_delay: Duration,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}._private_jobs as jobs
                set
                    last_error = $3::text,
                    run_at = case
                        when jobs.attempts >= jobs.max_attempts then jobs.run_at
                        else now() + ($4::bigint * interval '1 millisecond')
                    end,
                    failed_at = case
                        when jobs.attempts >= jobs.max_attempts then now()
                        else null
                    end,
                    locked_by = null,
                    locked_at = null
                where id = $1::bigint and locked_by = $2::text
        "#
    );

    let res = query(&sql)
        .bind(job.id())
        .bind(worker_id)
        .bind(message)
        .bind(retry_delay.as_millis() as i64)
        .execute(executor)
        .await?;

    Ok(res.rows_affected() > 0)
}
