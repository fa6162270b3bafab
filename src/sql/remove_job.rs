use indoc::formatdoc;
use sqlx::{query, PgExecutor};
use vivid_worker_job::JobKind;

use crate::errors::Result;

/// Deletes a job that has not reached a terminal state yet.
///
/// Returns `false` when there was nothing to delete.
pub async fn remove_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    kind: JobKind,
    job_id: i64,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            delete from {escaped_schema}._private_jobs
                where id = $1::bigint
                and queue_name = $2::text
                and completed_at is null
                and failed_at is null
        "#
    );

    let res = query(&sql)
        .bind(job_id)
        .bind(kind.queue_name())
        .execute(executor)
        .await?;

    Ok(res.rows_affected() > 0)
}
