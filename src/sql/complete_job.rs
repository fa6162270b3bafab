use indoc::formatdoc;
use serde_json::Value;
use sqlx::{query, PgExecutor};
use vivid_worker_job::Job;

use crate::errors::Result;

/// Marks a job locked by `worker_id` as completed with `result`.
///
/// Returns `false` if the job was removed or reclaimed in the meantime.
#[tracing::instrument(skip_all, err, fields(job_id = job.id(), otel.kind = "client", db.system = "postgresql"))]
pub async fn complete_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job: &Job,
    worker_id: &str,
    result: &Value,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}._private_jobs
                set
                    completed_at = now(),
                    progress = 100,
                    result = $3::jsonb,
                    locked_by = null,
                    locked_at = null
                where id = $1::bigint and locked_by = $2::text
        "#
    );

    let res = query(&sql)
        .bind(job.id())
        .bind(worker_id)
        .bind(result)
        .execute(executor)
        .await?;

    Ok(res.rows_affected() > 0)
}
