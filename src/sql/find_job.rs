use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};
use vivid_worker_job::{Job, JobKind};

use crate::errors::Result;

pub async fn find_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    kind: JobKind,
    job_id: i64,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}._private_jobs
                where id = $1::bigint and queue_name = $2::text
        "#
    );

    let job = query_as(&sql)
        .bind(job_id)
        .bind(kind.queue_name())
        .fetch_optional(executor)
        .await?;

    Ok(job)
}
