use indoc::formatdoc;
use serde_json::Value;
use sqlx::{query_as, PgExecutor};
use tracing::info;
use vivid_worker_job::{Job, JobKind, JobSpec};

use crate::errors::{Result, VividWorkerError};

/// Inserts a job into `kind`'s queue, applying the kind's retry policy
/// unless `spec` overrides it.
#[tracing::instrument(
    skip_all,
    err,
    fields(queue = %kind, task_identifier = identifier, otel.kind = "client", db.system = "postgresql")
)]
pub async fn add_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    kind: JobKind,
    identifier: &str,
    payload: Value,
    spec: &JobSpec,
) -> Result<Job> {
    let policy = spec.resolve(kind.retry_policy());
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}._private_jobs (
                queue_name,
                task_identifier,
                payload,
                run_at,
                max_attempts,
                backoff_type,
                backoff_delay_ms
            )
            values ($1::text, $2::text, $3::json, coalesce($4::timestamptz, now()), $5::smallint, $6::text, $7::bigint)
            returning *
        "#
    );

    let job: Option<Job> = query_as(&sql)
        .bind(kind.queue_name())
        .bind(identifier)
        .bind(&payload)
        .bind(spec.run_at())
        .bind(policy.max_attempts)
        .bind(policy.backoff.backoff_type().as_str())
        .bind(policy.backoff.base_delay().as_millis() as i64)
        .fetch_optional(executor)
        .await?;

    let job = job.ok_or_else(|| VividWorkerError::JobNotCreated(kind.queue_name().into()))?;

    info!(
        queue = %kind,
        job_id = job.id(),
        identifier,
        max_attempts = policy.max_attempts,
        "Job added to queue"
    );

    Ok(job)
}
