use indoc::formatdoc;
use sqlx::{query, PgExecutor};
use vivid_worker_job::JobKind;

use crate::errors::Result;

/// Housekeeping that can be run against the queue store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupTask {
    /// Deletes completed jobs. Their status can no longer be queried.
    DeleteCompletedJobs,
    /// Deletes jobs that used up every attempt.
    DeletePermanentlyFailedJobs,
}

impl CleanupTask {
    /// Runs the task, restricted to `kind`'s queue when given. Returns the
    /// number of deleted jobs.
    pub async fn execute<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        escaped_schema: &str,
        kind: Option<JobKind>,
    ) -> Result<u64> {
        let terminal_column = match self {
            CleanupTask::DeleteCompletedJobs => "completed_at",
            CleanupTask::DeletePermanentlyFailedJobs => "failed_at",
        };

        let sql = formatdoc!(
            r#"
                delete from {escaped_schema}._private_jobs
                    where {terminal_column} is not null
                    and ($1::text is null or queue_name = $1::text)
            "#
        );

        let res = query(&sql)
            .bind(kind.map(JobKind::queue_name))
            .execute(executor)
            .await?;

        Ok(res.rows_affected())
    }

    /// Whether a job in the given terminal state is deleted by this task.
    pub fn matches(&self, completed: bool, failed: bool) -> bool {
        match self {
            CleanupTask::DeleteCompletedJobs => completed,
            CleanupTask::DeletePermanentlyFailedJobs => failed,
        }
    }
}
