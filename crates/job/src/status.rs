use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{Job, JobState};

/// Snapshot of a job as reported to callers polling for progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    pub queue: String,
    /// Unit-of-work name tag
    pub name: String,
    pub status: JobState,
    pub progress: u8,
    /// Set once the job completed
    pub result: Option<Value>,
    pub attempts_made: i16,
    pub max_attempts: i16,
    /// Error of the last failed attempt
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        let status = job.state();
        let result = match status {
            JobState::Completed => job.result().clone(),
            _ => None,
        };

        JobStatus {
            id: job.id().to_string(),
            queue: job.kind().queue_name().to_string(),
            name: job.task_identifier().clone(),
            status,
            progress: (*job.progress()).clamp(0, 100) as u8,
            result,
            attempts_made: *job.attempts(),
            max_attempts: *job.max_attempts(),
            failed_reason: job.last_error().clone(),
            created_at: *job.created_at(),
            finished_at: job.finished_at(),
        }
    }
}

impl From<Job> for JobStatus {
    fn from(job: Job) -> Self {
        JobStatus::from(&job)
    }
}
