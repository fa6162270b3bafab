use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::kind::JobKind;
use crate::policy::{Backoff, BackoffType};

/// Where a job currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Queued, or waiting out a backoff delay before its next attempt.
    Waiting,
    /// Locked by a worker that is running it right now.
    Active,
    Completed,
    /// Every attempt has been used. Terminal.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A job row as stored by the queue backend.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Job {
    #[builder(default)]
    id: i64,
    /// Queue the job lives in
    #[sqlx(rename = "queue_name", try_from = "String")]
    kind: JobKind,
    /// Unit-of-work name tag, `generate` for a regular image generation job
    #[builder(default, setter(into))]
    task_identifier: String,
    #[builder(default = "serde_json::json!({})")]
    payload: Value,
    /// 0 to 100, reset at the start of every attempt
    #[builder(default)]
    progress: i16,
    #[builder(default)]
    result: Option<Value>,
    /// Earliest time the next attempt may start
    #[builder(default = "Utc::now()")]
    run_at: DateTime<Utc>,
    /// Attempts started so far, including the running one
    #[builder(default)]
    attempts: i16,
    #[builder(default = "1")]
    max_attempts: i16,
    #[sqlx(try_from = "String")]
    #[builder(default)]
    backoff_type: BackoffType,
    #[builder(default)]
    backoff_delay_ms: i64,
    #[builder(default)]
    last_error: Option<String>,
    #[builder(default)]
    locked_at: Option<DateTime<Utc>>,
    #[builder(default)]
    locked_by: Option<String>,
    #[builder(default)]
    completed_at: Option<DateTime<Utc>>,
    #[builder(default)]
    failed_at: Option<DateTime<Utc>>,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    #[builder(default = "Utc::now()")]
    updated_at: DateTime<Utc>,
}

impl Job {
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    pub fn state(&self) -> JobState {
        if self.completed_at.is_some() {
            JobState::Completed
        } else if self.failed_at.is_some() {
            JobState::Failed
        } else if self.locked_by.is_some() {
            JobState::Active
        } else {
            JobState::Waiting
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from_parts(self.backoff_type, self.backoff_delay_ms)
    }

    /// Whether a failure of the current attempt leads to another one.
    pub fn will_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.failed_at)
    }
}

impl JobBuilder {
    /// Builds the Job with all configured values.
    ///
    /// # Panics
    /// Panics if `kind` was not set, every other field has a default.
    pub fn build(self) -> Job {
        self.build_internal()
            .expect("A job kind is required to build a job")
    }
}
