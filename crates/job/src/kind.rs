use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{Backoff, RetryPolicy};

/// The four kinds of background work handled by vivid_worker.
///
/// A kind fixes the named queue a job lives in, the name tag its processor
/// expects, the retry policy applied on failure and whether callers may
/// cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ImageGeneration,
    Training,
    Email,
    Webhook,
}

/// Returned when a queue name does not belong to any [`JobKind`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown queue '{0}'")]
pub struct UnknownQueueError(pub String);

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ImageGeneration,
        JobKind::Training,
        JobKind::Email,
        JobKind::Webhook,
    ];

    /// Name of the queue holding jobs of this kind.
    pub const fn queue_name(self) -> &'static str {
        match self {
            JobKind::ImageGeneration => "image-generation",
            JobKind::Training => "training",
            JobKind::Email => "email",
            JobKind::Webhook => "webhooks",
        }
    }

    /// Name tag given to jobs submitted through the facade. Processors
    /// ignore jobs carrying any other tag.
    pub const fn task_identifier(self) -> &'static str {
        match self {
            JobKind::ImageGeneration => "generate",
            JobKind::Training => "train",
            JobKind::Email => "send",
            JobKind::Webhook => "process",
        }
    }

    pub const fn retry_policy(self) -> RetryPolicy {
        match self {
            JobKind::ImageGeneration => {
                RetryPolicy::new(3, Backoff::Exponential(Duration::from_millis(2000)))
            }
            JobKind::Training => RetryPolicy::new(2, Backoff::None),
            JobKind::Email => RetryPolicy::new(5, Backoff::Exponential(Duration::from_millis(1000))),
            JobKind::Webhook => RetryPolicy::new(3, Backoff::None),
        }
    }

    pub const fn is_cancellable(self) -> bool {
        matches!(self, JobKind::ImageGeneration | JobKind::Training)
    }

    /// Upper bound on a single attempt. `None` means the attempt may run
    /// until it finishes or the worker shuts down.
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            JobKind::Training => Some(Duration::from_secs(60 * 60)),
            _ => None,
        }
    }

    pub fn from_queue_name(queue_name: &str) -> Result<JobKind, UnknownQueueError> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.queue_name() == queue_name)
            .ok_or_else(|| UnknownQueueError(queue_name.to_string()))
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.queue_name())
    }
}

impl FromStr for JobKind {
    type Err = UnknownQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::from_queue_name(s)
    }
}

/// Lets sqlx decode the `queue_name` column straight into a kind.
impl TryFrom<String> for JobKind {
    type Error = UnknownQueueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobKind::from_queue_name(&value)
    }
}
