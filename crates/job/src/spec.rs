use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::{Getters, MutGetters, Setters};

use crate::policy::{Backoff, RetryPolicy};

/// Per-submission overrides. Unset fields fall back to the kind's policy.
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use vivid_worker_job::{Backoff, JobSpecBuilder};
///
/// let spec = JobSpecBuilder::new()
///     .run_at(Utc::now() + chrono::Duration::minutes(5))
///     .max_attempts(1)
///     .backoff(Backoff::Fixed(Duration::from_secs(30)))
///     .build();
/// ```
#[derive(Getters, Setters, MutGetters, Debug, Default, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub", set = "pub", get_mut = "pub")]
#[builder(
    build_fn(private, name = "build_internal"),
    setter(strip_option),
    default,
    pattern = "owned"
)]
pub struct JobSpec {
    /// Defer the first attempt. Defaults to now.
    #[builder(setter(into))]
    pub run_at: Option<DateTime<Utc>>,

    pub max_attempts: Option<i16>,

    pub backoff: Option<Backoff>,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::new()
    }

    /// Applies the overrides on top of `policy`.
    pub fn resolve(&self, policy: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(policy.max_attempts).max(1),
            backoff: self.backoff.unwrap_or(policy.backoff),
        }
    }
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> JobSpec {
        self.build_internal()
            .expect("There is a default value for all fields")
    }
}

impl From<Option<JobSpec>> for JobSpec {
    fn from(spec: Option<JobSpec>) -> Self {
        spec.unwrap_or_default()
    }
}
