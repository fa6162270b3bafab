mod job;
mod kind;
mod payload;
mod policy;
mod spec;
mod status;

pub use job::{Job, JobBuilder, JobState};
pub use kind::{JobKind, UnknownQueueError};
pub use payload::{
    EmailPayload, ImageGenerationPayload, JobPayload, KindPayload, TrainingPayload,
    WebhookPayload,
};
pub use policy::{Backoff, BackoffType, RetryPolicy, UnknownBackoffTypeError};
pub use spec::{JobSpec, JobSpecBuilder};
pub use status::JobStatus;
