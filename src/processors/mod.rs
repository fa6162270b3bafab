//! One task handler per job kind.
//!
//! Each processor reports progress at fixed milestones, delegates the real
//! work to a collaborator and returns a JSON result. Errors are logged with
//! the job id and bubbled up so the queue applies the kind's retry policy.

mod email;
mod image_generation;
mod training;
mod webhook;

use thiserror::Error;

use crate::context::ProgressError;

pub use email::EmailProcessor;
pub use image_generation::ImageGenerationProcessor;
pub use training::TrainingProcessor;
pub use webhook::WebhookProcessor;

/// Failure of one processing attempt. Every variant is retryable.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("Image generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("Model training failed: {0:#}")]
    Training(anyhow::Error),

    #[error("Failed to persist results: {0:#}")]
    Persistence(anyhow::Error),

    #[error("Email delivery failed: {0:#}")]
    Delivery(anyhow::Error),

    #[error("Webhook delivery failed: {0:#}")]
    Webhook(anyhow::Error),
}

impl ProcessError {
    /// The job was cancelled under the attempt.
    pub fn is_job_removed(&self) -> bool {
        matches!(self, ProcessError::Progress(ProgressError::JobRemoved(_)))
    }
}
