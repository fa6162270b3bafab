use thiserror::Error;
use vivid_worker_job::UnknownQueueError;
use vivid_worker_migrations::MigrateError;

/// Errors returned by the queue backends and the submission and control facades.
#[derive(Error, Debug)]
pub enum VividWorkerError {
    /// An error occurred while executing an SQL query
    #[error("Error occured while query: {0}")]
    Sql(#[from] sqlx::Error),

    /// An error occurred while serializing or deserializing JSON data
    #[error("Error while serializing params: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error occured while migrating the queue schema: {0}")]
    Migrate(#[from] MigrateError),

    /// The payload was rejected before reaching the queue
    #[error("Invalid job payload: {0}")]
    InvalidPayload(#[from] validator::ValidationErrors),

    #[error("Unknown queue '{0}'")]
    UnknownQueue(String),

    #[error("Job '{job_id}' not found in queue '{queue}'")]
    JobNotFound { queue: String, job_id: String },

    /// Cancellation was requested on a queue whose jobs cannot be cancelled
    #[error("Jobs of queue '{0}' cannot be cancelled")]
    CannotCancel(String),

    /// The backend accepted the insert but returned no job
    #[error("Queue '{0}' did not return the created job")]
    JobNotCreated(String),
}

impl VividWorkerError {
    /// Whether the caller sent a bad request. These are never worth retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VividWorkerError::UnknownQueue(_)
                | VividWorkerError::CannotCancel(_)
                | VividWorkerError::InvalidPayload(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VividWorkerError::JobNotFound { .. })
    }
}

impl From<UnknownQueueError> for VividWorkerError {
    fn from(e: UnknownQueueError) -> Self {
        VividWorkerError::UnknownQueue(e.0)
    }
}

/// A Result type alias for VividWorkerError.
pub type Result<T> = core::result::Result<T, VividWorkerError>;
