use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Why a spawned task did not produce a result.
#[derive(Error, Debug, Eq, PartialEq, Clone)]
pub enum RunTaskError<E> {
    /// The stored payload does not decode into the handler's payload type
    #[error("Invalid payload : {0}")]
    InvalidPayload(String),
    #[error("Task panicked during execution")]
    TaskPanic,
    /// Aborted by the cancellation token, usually a worker shutdown
    #[error("Task was aborted by shutdown signal")]
    TaskAborted,
    #[error("Task exceeded its timeout of {0:?}")]
    TaskTimedOut(Duration),
    #[error("Task returned the following error : {0}")]
    TaskError(E),
}

#[derive(Debug, PartialEq)]
pub struct SpawnTaskResult<E> {
    pub duration: Duration,
    pub result: Result<Value, RunTaskError<E>>,
}

impl<E> SpawnTaskResult<E> {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn result(&self) -> &Result<Value, RunTaskError<E>> {
        &self.result
    }

    pub fn into_result(self) -> Result<Value, RunTaskError<E>> {
        self.result
    }
}

impl<E> RunTaskError<E> {
    pub fn is_panic(&self) -> bool {
        matches!(self, RunTaskError::TaskPanic)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RunTaskError::TaskAborted)
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, RunTaskError::TaskTimedOut(_))
    }

    pub fn is_task_error(&self) -> bool {
        matches!(self, RunTaskError::TaskError(_))
    }

    pub fn task_error(&self) -> Option<&E> {
        match self {
            RunTaskError::TaskError(e) => Some(e),
            _ => None,
        }
    }
}
