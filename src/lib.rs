//! Background job layer of Vivid Studios AI.
//!
//! Four named queues (`image-generation`, `training`, `email`, `webhooks`)
//! live in a PostgreSQL schema. [`JobSubmitter`] enqueues typed payloads
//! with their kind's retry policy, one [`Worker`] per queue runs them
//! through the matching processor, and [`JobControl`] reports status and
//! cancels long-running jobs.

pub mod backend;
mod builder;
pub mod collaborators;
pub mod context;
mod control;
pub mod errors;
pub mod processors;
mod runner;
pub mod shutdown;
mod sql;
mod streams;
mod submit;
mod system;
mod utils;

pub use crate::backend::{CleanupTask, InMemoryBackend, PgBackend, QueueBackend};
pub use crate::builder::{BuildError, QueueOptions, WorkerOptions};
pub use crate::collaborators::ReqwestWebhookTransport;
pub use crate::context::{JobContext, ProgressError};
pub use crate::control::JobControl;
pub use crate::errors::VividWorkerError;
pub use crate::runner::{ProcessJobError, ReleaseJobError, Worker, WorkerRuntimeError};
pub use crate::shutdown::{no_shutdown_signal, os_shutdown_signal, ShutdownSignal};
pub use crate::streams::StreamSource;
pub use crate::submit::JobSubmitter;
pub use crate::system::{JobSystem, JobSystemBuilder, JobSystemError};

pub use vivid_worker_job::*;
pub use vivid_worker_task_handler::{RunTaskError, SpawnTaskResult, TaskHandler};
