mod runner;
mod task_result;

pub use runner::{spawn_exhausted, spawn_task, TaskHandler};
pub use task_result::{RunTaskError, SpawnTaskResult};
