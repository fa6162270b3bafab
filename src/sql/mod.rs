pub mod add_job;
pub mod cleanup;
pub mod complete_job;
pub mod fail_job;
pub mod find_job;
pub mod get_job;
pub mod remove_job;
pub mod update_progress;
