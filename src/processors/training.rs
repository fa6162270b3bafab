use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use vivid_worker_job::{KindPayload, TrainingPayload};
use vivid_worker_task_handler::TaskHandler;

use super::ProcessError;
use crate::collaborators::{CharacterStore, ModelTrainer, TrainingStatus};
use crate::context::JobContext;

/// Runs `train` jobs of the `training` queue.
pub struct TrainingProcessor<T, S> {
    trainer: T,
    store: S,
}

impl<T, S> TrainingProcessor<T, S>
where
    T: ModelTrainer,
    S: CharacterStore,
{
    pub fn new(trainer: T, store: S) -> Self {
        TrainingProcessor { trainer, store }
    }

    async fn train(&self, payload: &TrainingPayload, ctx: &JobContext) -> Result<Value, ProcessError> {
        let character_id = payload.character_id.as_str();

        ctx.update_progress(5).await?;
        self.store
            .set_training_status(character_id, TrainingStatus::Training)
            .await
            .map_err(ProcessError::Persistence)?;

        ctx.update_progress(25).await?;
        let model = self
            .trainer
            .train(payload)
            .await
            .map_err(ProcessError::Training)?;

        ctx.update_progress(75).await?;
        let completed_at = Utc::now();
        self.store
            .set_trained_model(character_id, &model.model_id, completed_at)
            .await
            .map_err(ProcessError::Persistence)?;

        ctx.update_progress(100).await?;

        Ok(json!({
            "characterId": character_id,
            "modelId": model.model_id,
            "trainingCompletedAt": completed_at,
        }))
    }
}

impl<T, S> TaskHandler<JobContext> for TrainingProcessor<T, S>
where
    T: ModelTrainer,
    S: CharacterStore,
{
    type Payload = TrainingPayload;
    type Error = ProcessError;
    const IDENTIFIER: &'static str = TrainingPayload::KIND.task_identifier();

    async fn run(&self, payload: TrainingPayload, ctx: JobContext) -> Result<Value, ProcessError> {
        let job_id = ctx.job_id();
        info!(
            job_id,
            character_id = %payload.character_id,
            images = payload.image_urls.len(),
            "Starting character training"
        );

        match self.train(&payload, &ctx).await {
            Ok(result) => {
                info!(job_id, character_id = %payload.character_id, "Completed character training");
                Ok(result)
            }
            Err(e) if e.is_job_removed() => {
                info!(job_id, character_id = %payload.character_id, "Character training cancelled");
                Err(e)
            }
            Err(e) => {
                error!(job_id, character_id = %payload.character_id, error = %e, "Failed to train character");
                Err(e)
            }
        }
    }

    async fn on_exhausted(&self, payload: TrainingPayload, ctx: JobContext, reason: String) {
        let job_id = ctx.job_id();
        warn!(job_id, character_id = %payload.character_id, reason = %reason, "Giving up after the last attempt");
        if let Err(e) = self
            .store
            .set_training_status(&payload.character_id, TrainingStatus::Failed)
            .await
        {
            error!(job_id, error = %e, "Failed to mark character training as failed");
        }
    }
}
