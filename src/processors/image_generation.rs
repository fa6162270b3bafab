use serde_json::{json, Value};
use tracing::{error, info, warn};
use vivid_worker_job::{ImageGenerationPayload, KindPayload};
use vivid_worker_task_handler::TaskHandler;

use super::ProcessError;
use crate::collaborators::{GenerationStatus, GenerationStore, ImageGenerator};
use crate::context::JobContext;

/// Runs `generate` jobs of the `image-generation` queue.
pub struct ImageGenerationProcessor<G, S> {
    generator: G,
    store: S,
}

impl<G, S> ImageGenerationProcessor<G, S>
where
    G: ImageGenerator,
    S: GenerationStore,
{
    pub fn new(generator: G, store: S) -> Self {
        ImageGenerationProcessor { generator, store }
    }

    async fn generate(
        &self,
        payload: &ImageGenerationPayload,
        ctx: &JobContext,
    ) -> Result<Value, ProcessError> {
        let session_id = payload.session_id.as_str();

        ctx.update_progress(10).await?;
        self.store
            .set_session_status(session_id, GenerationStatus::Processing)
            .await
            .map_err(ProcessError::Persistence)?;

        ctx.update_progress(50).await?;
        let images = self
            .generator
            .generate(payload)
            .await
            .map_err(ProcessError::Generation)?;

        ctx.update_progress(90).await?;
        self.store
            .save_images(session_id, &images)
            .await
            .map_err(ProcessError::Persistence)?;
        self.store
            .set_session_status(session_id, GenerationStatus::Completed)
            .await
            .map_err(ProcessError::Persistence)?;

        ctx.update_progress(100).await?;

        Ok(json!({
            "sessionId": session_id,
            "images": images,
        }))
    }
}

impl<G, S> TaskHandler<JobContext> for ImageGenerationProcessor<G, S>
where
    G: ImageGenerator,
    S: GenerationStore,
{
    type Payload = ImageGenerationPayload;
    type Error = ProcessError;
    const IDENTIFIER: &'static str = ImageGenerationPayload::KIND.task_identifier();

    async fn run(
        &self,
        payload: ImageGenerationPayload,
        ctx: JobContext,
    ) -> Result<Value, ProcessError> {
        let job_id = ctx.job_id();
        info!(job_id, session_id = %payload.session_id, "Starting image generation");

        match self.generate(&payload, &ctx).await {
            Ok(result) => {
                info!(job_id, session_id = %payload.session_id, "Completed image generation");
                Ok(result)
            }
            Err(e) if e.is_job_removed() => {
                info!(job_id, session_id = %payload.session_id, "Image generation cancelled");
                Err(e)
            }
            Err(e) => {
                error!(job_id, session_id = %payload.session_id, error = %e, "Failed to generate images");
                Err(e)
            }
        }
    }

    async fn on_exhausted(&self, payload: ImageGenerationPayload, ctx: JobContext, reason: String) {
        let job_id = ctx.job_id();
        warn!(job_id, session_id = %payload.session_id, reason = %reason, "Giving up after the last attempt");
        if let Err(e) = self
            .store
            .set_session_status(&payload.session_id, GenerationStatus::Failed)
            .await
        {
            error!(job_id, error = %e, "Failed to mark generation session as failed");
        }
    }
}
