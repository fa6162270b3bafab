//! Stand-in collaborators that wait for a while and log instead of talking
//! to real services. Used by the `vivid-worker` binary until real
//! integrations are configured, and handy in tests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;
use vivid_worker_job::{EmailPayload, ImageGenerationPayload, TrainingPayload};

use super::{
    CharacterStore, GeneratedImage, GenerationStatus, GenerationStore, ImageGenerator, Mailer,
    ModelTrainer, TrainedModel, TrainingStatus,
};

const SIMULATED_MODEL: &str = "vivid-diffusion-sim";

#[derive(Debug, Clone)]
pub struct SimulatedImageGenerator {
    delay: Duration,
}

impl SimulatedImageGenerator {
    pub fn new(delay: Duration) -> Self {
        SimulatedImageGenerator { delay }
    }
}

impl Default for SimulatedImageGenerator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ImageGenerator for SimulatedImageGenerator {
    async fn generate(
        &self,
        request: &ImageGenerationPayload,
    ) -> anyhow::Result<Vec<GeneratedImage>> {
        tokio::time::sleep(self.delay).await;

        let count = request
            .settings
            .get("numImages")
            .and_then(|v| v.as_u64())
            .unwrap_or(1)
            .clamp(1, 4);
        let width = setting_u32(request, "width").unwrap_or(1024);
        let height = setting_u32(request, "height").unwrap_or(1024);

        let images = (0..count)
            .map(|i| GeneratedImage {
                image_url: format!("https://cdn.vivid.local/{}/{i}.png", request.session_id),
                thumbnail_url: Some(format!(
                    "https://cdn.vivid.local/{}/{i}_thumb.png",
                    request.session_id
                )),
                width: Some(width),
                height: Some(height),
                seed: Some(rand::random_range(0..i64::from(u32::MAX))),
                generation_model: Some(SIMULATED_MODEL.to_string()),
            })
            .collect();

        Ok(images)
    }
}

fn setting_u32(request: &ImageGenerationPayload, key: &str) -> Option<u32> {
    request
        .settings
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
}

#[derive(Debug, Clone)]
pub struct SimulatedModelTrainer {
    delay: Duration,
}

impl SimulatedModelTrainer {
    pub fn new(delay: Duration) -> Self {
        SimulatedModelTrainer { delay }
    }
}

impl Default for SimulatedModelTrainer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ModelTrainer for SimulatedModelTrainer {
    async fn train(&self, request: &TrainingPayload) -> anyhow::Result<TrainedModel> {
        tokio::time::sleep(self.delay).await;
        Ok(TrainedModel {
            model_id: format!("model_{}_{}", request.character_id, Utc::now().timestamp_millis()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedMailer {
    delay: Duration,
}

impl SimulatedMailer {
    pub fn new(delay: Duration) -> Self {
        SimulatedMailer { delay }
    }
}

impl Default for SimulatedMailer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Mailer for SimulatedMailer {
    async fn send(&self, email: &EmailPayload) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        info!(to = %email.to, template = %email.template, "Email sent");
        Ok(())
    }
}

/// Logs writes instead of persisting them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStore;

impl GenerationStore for LoggingStore {
    async fn save_images(&self, session_id: &str, images: &[GeneratedImage]) -> anyhow::Result<()> {
        info!(session_id, count = images.len(), "Generated images saved");
        Ok(())
    }

    async fn set_session_status(
        &self,
        session_id: &str,
        status: GenerationStatus,
    ) -> anyhow::Result<()> {
        info!(session_id, ?status, "Generation session status updated");
        Ok(())
    }
}

impl CharacterStore for LoggingStore {
    async fn set_training_status(
        &self,
        character_id: &str,
        status: TrainingStatus,
    ) -> anyhow::Result<()> {
        info!(character_id, ?status, "Character training status updated");
        Ok(())
    }

    async fn set_trained_model(
        &self,
        character_id: &str,
        model_id: &str,
        completed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        info!(character_id, model_id, %completed_at, "Character model saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(settings: serde_json::Value) -> ImageGenerationPayload {
        ImageGenerationPayload {
            session_id: "s1".into(),
            user_id: "u1".into(),
            prompt: "a cat".into(),
            negative_prompt: None,
            character_id: None,
            settings: settings.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn generates_requested_number_of_images() {
        let images = SimulatedImageGenerator::default()
            .generate(&request(json!({ "numImages": 3, "width": 512 })))
            .await
            .unwrap();

        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|i| i.width == Some(512)));
        assert!(images[0].image_url.contains("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn defaults_to_one_image() {
        let images = SimulatedImageGenerator::default()
            .generate(&request(json!({})))
            .await
            .unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].height, Some(1024));
    }
}
