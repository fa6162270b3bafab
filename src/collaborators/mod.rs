//! Services the processors delegate the actual work to.
//!
//! Production deployments plug in real AI, mail and persistence services.
//! [`simulated`] provides stand-ins that only wait and log.

mod http;
pub mod simulated;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vivid_worker_job::{EmailPayload, ImageGenerationPayload, TrainingPayload, WebhookPayload};

pub use http::ReqwestWebhookTransport;

/// One image produced by a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainedModel {
    pub model_id: String,
}

/// Status of a generation session as seen by the rest of the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Training,
    Completed,
    Failed,
}

/// Runs the AI model producing images.
pub trait ImageGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        request: &ImageGenerationPayload,
    ) -> impl Future<Output = anyhow::Result<Vec<GeneratedImage>>> + Send;
}

/// Fine-tunes a character model from training images.
pub trait ModelTrainer: Send + Sync + 'static {
    fn train(
        &self,
        request: &TrainingPayload,
    ) -> impl Future<Output = anyhow::Result<TrainedModel>> + Send;
}

/// Persists generation results and session status.
pub trait GenerationStore: Send + Sync + 'static {
    fn save_images(
        &self,
        session_id: &str,
        images: &[GeneratedImage],
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn set_session_status(
        &self,
        session_id: &str,
        status: GenerationStatus,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Persists character training state.
pub trait CharacterStore: Send + Sync + 'static {
    fn set_training_status(
        &self,
        character_id: &str,
        status: TrainingStatus,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn set_trained_model(
        &self,
        character_id: &str,
        model_id: &str,
        completed_at: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub trait Mailer: Send + Sync + 'static {
    fn send(&self, email: &EmailPayload) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Performs the outbound HTTP POST of a webhook and returns the response
/// status. Any transport error or non-success status is an error.
pub trait WebhookTransport: Send + Sync + 'static {
    fn post(&self, webhook: &WebhookPayload) -> impl Future<Output = anyhow::Result<u16>> + Send;
}
