use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationErrors};

use crate::kind::JobKind;

/// A payload type bound to exactly one [`JobKind`].
pub trait KindPayload: Serialize + DeserializeOwned + Validate + Send + Sync + 'static {
    const KIND: JobKind;
}

/// Parameters of one AI image generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationPayload {
    #[validate(length(min = 1))]
    pub session_id: String,
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    /// Model settings forwarded untouched to the generator.
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// Images used to fine-tune a character model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrainingPayload {
    #[validate(length(min = 1))]
    pub character_id: String,
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    #[validate(email)]
    pub to: String,
    #[validate(length(min = 1))]
    pub subject: String,
    #[validate(length(min = 1))]
    pub template: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// An outbound HTTP POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl KindPayload for ImageGenerationPayload {
    const KIND: JobKind = JobKind::ImageGeneration;
}

impl KindPayload for TrainingPayload {
    const KIND: JobKind = JobKind::Training;
}

impl KindPayload for EmailPayload {
    const KIND: JobKind = JobKind::Email;
}

impl KindPayload for WebhookPayload {
    const KIND: JobKind = JobKind::Webhook;
}

/// Any of the four payloads, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum JobPayload {
    ImageGeneration(ImageGenerationPayload),
    Training(TrainingPayload),
    Email(EmailPayload),
    Webhook(WebhookPayload),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::ImageGeneration(_) => JobKind::ImageGeneration,
            JobPayload::Training(_) => JobKind::Training,
            JobPayload::Email(_) => JobKind::Email,
            JobPayload::Webhook(_) => JobKind::Webhook,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            JobPayload::ImageGeneration(p) => p.validate(),
            JobPayload::Training(p) => p.validate(),
            JobPayload::Email(p) => p.validate(),
            JobPayload::Webhook(p) => p.validate(),
        }
    }

    /// The untagged JSON stored in the job row.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            JobPayload::ImageGeneration(p) => serde_json::to_value(p),
            JobPayload::Training(p) => serde_json::to_value(p),
            JobPayload::Email(p) => serde_json::to_value(p),
            JobPayload::Webhook(p) => serde_json::to_value(p),
        }
    }

    /// Decodes a stored payload given the queue it came from.
    pub fn from_value(kind: JobKind, value: Value) -> serde_json::Result<JobPayload> {
        Ok(match kind {
            JobKind::ImageGeneration => JobPayload::ImageGeneration(serde_json::from_value(value)?),
            JobKind::Training => JobPayload::Training(serde_json::from_value(value)?),
            JobKind::Email => JobPayload::Email(serde_json::from_value(value)?),
            JobKind::Webhook => JobPayload::Webhook(serde_json::from_value(value)?),
        })
    }
}

impl From<ImageGenerationPayload> for JobPayload {
    fn from(value: ImageGenerationPayload) -> Self {
        JobPayload::ImageGeneration(value)
    }
}

impl From<TrainingPayload> for JobPayload {
    fn from(value: TrainingPayload) -> Self {
        JobPayload::Training(value)
    }
}

impl From<EmailPayload> for JobPayload {
    fn from(value: EmailPayload) -> Self {
        JobPayload::Email(value)
    }
}

impl From<WebhookPayload> for JobPayload {
    fn from(value: WebhookPayload) -> Self {
        JobPayload::Webhook(value)
    }
}
