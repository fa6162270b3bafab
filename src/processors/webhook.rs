use serde_json::{json, Value};
use tracing::{error, info};
use vivid_worker_job::{KindPayload, WebhookPayload};
use vivid_worker_task_handler::TaskHandler;

use super::ProcessError;
use crate::collaborators::WebhookTransport;
use crate::context::JobContext;

/// Runs `process` jobs of the `webhooks` queue.
pub struct WebhookProcessor<T> {
    transport: T,
}

impl<T: WebhookTransport> WebhookProcessor<T> {
    pub fn new(transport: T) -> Self {
        WebhookProcessor { transport }
    }
}

impl<T: WebhookTransport> TaskHandler<JobContext> for WebhookProcessor<T> {
    type Payload = WebhookPayload;
    type Error = ProcessError;
    const IDENTIFIER: &'static str = WebhookPayload::KIND.task_identifier();

    async fn run(&self, payload: WebhookPayload, ctx: JobContext) -> Result<Value, ProcessError> {
        let job_id = ctx.job_id();
        info!(job_id, url = %payload.url, "Processing webhook");

        let status = match self.transport.post(&payload).await {
            Ok(status) => status,
            Err(e) => {
                let e = ProcessError::Webhook(e);
                error!(job_id, url = %payload.url, error = %e, "Failed to process webhook");
                return Err(e);
            }
        };

        info!(job_id, url = %payload.url, status, "Webhook processed successfully");
        Ok(json!({
            "url": payload.url,
            "status": status,
        }))
    }
}
