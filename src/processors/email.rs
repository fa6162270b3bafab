use serde_json::{json, Value};
use tracing::{error, info};
use vivid_worker_job::{EmailPayload, KindPayload};
use vivid_worker_task_handler::TaskHandler;

use super::ProcessError;
use crate::collaborators::Mailer;
use crate::context::JobContext;

/// Runs `send` jobs of the `email` queue.
pub struct EmailProcessor<M> {
    mailer: M,
}

impl<M: Mailer> EmailProcessor<M> {
    pub fn new(mailer: M) -> Self {
        EmailProcessor { mailer }
    }
}

impl<M: Mailer> TaskHandler<JobContext> for EmailProcessor<M> {
    type Payload = EmailPayload;
    type Error = ProcessError;
    const IDENTIFIER: &'static str = EmailPayload::KIND.task_identifier();

    async fn run(&self, payload: EmailPayload, ctx: JobContext) -> Result<Value, ProcessError> {
        let job_id = ctx.job_id();
        info!(job_id, to = %payload.to, template = %payload.template, "Sending email");

        if let Err(e) = self.mailer.send(&payload).await {
            let e = ProcessError::Delivery(e);
            error!(job_id, to = %payload.to, error = %e, "Failed to send email");
            return Err(e);
        }

        info!(job_id, to = %payload.to, "Email sent successfully");
        Ok(json!({
            "to": payload.to,
            "template": payload.template,
            "sentAt": chrono::Utc::now(),
        }))
    }
}
