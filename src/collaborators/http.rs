use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use vivid_worker_job::WebhookPayload;

use super::WebhookTransport;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers webhooks with reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestWebhookTransport {
    client: Client,
}

impl ReqwestWebhookTransport {
    pub fn new() -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("vivid-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        ReqwestWebhookTransport { client }
    }
}

impl WebhookTransport for ReqwestWebhookTransport {
    async fn post(&self, webhook: &WebhookPayload) -> anyhow::Result<u16> {
        let mut request = self.client.post(&webhook.url).json(&webhook.payload);
        for (name, value) in webhook.headers.iter().flatten() {
            request = request.header(name, value);
        }

        let response = request.send().await?.error_for_status()?;
        let status = response.status().as_u16();
        debug!(url = %webhook.url, status, "Webhook delivered");

        Ok(status)
    }
}
