use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("failed to call webhook: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook call failed with status code: {0}")]
    BadStatus(u16),
}

/// Outbound notifier used to wake a sleeping guest when the host publishes
/// an event. Failures are logged by callers and never affect the publish
/// path.
#[async_trait]
pub trait Caller: Send + Sync {
    async fn call(
        &self,
        event_id: &str,
        session_id: &str,
        webhook_id: &str,
        webhook_url: &str,
    ) -> Result<(), WebhookError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallParams<'a> {
    event_id: &'a str,
    session_id: &'a str,
    webhook_id: &'a str,
    server_url: &'a str,
}

/// HTTP webhook caller; POSTs a JSON notification and treats any non-200
/// response as failure.
pub struct Webhook {
    client: reqwest::Client,
    server_url: String,
}

impl Webhook {
    pub fn new(server_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build webhook HTTP client");
        Webhook {
            client,
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl Caller for Webhook {
    async fn call(
        &self,
        event_id: &str,
        session_id: &str,
        webhook_id: &str,
        webhook_url: &str,
    ) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(webhook_url)
            .json(&CallParams {
                event_id,
                session_id,
                webhook_id,
                server_url: &self.server_url,
            })
            .send()
            .await?;

        if response.status().as_u16() != 200 {
            return Err(WebhookError::BadStatus(response.status().as_u16()));
        }

        Ok(())
    }
}
