use std::future::Future;
use std::time::Duration;

use log::info;
use reqwest::Client;
use serde_json::json;

use super::dispatcher::DispatchError;

/// Where formatted messages end up.
pub trait DeliverySink: Send + Sync + 'static {
    fn deliver(&self, content: String) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// Posts `{"content": ...}` to a Discord-style webhook.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl DeliverySink for WebhookSink {
    fn deliver(&self, content: String) -> impl Future<Output = Result<(), DispatchError>> + Send {
        async move {
            let response = self
                .client
                .post(&self.url)
                .json(&json!({ "content": content }))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(DispatchError::Status(status.as_u16()));
            }
            Ok(())
        }
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DeliverySink for LogSink {
    fn deliver(&self, content: String) -> impl Future<Output = Result<(), DispatchError>> + Send {
        info!("[dry-run] {}", content.trim_end());
        async { Ok(()) }
    }
}
