//! NATS-backed queue adapters.
//!
//! Job types map directly onto NATS subjects. Correlation metadata travels as
//! message headers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use super::{QueuePublisher, QueueSubscriber};
use crate::response::{InboundMessage, Metadata, CORRELATION_KEY};

/// Connect to the broker at `url`.
pub async fn connect(url: &str) -> Result<async_nats::Client> {
    let client = async_nats::connect(url)
        .await
        .with_context(|| format!("failed to connect to NATS at {url}"))?;
    info!(url = %url, "connected to NATS");
    Ok(client)
}

/// Publishes jobs to the subject named by their type.
pub struct NatsQueuePublisher {
    client: async_nats::Client,
}

impl NatsQueuePublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueuePublisher for NatsQueuePublisher {
    async fn publish(&self, destination: &str, metadata: Metadata, payload: Bytes) -> Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Content-Type", "application/json");
        for (key, value) in metadata {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            headers.insert(key.as_str(), value.as_str());
        }

        self.client
            .publish_with_headers(destination.to_string(), headers, payload)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.flush().await?;
        Ok(())
    }
}

/// Subscription on the response subject.
pub struct NatsQueueSubscriber {
    subscriber: async_nats::Subscriber,
    subject: String,
}

impl NatsQueueSubscriber {
    /// Subscribe to `subject` on `client`.
    pub async fn subscribe(client: &async_nats::Client, subject: &str) -> Result<Self> {
        let subscriber = client
            .subscribe(subject.to_string())
            .await
            .with_context(|| format!("failed to subscribe to {subject}"))?;
        info!(subject = %subject, "subscribed to job responses");

        Ok(Self {
            subscriber,
            subject: subject.to_string(),
        })
    }
}

#[async_trait]
impl QueueSubscriber for NatsQueueSubscriber {
    async fn next(&mut self) -> Option<InboundMessage> {
        let message = self.subscriber.next().await?;

        let mut metadata = Metadata::new();
        if let Some(job_id) = message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(CORRELATION_KEY))
        {
            metadata.insert(
                CORRELATION_KEY.to_string(),
                serde_json::Value::String(job_id.as_str().to_string()),
            );
        }

        Some(InboundMessage::new(metadata, message.payload))
    }

    async fn close(&mut self) -> Result<()> {
        debug!(subject = %self.subject, "draining subscription");
        self.subscriber.drain().await?;
        Ok(())
    }
}
