//! Response consumption loop.
//!
//! Receives result signals from the subscriber and hands each one to
//! [`Coordinator::handle_response`]. A bad message is logged and skipped;
//! nothing in here stops the loop except cancellation or the end of the
//! subscription. A subscription that ends before cancellation is an error,
//! since no job dispatched afterwards could ever be correlated.
//!
//! On cancellation the subscription is closed first and whatever the broker
//! already delivered is still processed before the loop exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::QueueSubscriber;
use crate::coordinator::Coordinator;
use crate::response::InboundMessage;
use crate::service::Service;

/// Upper bound on how long shutdown waits for already-delivered messages.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-running service that correlates inbound responses to jobs.
pub struct ResponseConsumer {
    coordinator: Arc<Coordinator>,
    subscriber: Box<dyn QueueSubscriber>,
    drain_timeout: Duration,
}

impl ResponseConsumer {
    pub fn new(coordinator: Arc<Coordinator>, subscriber: Box<dyn QueueSubscriber>) -> Self {
        Self {
            coordinator,
            subscriber,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

async fn process(coordinator: &Coordinator, message: &InboundMessage) {
    match coordinator.handle_response(message).await {
        Ok(state) => debug!(state = %state, "job response applied"),
        Err(reason) => warn!(reason = %reason, "discarding job response"),
    }
}

#[async_trait]
impl Service for ResponseConsumer {
    fn name(&self) -> &'static str {
        "response-consumer"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let ResponseConsumer {
            coordinator,
            mut subscriber,
            drain_timeout,
        } = *self;

        info!("response consumer starting");

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = subscriber.next() => message,
            };

            match message {
                // Handling is not raced against cancellation, so a message
                // that was received is always fully processed.
                Some(message) => process(&coordinator, &message).await,
                None => {
                    if let Err(e) = subscriber.close().await {
                        warn!(error = %e, "failed to close response subscription");
                    }
                    bail!("response subscription ended");
                }
            }
        }

        if let Err(e) = subscriber.close().await {
            warn!(error = %e, "failed to close response subscription");
        }

        let drained = tokio::time::timeout(drain_timeout, async {
            let mut count = 0usize;
            while let Some(message) = subscriber.next().await {
                process(&coordinator, &message).await;
                count += 1;
            }
            count
        })
        .await;

        match drained {
            Ok(count) => info!(drained = count, "response consumer stopped"),
            Err(_) => warn!(
                timeout_secs = drain_timeout.as_secs(),
                "timed out draining response subscription"
            ),
        }
        Ok(())
    }
}
