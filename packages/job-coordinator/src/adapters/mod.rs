//! Adapter boundaries for the queue and the state store.
//!
//! These are INFRASTRUCTURE traits only. The coordinator talks to the broker
//! and the key-value store exclusively through them, which lets tests swap in
//! the in-memory versions from [`crate::testing`].
//!
//! Adapters own their I/O timeout policy; the coordinator adds none.

pub mod nats;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::job::Job;
use crate::response::{InboundMessage, Metadata};

pub use self::nats::{NatsQueuePublisher, NatsQueueSubscriber};
pub use self::redis::RedisStateStore;

/// Key-value store that mirrors job snapshots.
///
/// Writes are plain overwrites keyed by job id with no expiry. The coordinator
/// never reads back from the store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Overwrite the snapshot stored under `key`.
    async fn put(&self, key: &str, snapshot: &Job) -> Result<()>;

    /// Release connections. Called once during shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Publishes outbound work to a named destination.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Enqueue `payload` on `destination` with `metadata` attached.
    ///
    /// Success means the broker accepted the message; there is no further
    /// delivery acknowledgment.
    async fn publish(&self, destination: &str, metadata: Metadata, payload: Bytes) -> Result<()>;

    /// Flush and release the connection. Called once during shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Delivers inbound messages from a single fixed destination.
///
/// Messages are considered delivered on receipt (auto-ack).
#[async_trait]
pub trait QueueSubscriber: Send {
    /// Wait for the next message. `None` means the subscription ended.
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    async fn next(&mut self) -> Option<InboundMessage>;

    /// Stop the subscription, consuming anything the broker already sent.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
