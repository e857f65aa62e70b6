//! Redis-backed state store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use super::StateStore;
use crate::job::Job;

/// Stores job snapshots as JSON strings, one key per job.
#[derive(Clone)]
pub struct RedisStateStore {
    connection: MultiplexedConnection,
}

impl RedisStateStore {
    /// Open a multiplexed connection to the store at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("invalid Redis address {url}"))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .with_context(|| format!("failed to connect to Redis at {url}"))?;
        info!(url = %url, "connected to Redis");

        Ok(Self { connection })
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn put(&self, key: &str, snapshot: &Job) -> Result<()> {
        let value = serde_json::to_string(snapshot)?;
        let mut connection = self.connection.clone();
        connection.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}
