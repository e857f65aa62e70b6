//! In-memory adapters for tests.
//!
//! [`TestQueue`] records published messages and [`TestStore`] records
//! persisted snapshots so tests can inspect side effects without a broker or
//! a Redis instance. [`response_channel`] produces a subscriber fed by an
//! in-process sender.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::adapters::{QueuePublisher, QueueSubscriber, StateStore};
use crate::job::{Job, JobId};
use crate::response::{InboundMessage, JobResponse, Metadata, CORRELATION_KEY};

/// A message captured by [`TestQueue`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub destination: String,
    pub metadata: Metadata,
    pub payload: Bytes,
}

impl PublishedMessage {
    /// The `jobID` attached as correlation metadata, if any.
    pub fn job_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_KEY).and_then(|v| v.as_str())
    }

    /// Decode the payload as a job snapshot.
    pub fn job(&self) -> std::result::Result<Job, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Queue publisher that tracks published messages.
pub struct TestQueue {
    published: RwLock<Vec<PublishedMessage>>,
    failing: RwLock<HashSet<String>>,
    paused: watch::Sender<bool>,
    pending: AtomicUsize,
    closed: AtomicUsize,
}

impl Default for TestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TestQueue {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            published: RwLock::new(Vec::new()),
            failing: RwLock::new(HashSet::new()),
            paused,
            pending: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    /// Make every publish to `destination` fail.
    pub fn fail_destination(&self, destination: impl Into<String>) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(destination.into());
    }

    /// Let publishes to `destination` succeed again.
    pub fn recover_destination(&self, destination: &str) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(destination);
    }

    /// Hold every publish until [`TestQueue::resume`] is called.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Number of publishes currently waiting on [`TestQueue::pause`].
    pub fn pending_publishes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn messages_for(&self, destination: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.destination == destination)
            .cloned()
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueuePublisher for TestQueue {
    async fn publish(&self, destination: &str, metadata: Metadata, payload: Bytes) -> Result<()> {
        let mut paused = self.paused.subscribe();
        let is_paused = *paused.borrow();
        if is_paused {
            self.pending.fetch_add(1, Ordering::SeqCst);
            let _ = paused.wait_for(|p| !*p).await;
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }

        if self
            .failing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(destination)
        {
            bail!("destination {destination} is unavailable");
        }

        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                destination: destination.to_string(),
                metadata,
                payload,
            });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// State store that keeps every write in memory.
#[derive(Default)]
pub struct TestStore {
    writes: RwLock<Vec<(String, Job)>>,
    latest: RwLock<HashMap<String, Job>>,
    failing: AtomicBool,
    closed: AtomicUsize,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle failure of every subsequent `put`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The last snapshot written for `job_id`.
    pub fn snapshot(&self, job_id: JobId) -> Option<Job> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id.to_string())
            .cloned()
    }

    /// Every snapshot written for `job_id`, oldest first.
    pub fn history(&self, job_id: JobId) -> Vec<Job> {
        let key = job_id.to_string();
        self.writes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, job)| job.clone())
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for TestStore {
    async fn put(&self, key: &str, snapshot: &Job) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }

        self.writes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.to_string(), snapshot.clone()));
        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sending half of an in-memory response subscription.
#[derive(Clone)]
pub struct ResponseInjector {
    sender: mpsc::UnboundedSender<InboundMessage>,
}

impl ResponseInjector {
    /// Deliver a raw message. Returns `false` once the subscriber is closed.
    pub fn send(&self, message: InboundMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Deliver `response` correlated to `job_id`.
    pub fn respond(&self, job_id: JobId, response: JobResponse) -> bool {
        match response.into_message(job_id) {
            Ok(message) => self.send(message),
            Err(_) => false,
        }
    }
}

/// Subscriber fed by a [`ResponseInjector`].
pub struct TestSubscriber {
    receiver: mpsc::UnboundedReceiver<InboundMessage>,
    closed: Arc<AtomicUsize>,
}

impl TestSubscriber {
    /// Shared counter of `close` calls, readable after the subscriber moved.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.closed.clone()
    }
}

#[async_trait]
impl QueueSubscriber for TestSubscriber {
    async fn next(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.receiver.close();
        Ok(())
    }
}

/// Create a connected injector/subscriber pair.
pub fn response_channel() -> (ResponseInjector, TestSubscriber) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        ResponseInjector { sender },
        TestSubscriber {
            receiver,
            closed: Arc::new(AtomicUsize::new(0)),
        },
    )
}
