//! # Job Coordinator
//!
//! Periodically generates scrape jobs, dispatches them to a message queue for
//! external workers, and reconciles the workers' completion/failure signals
//! back into the job table.
//!
//! ## Architecture
//!
//! ```text
//!               ┌──────────────────── Coordinator ────────────────────┐
//!               │            job table (DashMap + entry locks)        │
//!               └──────▲──────────────────────────────────────▲───────┘
//!                      │ generate / queue                     │ complete / fail
//!               DispatchLoop                           ResponseConsumer
//!                      │                                      ▲
//!                      ▼ publish(type, {jobID}, snapshot)     │ (metadata, body)
//!               QueuePublisher ──► workers ──► "job-responses" QueueSubscriber
//!                      │
//!                      └──► StateStore.put(id, snapshot)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Unique ids** - The table never holds two jobs under one id
//! 2. **Forward only** - A terminal job never returns to `Created` or `Queued`
//! 3. **Serialized per job** - Transition + persist for one job never interleave
//! 4. **Message isolation** - A bad response is logged and skipped, never fatal
//! 5. **Tick isolation** - One failed publish does not stop its siblings or later ticks
//!
//! ## Guarantees
//!
//! - **In-memory authority**: the store is a best-effort mirror, never read back
//! - **At-least-once persistence**: a failed persist keeps the in-memory transition
//! - **Auto-ack delivery**: responses are not redelivered if processing fails
//! - **Bounded table**: finished jobs and jobs that never finish are evicted after a TTL
//! - **Ordered shutdown**: adapters are released once, after every service stopped
//! - **Fail together**: any service stopping on its own stops the host
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use job_coordinator::{Coordinator, DispatchConfig, DispatchLoop, ResponseConsumer, ServiceHost};
//!
//! let coordinator = Arc::new(Coordinator::new(publisher, store));
//!
//! let handle = ServiceHost::new(coordinator.clone())
//!     .with_service(DispatchLoop::new(coordinator.clone(), DispatchConfig::default()))
//!     .with_service(ResponseConsumer::new(coordinator.clone(), Box::new(subscriber)))
//!     .start();
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! ```

pub mod adapters;
pub mod config;
mod consumer;
mod coordinator;
mod error;
mod job;
mod response;
mod scheduler;
mod service;

// In-memory adapters for tests
pub mod testing;

pub use crate::adapters::{QueuePublisher, QueueSubscriber, StateStore};
pub use crate::config::Config;
pub use crate::consumer::{ResponseConsumer, DRAIN_TIMEOUT};
pub use crate::coordinator::Coordinator;
pub use crate::error::{CoordinatorError, DiscardReason};
pub use crate::job::{Job, JobId, JobState, Transition};
pub use crate::response::{
    correlation_metadata, InboundMessage, JobResponse, Metadata, ResponseOutcome,
    CORRELATION_KEY, RESPONSE_DESTINATION,
};
pub use crate::scheduler::{DispatchConfig, DispatchFailure, DispatchLoop, TickReport};
pub use crate::service::{HostHandle, Service, ServiceHost};
