//! Long-running services and their shared shutdown.
//!
//! Every service receives the same [`CancellationToken`] and is expected to
//! poll it at its iteration boundaries. [`ServiceHost::start`] spawns the
//! services and returns a [`HostHandle`] whose [`HostHandle::shutdown`]
//! cancels the token, waits for every service to finish its current work,
//! then releases the coordinator's adapters.
//!
//! Services are expected to run until the token is cancelled. A service that
//! stops on its own before cancellation, successfully or not, cancels the
//! token as well so the whole process comes down in order.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::coordinator::Coordinator;

/// A long-running background service.
#[async_trait]
pub trait Service: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled or a fatal error occurs.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Collects services that run against one coordinator.
pub struct ServiceHost {
    coordinator: Arc<Coordinator>,
    services: Vec<Box<dyn Service>>,
    shutdown: CancellationToken,
}

impl ServiceHost {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            services: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_service(mut self, service: impl Service + 'static) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Spawn every service on the current runtime.
    ///
    /// Each service runs in its own task, watched by a supervisor task that
    /// cancels the shared token when the service ends abnormally.
    pub fn start(self) -> HostHandle {
        let mut tasks = Vec::with_capacity(self.services.len());

        for service in self.services {
            let name = service.name();
            let shutdown = self.shutdown.clone();
            let service_task = tokio::spawn(service.run(shutdown.clone()));

            let task = tokio::spawn(supervise(name, service_task, shutdown));
            tasks.push((name, task));
        }

        info!(services = tasks.len(), "services started");

        HostHandle {
            coordinator: self.coordinator,
            shutdown: self.shutdown,
            tasks: Mutex::new(Some(tasks)),
        }
    }
}

async fn supervise(
    name: &'static str,
    service_task: JoinHandle<Result<()>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let result = match service_task.await {
        Ok(result) => result,
        Err(e) => Err(anyhow!("service task panicked: {e}")),
    };

    match &result {
        Err(e) => {
            error!(service = name, error = %e, "service failed, shutting down");
            shutdown.cancel();
        }
        Ok(()) if !shutdown.is_cancelled() => {
            error!(service = name, "service stopped before shutdown was requested, shutting down");
            shutdown.cancel();
        }
        Ok(()) => {}
    }
    result
}

type ServiceTasks = Vec<(&'static str, JoinHandle<Result<()>>)>;

/// Handle to running services.
pub struct HostHandle {
    coordinator: Arc<Coordinator>,
    shutdown: CancellationToken,
    /// `None` once the services were joined and the adapters released.
    tasks: Mutex<Option<ServiceTasks>>,
}

impl HostHandle {
    /// The token shared by every service.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Resolves once shutdown was requested or a service stopped on its own.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Stop every service and release the adapters.
    ///
    /// Safe to call more than once and from several tasks. Every caller
    /// returns only after the services stopped and the adapters were
    /// released, which happens exactly once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        // Held across the join and the release so concurrent callers queue
        // behind the first one.
        let mut tasks = self.tasks.lock().await;
        let Some(running) = tasks.take() else {
            return;
        };

        for (name, task) in running {
            match task.await {
                Ok(Ok(())) => info!(service = name, "service stopped"),
                Ok(Err(e)) => error!(service = name, error = %e, "service exited with error"),
                Err(e) => error!(service = name, error = %e, "service supervisor panicked"),
            }
        }

        self.coordinator.close_adapters().await;
        info!("adapters released");
    }
}
