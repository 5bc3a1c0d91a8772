//! Server lifecycle.
//!
//! Owns the dispatch service, seeds configured stubs on start and exposes
//! readiness and shutdown to whatever hosts it.

use crate::config::MockServerConfig;
use crate::error::{MockError, MockResult};
use crate::service::DispatchService;
use crate::store::{InMemoryStubStore, StubStore};
use crate::telemetry::Logger;
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Ready,
    Stopped,
}

/// Stub dispatch server.
pub struct MockServer {
    config: MockServerConfig,
    service: Arc<DispatchService>,
    logger: Logger,
    lifecycle: watch::Sender<Lifecycle>,
}

impl MockServer {
    /// Server backed by an in-memory store.
    pub fn new(config: MockServerConfig, logger: Logger) -> Self {
        let store = Arc::new(InMemoryStubStore::new(config.store.clone()));
        Self::with_store(config, store, logger)
    }

    pub fn with_store(config: MockServerConfig, store: Arc<dyn StubStore>, logger: Logger) -> Self {
        let service = Arc::new(DispatchService::new(
            store,
            config.settings.clone(),
            logger.clone(),
        ));
        let (lifecycle, _) = watch::channel(Lifecycle::Starting);
        Self {
            config,
            service,
            logger,
            lifecycle,
        }
    }

    pub fn service(&self) -> Arc<DispatchService> {
        Arc::clone(&self.service)
    }

    pub fn state(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == Lifecycle::Ready
    }

    /// Check the store, define configured stubs and become ready.
    ///
    /// On failure the server moves to `Stopped`.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.state() != Lifecycle::Starting {
            anyhow::bail!("server already started ({:?})", self.state());
        }

        match self.seed().await {
            Ok(count) => {
                self.lifecycle.send_replace(Lifecycle::Ready);
                self.logger.scope(|| {
                    info!(
                        backend = self.service.store().backend_name(),
                        stubs = count,
                        "Stub dispatch server ready"
                    )
                });
                Ok(())
            }
            Err(err) => {
                self.logger
                    .scope(|| error!(error = %err, "Stub dispatch server failed to start"));
                self.shutdown();
                Err(err)
            }
        }
    }

    async fn seed(&self) -> anyhow::Result<usize> {
        let store = self.service.store();
        store
            .health_check()
            .await
            .with_context(|| format!("{} store health check failed", store.backend_name()))?;

        for spec in &self.config.stubs {
            self.service
                .define(spec)
                .await
                .with_context(|| format!("Failed to define stub {}", spec.url))?;
        }
        Ok(self.config.stubs.len())
    }

    /// Wait until the server is ready. Fails if it stops first.
    pub async fn ready(&self) -> MockResult<()> {
        let mut rx = self.lifecycle.subscribe();
        let state = *rx
            .wait_for(|state| *state != Lifecycle::Starting)
            .await
            .map_err(|_| MockError::ShuttingDown)?;
        match state {
            Lifecycle::Ready => Ok(()),
            _ => Err(MockError::ShuttingDown),
        }
    }

    /// Stop serving. Pending rule delays end with `ShuttingDown`.
    pub fn shutdown(&self) {
        self.service.shutdown();
        if self.lifecycle.send_replace(Lifecycle::Stopped) != Lifecycle::Stopped {
            self.logger.scope(|| info!("Stub dispatch server stopped"));
        }
    }
}
