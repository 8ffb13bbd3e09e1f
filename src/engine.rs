//! Engine wiring.
//!
//! Owns one registry and everything that reads or writes it: the
//! orchestrator, the catalog reconciler, the expiry sweeper and the
//! lifecycle guard. `init` runs once at startup, `shutdown` once on exit.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catalog::{CatalogReconciler, ReconcilerOptions};
use crate::config::{AppConfig, ReconcilerSettings, TransferSettings};
use crate::storage::{KvStore, SqliteKvStore};
use crate::transfer::{
    BootReport, Clock, ExpirySweeper, FixedCapacityPolicy, HttpTransport, LifecycleGuard,
    RegistryStore, SweeperConfig, SystemClock, TransferOrchestrator, Transport,
};

pub struct TransferEngine {
    registry: Arc<RegistryStore>,
    orchestrator: Arc<TransferOrchestrator>,
    reconciler: Arc<CatalogReconciler>,
    sweeper: Arc<ExpirySweeper>,
    lifecycle: LifecycleGuard,
    shutdown_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransferEngine {
    pub fn new(
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KvStore>,
        transfers: &TransferSettings,
        reconciler: &ReconcilerSettings,
    ) -> Self {
        let registry = Arc::new(RegistryStore::new(clock));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            registry.clone(),
            transport,
            Arc::new(FixedCapacityPolicy::new(transfers)),
        ));
        let sweeper = Arc::new(
            ExpirySweeper::new(registry.clone(), SweeperConfig::new(transfers))
                .with_abandon_handler(orchestrator.clone()),
        );
        let reconciler = Arc::new(CatalogReconciler::new(
            registry.clone(),
            ReconcilerOptions::new(reconciler),
        ));
        let lifecycle = LifecycleGuard::new(registry.clone(), store);

        Self {
            registry,
            orchestrator,
            reconciler,
            sweeper,
            lifecycle,
            shutdown_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Engine talking HTTP to `config.server_url`, persisting to `config.db_path`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        info!("Opening transfer store at {:?}...", config.db_path);
        let store = SqliteKvStore::new(&config.db_path)
            .with_context(|| format!("Failed to open transfer store {:?}", config.db_path))?;
        let transport = HttpTransport::new(config.server_url.clone(), config.request_timeout())?;
        Ok(Self::new(
            Arc::new(SystemClock),
            Arc::new(transport),
            Arc::new(store),
            &config.transfers,
            &config.reconciler,
        ))
    }

    pub fn registry(&self) -> &Arc<RegistryStore> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    pub fn reconciler(&self) -> &Arc<CatalogReconciler> {
        &self.reconciler
    }

    pub fn sweeper(&self) -> &Arc<ExpirySweeper> {
        &self.sweeper
    }

    pub fn lifecycle(&self) -> &LifecycleGuard {
        &self.lifecycle
    }

    /// Rehydrate paused transfers and start the background tasks.
    pub fn init(&self) -> Result<BootReport> {
        let report = self.lifecycle.boot()?;
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if tasks.is_empty() && !self.shutdown_token.is_cancelled() {
            tasks.push(self.reconciler.clone().spawn(self.shutdown_token.child_token()));
            tasks.push(self.sweeper.clone().spawn(self.shutdown_token.child_token()));
        }
        Ok(report)
    }

    /// Stop every pump, snapshot in-flight transfers as paused and wait for
    /// the background tasks. Returns the number of records snapshotted.
    pub async fn shutdown(&self) -> Result<usize> {
        self.orchestrator.shutdown();
        let written = self.lifecycle.teardown();
        self.shutdown_token.cancel();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKvStore;
    use crate::transfer::{
        FrameStream, ManualClock, TransferKind, TransferRequest, TransferResource,
        TransferStatus, TransportError,
    };
    use async_trait::async_trait;

    /// Streams that never yield.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn open(&self, _request: &TransferRequest) -> Result<FrameStream, TransportError> {
            Ok(Box::pin(futures::stream::pending()))
        }

        async fn abort(&self, _request: &TransferRequest) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn engine(store: Arc<dyn KvStore>) -> TransferEngine {
        TransferEngine::new(
            Arc::new(ManualClock::new(1_000)),
            Arc::new(SilentTransport),
            store,
            &TransferSettings::default(),
            &ReconcilerSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_shutdown_snapshots_and_next_init_restores_paused() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());

        let first = engine(store.clone());
        first.init().unwrap();
        first
            .orchestrator()
            .start(TransferResource::new(TransferKind::Model, "m1", "m1"))
            .unwrap();
        assert_eq!(first.shutdown().await.unwrap(), 1);
        assert!(first
            .orchestrator()
            .start(TransferResource::new(TransferKind::Model, "m2", "m2"))
            .is_err());

        let second = engine(store);
        let report = second.init().unwrap();
        assert_eq!(report.restored, 1);
        let records = second.registry().snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransferStatus::Paused);
        second.shutdown().await.unwrap();
    }
}
