#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use transfer_engine::catalog::{
    CatalogEntry, CatalogReconciler, CatalogSource, StaticCatalogSource, ViewConfig,
};
use transfer_engine::config::{ReconcilerSettings, TransferSettings};
use transfer_engine::storage::{InMemoryKvStore, KvStore};
use transfer_engine::transfer::{
    RegistryStore, StartError, SystemClock, TransferKey, TransferKind, TransferRecord,
    TransferResource, TransferStatus,
};
use transfer_engine::TransferEngine;

use super::constants::*;
use super::transport::ScriptedTransport;

/// A fully wired engine over a [`ScriptedTransport`], with four catalog
/// views registered and their first page loaded.
pub struct TestEngine {
    pub engine: TransferEngine,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<dyn KvStore>,
}

fn catalog(kind: TransferKind, ids: &[&str]) -> Arc<dyn CatalogSource> {
    Arc::new(StaticCatalogSource::new(
        ids.iter()
            .map(|id| CatalogEntry::new(kind, *id, id.to_uppercase()))
            .collect(),
    ))
}

impl TestEngine {
    pub async fn spawn() -> Self {
        Self::with_settings(TransferSettings::default()).await
    }

    pub async fn with_settings(settings: TransferSettings) -> Self {
        Self::with_store(Arc::new(InMemoryKvStore::new()), settings).await
    }

    pub async fn with_store(store: Arc<dyn KvStore>, settings: TransferSettings) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = TransferEngine::new(
            Arc::new(SystemClock),
            transport.clone(),
            store.clone(),
            &settings,
            &ReconcilerSettings {
                throttle_interval_ms: THROTTLE_INTERVAL_MS,
                page_size: 10,
            },
        );
        engine.init().unwrap();

        let reconciler = engine.reconciler();
        reconciler
            .register_view(
                ViewConfig::new(VIEW_ALL, TransferKind::Model),
                catalog(TransferKind::Model, &CATALOG_MODEL_IDS),
            )
            .unwrap();
        reconciler
            .register_view(
                ViewConfig::new(VIEW_OWNED, TransferKind::Model),
                catalog(TransferKind::Model, &[]),
            )
            .unwrap();
        reconciler
            .register_view(
                ViewConfig::new(VIEW_MARKETPLACE, TransferKind::Model).without_synthesized(),
                catalog(TransferKind::Model, &CATALOG_MODEL_IDS),
            )
            .unwrap();
        reconciler
            .register_view(
                ViewConfig::new(VIEW_TOOLS, TransferKind::ToolPackage),
                catalog(TransferKind::ToolPackage, &[TOOL_1_ID]),
            )
            .unwrap();
        for view in reconciler.view_names() {
            reconciler.load_next_page(&view).await.unwrap();
        }

        Self {
            engine,
            transport,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<RegistryStore> {
        self.engine.registry()
    }

    pub fn reconciler(&self) -> &Arc<CatalogReconciler> {
        self.engine.reconciler()
    }

    pub fn start_model(&self, id: &str) -> Result<TransferRecord, StartError> {
        self.engine.orchestrator().start(
            TransferResource::new(TransferKind::Model, id, id.to_uppercase())
                .with_total_units(100),
        )
    }

    pub fn model_key(id: &str) -> TransferKey {
        TransferKey::new(TransferKind::Model, id)
    }

    /// Wait until the transport has opened `count` streams for `id`.
    pub async fn wait_for_open(&self, id: &str, count: usize) {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            while self.transport.open_count(id) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("stream for {} was never opened", id));
    }

    pub async fn shutdown(&self) -> usize {
        self.engine.shutdown().await.unwrap()
    }
}

/// Poll the registry until the record for `key` satisfies `predicate`.
pub async fn wait_for_record<P>(registry: &RegistryStore, key: &TransferKey, predicate: P) -> TransferRecord
where
    P: Fn(&TransferRecord) -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Some(record) = registry.get(key).filter(|r| predicate(r)) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never matched, last seen {:?}", key, registry.get(key)))
}

pub async fn wait_for_status(
    registry: &RegistryStore,
    key: &TransferKey,
    status: TransferStatus,
) -> TransferRecord {
    wait_for_record(registry, key, |r| r.status == status).await
}

/// Poll a view until the row for `id` satisfies `predicate`.
pub async fn wait_for_view<P>(
    reconciler: &CatalogReconciler,
    view: &str,
    id: &str,
    predicate: P,
) -> CatalogEntry
where
    P: Fn(&CatalogEntry) -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            let row = reconciler
                .view_snapshot(view)
                .and_then(|s| s.entries.into_iter().find(|e| e.id == id));
            if let Some(row) = row.filter(|e| predicate(e)) {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("row {} in view {} never matched", id, view))
}
