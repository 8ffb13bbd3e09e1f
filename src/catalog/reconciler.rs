//! Catalog reconciler.
//!
//! Keeps every registered catalog view consistent with the transfer registry
//! without re-fetching from origin. Registry change events are collected per
//! view and flushed through a [`TrailingThrottle`]: the first change in a
//! quiet period is applied immediately, later ones are merged and applied
//! once the interval has passed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::models::CatalogQuery;
use super::source::CatalogSource;
use super::throttle::{ThrottleDecision, TrailingThrottle};
use super::view::{CatalogView, ViewConfig, ViewSnapshot};
use crate::config::ReconcilerSettings;
use crate::transfer::{RegistryEvent, RegistryStore, TransferKey};

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub throttle_interval: Duration,
    pub page_size: usize,
}

impl ReconcilerOptions {
    pub fn new(config: &ReconcilerSettings) -> Self {
        Self {
            throttle_interval: Duration::from_millis(config.throttle_interval_ms),
            page_size: config.page_size,
        }
    }
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::new(&ReconcilerSettings::default())
    }
}

struct ViewSlot {
    view: CatalogView,
    source: Arc<dyn CatalogSource>,
    search: Option<String>,
    throttle: TrailingThrottle,
    pending: HashSet<TransferKey>,
    revision_tx: watch::Sender<u64>,
}

impl ViewSlot {
    fn publish(&self) {
        self.revision_tx.send_replace(self.view.revision());
    }

    /// Apply every pending key. Returns true if the view changed.
    fn flush(&mut self, registry: &RegistryStore) -> bool {
        let mut changed = false;
        for key in self.pending.drain() {
            changed |= match registry.get(&key) {
                Some(record) => self.view.reconcile(&record),
                None => self.view.release(&key.id),
            };
        }
        if changed {
            self.publish();
        }
        changed
    }
}

pub struct CatalogReconciler {
    registry: Arc<RegistryStore>,
    config: ReconcilerOptions,
    views: Mutex<HashMap<String, ViewSlot>>,
}

impl CatalogReconciler {
    pub fn new(registry: Arc<RegistryStore>, config: ReconcilerOptions) -> Self {
        Self {
            registry,
            config,
            views: Mutex::new(HashMap::new()),
        }
    }

    fn views(&self) -> MutexGuard<'_, HashMap<String, ViewSlot>> {
        self.views
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a view and the source it pages through.
    pub fn register_view(&self, config: ViewConfig, source: Arc<dyn CatalogSource>) -> Result<()> {
        let mut views = self.views();
        if views.contains_key(&config.name) {
            bail!("Catalog view '{}' is already registered", config.name);
        }
        debug!("Registering catalog view '{}' ({})", config.name, config.kind);
        let (revision_tx, _) = watch::channel(0);
        views.insert(
            config.name.clone(),
            ViewSlot {
                view: CatalogView::new(config.clone()),
                source,
                search: None,
                throttle: TrailingThrottle::new(self.config.throttle_interval),
                pending: HashSet::new(),
                revision_tx,
            },
        );
        Ok(())
    }

    pub fn view_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.views().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn view_snapshot(&self, name: &str) -> Option<ViewSnapshot> {
        self.views().get(name).map(|slot| slot.view.snapshot())
    }

    /// Watch the revision counter of a view. It moves on every visible change.
    pub fn subscribe_view(&self, name: &str) -> Option<watch::Receiver<u64>> {
        self.views().get(name).map(|slot| slot.revision_tx.subscribe())
    }

    /// Change the search filter of a view. Drops loaded rows; call
    /// [`CatalogReconciler::load_next_page`] to refill.
    pub fn set_search(&self, name: &str, search: Option<String>) -> Result<()> {
        let mut views = self.views();
        let slot = views
            .get_mut(name)
            .with_context(|| format!("Unknown catalog view '{}'", name))?;
        if slot.search == search {
            return Ok(());
        }
        slot.search = search;
        slot.view.clear();
        slot.pending.clear();
        slot.publish();
        Ok(())
    }

    /// Fetch the next page of a view and overlay the current registry state
    /// before it becomes visible. Returns the number of rows added.
    pub async fn load_next_page(&self, name: &str) -> Result<usize> {
        let (source, query) = {
            let views = self.views();
            let slot = views
                .get(name)
                .with_context(|| format!("Unknown catalog view '{}'", name))?;
            if !slot.view.has_more() {
                return Ok(0);
            }
            let query = CatalogQuery {
                page: slot.view.pages_loaded() + 1,
                page_size: self.config.page_size,
                search: slot.search.clone(),
            };
            (slot.source.clone(), query)
        };

        // No lock across the fetch.
        let mut page = source
            .fetch_page(&query)
            .await
            .with_context(|| format!("Failed to fetch page {} of view '{}'", query.page, name))?;

        let mut views = self.views();
        let slot = views
            .get_mut(name)
            .with_context(|| format!("Catalog view '{}' was removed", name))?;
        if slot.view.pages_loaded() + 1 != query.page || slot.search != query.search {
            debug!("Dropping stale page {} of view '{}'", query.page, name);
            return Ok(0);
        }

        let kind = slot.view.kind();
        for entry in page.entries.iter_mut() {
            if let Some(record) = self.registry.get(&TransferKey::new(kind, entry.id.clone())) {
                entry.apply(&record);
            }
        }
        let added = slot.view.append_page(page);
        slot.publish();
        debug!("View '{}' loaded page {} (+{} rows)", name, query.page, added);
        Ok(added)
    }

    /// Record a registry change at `now`. Views whose throttle is open are
    /// patched right away, the others at their next deadline.
    pub fn note_change(&self, key: TransferKey, now: Instant) {
        let mut views = self.views();
        for slot in views.values_mut().filter(|s| s.view.kind() == key.kind) {
            slot.pending.insert(key.clone());
            if slot.throttle.request(now) == ThrottleDecision::FireNow {
                slot.flush(&self.registry);
            }
        }
    }

    /// Flush every view whose trailing deadline has passed. Returns the number
    /// of views that changed.
    pub fn flush_due(&self, now: Instant) -> usize {
        let mut views = self.views();
        let mut changed = 0;
        for slot in views.values_mut() {
            if slot.throttle.poll_due(now) && slot.flush(&self.registry) {
                changed += 1;
            }
        }
        changed
    }

    /// Earliest pending trailing deadline across views.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.views()
            .values()
            .filter_map(|slot| slot.throttle.deadline())
            .min()
    }

    /// Reconcile one key in every view immediately, bypassing the throttle.
    /// Returns the number of views that changed.
    pub fn reconcile_entry(&self, key: &TransferKey) -> usize {
        let record = self.registry.get(key);
        let mut views = self.views();
        let mut changed = 0;
        for slot in views.values_mut().filter(|s| s.view.kind() == key.kind) {
            slot.pending.remove(key);
            let view_changed = match &record {
                Some(record) => slot.view.reconcile(record),
                None => slot.view.release(&key.id),
            };
            if view_changed {
                slot.publish();
                changed += 1;
            }
        }
        changed
    }

    /// Full pass over the registry, used after a subscriber lagged.
    pub fn resync_all(&self) -> usize {
        let records = self.registry.snapshot();
        let mut views = self.views();
        let mut changed = 0;
        for slot in views.values_mut() {
            slot.pending.clear();
            let kind = slot.view.kind();
            let mut view_changed = false;
            for record in records.iter().filter(|r| r.kind == kind) {
                view_changed |= slot.view.reconcile(record);
            }
            let untracked: Vec<String> = slot
                .view
                .entries()
                .iter()
                .filter(|e| e.status.is_some())
                .filter(|e| !records.iter().any(|r| r.kind == kind && r.id == e.id))
                .map(|e| e.id.clone())
                .collect();
            for id in untracked {
                view_changed |= slot.view.release(&id);
            }
            if view_changed {
                slot.publish();
                changed += 1;
            }
        }
        changed
    }

    /// Follow the registry until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        // Subscribe before spawning so no event between here and the first
        // poll is missed.
        let mut events = self.registry.subscribe();
        tokio::spawn(async move {
            info!("Catalog reconciler started");
            self.resync_all();
            loop {
                let deadline = self.next_deadline();
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => self.handle_event(event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Catalog reconciler lagged by {} events, resyncing", n);
                            self.resync_all();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Registry event channel closed");
                            break;
                        }
                    },
                    _ = sleep_until_deadline(deadline) => {
                        self.flush_due(Instant::now());
                    }
                    _ = shutdown.cancelled() => {
                        break;
                    }
                }
            }
            info!("Catalog reconciler stopped");
        })
    }

    fn handle_event(&self, event: RegistryEvent) {
        self.note_change(event.key(), Instant::now());
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
