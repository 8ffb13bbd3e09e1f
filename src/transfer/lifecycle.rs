//! Lifecycle guard: snapshot on teardown, rehydrate on boot.
//!
//! In-flight transfers cannot survive a process exit, so on teardown every
//! non-terminal record is written to durable storage as `paused`. On the next
//! boot those records come back paused and wait for the user to resume or
//! discard them. Nothing is ever resumed automatically, and the snapshot is
//! only replaced by a newer one, never cleared.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::models::{TransferKind, TransferRecord, TransferStatus};
use super::registry::RegistryStore;
use crate::storage::KvStore;

/// Counts returned by [`LifecycleGuard::boot`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub restored: usize,
    pub skipped: usize,
}

pub struct LifecycleGuard {
    registry: Arc<RegistryStore>,
    store: Arc<dyn KvStore>,
    booted: AtomicBool,
}

impl LifecycleGuard {
    pub fn new(registry: Arc<RegistryStore>, store: Arc<dyn KvStore>) -> Self {
        Self {
            registry,
            store,
            booted: AtomicBool::new(false),
        }
    }

    /// Write every non-terminal record to storage as paused.
    ///
    /// Returns the number of records written.
    pub fn teardown(&self) -> Result<usize> {
        let written = self.persist()?;
        if written > 0 {
            info!("Snapshotted {} paused transfer(s)", written);
        }
        Ok(written)
    }

    fn persist(&self) -> Result<usize> {
        let mut written = 0;
        for kind in TransferKind::ALL {
            let snapshot = snapshot_records(self.registry.records_of(kind));
            let json = serde_json::to_string(&snapshot)
                .with_context(|| format!("Failed to serialize {} snapshot", kind))?;
            self.store
                .set(kind.storage_key(), &json)
                .with_context(|| format!("Failed to persist {} snapshot", kind))?;
            written += snapshot.len();
        }
        Ok(written)
    }

    /// Restore snapshotted records into the registry as paused. Only the
    /// first call does anything.
    ///
    /// The restored set is written back right away, so an exit that skips
    /// [`LifecycleGuard::teardown`] does not lose the paused rows.
    pub fn boot(&self) -> Result<BootReport> {
        if self.booted.swap(true, Ordering::SeqCst) {
            debug!("Lifecycle guard already booted");
            return Ok(BootReport::default());
        }

        let mut report = BootReport::default();
        for kind in TransferKind::ALL {
            let Some(json) = self
                .store
                .get(kind.storage_key())
                .with_context(|| format!("Failed to read {} snapshot", kind))?
            else {
                continue;
            };

            match serde_json::from_str::<Vec<TransferRecord>>(&json) {
                Ok(records) => {
                    for record in records {
                        if record.kind != kind || record.id.is_empty() {
                            warn!("Ignoring misplaced snapshot entry {}", record.key());
                            report.skipped += 1;
                            continue;
                        }
                        if self.registry.rehydrate(record) {
                            report.restored += 1;
                        } else {
                            report.skipped += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("Discarding unreadable {} snapshot: {}", kind, e);
                }
            }
        }

        // Drops unreadable or misplaced entries from storage as well.
        self.persist()?;

        if report.restored > 0 {
            info!("Restored {} paused transfer(s)", report.restored);
        }
        Ok(report)
    }

    /// Read the persisted snapshot of a kind without touching the registry.
    pub fn stored_records(&self, kind: TransferKind) -> Result<Vec<TransferRecord>> {
        let Some(json) = self.store.get(kind.storage_key())? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {} snapshot", kind))
    }
}

/// Non-terminal records rewritten as paused, one per id, latest update wins.
fn snapshot_records(records: Vec<TransferRecord>) -> Vec<TransferRecord> {
    let mut by_id: HashMap<String, TransferRecord> = HashMap::new();
    for mut record in records {
        if record.status.is_terminal() {
            continue;
        }
        record.status = TransferStatus::Paused;
        record.session = None;

        match by_id.get(&record.id) {
            Some(existing) if existing.updated_at > record.updated_at => {}
            _ => {
                by_id.insert(record.id.clone(), record);
            }
        }
    }

    let mut snapshot: Vec<_> = by_id.into_values().collect();
    snapshot.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
    snapshot
}
