//! In-memory registry of transfer records.
//!
//! The registry is the single source of truth for transfer state. Every
//! mutation happens inside one critical section and is published on a
//! broadcast channel so the reconciler (and any UI widget) can follow along
//! without polling. Durable persistence is handled separately by the
//! lifecycle guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::StartError;
use super::models::{
    ProgressDelta, TransferKey, TransferKind, TransferRecord, TransferResource, TransferStatus,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

const DEFAULT_FAILURE_MESSAGE: &str = "transfer failed";

/// Change notification published after every registry mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Upserted(TransferRecord),
    Removed(TransferKey),
}

impl RegistryEvent {
    pub fn key(&self) -> TransferKey {
        match self {
            RegistryEvent::Upserted(record) => record.key(),
            RegistryEvent::Removed(key) => key.clone(),
        }
    }
}

/// What the capacity policy gets to see when a start is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionContext {
    pub kind: TransferKind,
    /// Records of this kind currently queued or in progress.
    pub active: usize,
    /// The resource is already usable (re-pull of an installed resource).
    pub already_selectable: bool,
}

/// Result of [`RegistryStore::begin`].
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// A fresh session now owns the record.
    Started(TransferRecord),
    /// A session was already running; the existing record is returned untouched.
    AlreadyActive(TransferRecord),
}

pub struct RegistryStore {
    records: Mutex<HashMap<TransferKey, TransferRecord>>,
    events: broadcast::Sender<RegistryEvent>,
    clock: Arc<dyn Clock>,
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RegistryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(HashMap::new()),
            events,
            clock,
        }
    }

    /// Subscribe to change events. Subscribers that lag behind receive
    /// `RecvError::Lagged` and should resync from [`RegistryStore::snapshot`].
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransferKey, TransferRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: RegistryEvent) {
        // No receivers is fine, nobody is watching yet.
        let _ = self.events.send(event);
    }

    /// Claim a record for a new stream session.
    ///
    /// Admission and insertion happen under the same lock so concurrent
    /// starts cannot overshoot the capacity limit.
    ///
    /// # Arguments
    /// * `resource` - What to transfer
    /// * `session` - Id of the stream session that will own the record
    /// * `admit` - Capacity check, called only when a new session would start
    pub fn begin<F>(
        &self,
        resource: TransferResource,
        session: String,
        admit: F,
    ) -> Result<BeginOutcome, StartError>
    where
        F: FnOnce(&AdmissionContext) -> Result<(), StartError>,
    {
        let key = resource.key();
        let now = self.clock.now_millis();
        let mut records = self.lock();

        let existing = records.get(&key).cloned();
        if let Some(existing) = &existing {
            if existing.status.is_active() {
                debug!("Transfer {} already active, start is a no-op", key);
                return Ok(BeginOutcome::AlreadyActive(existing.clone()));
            }
        }

        let ctx = AdmissionContext {
            kind: key.kind,
            active: records
                .values()
                .filter(|r| r.kind == key.kind && r.status.is_active())
                .count(),
            already_selectable: resource.can_select
                || existing.as_ref().is_some_and(|r| r.can_select),
        };
        admit(&ctx)?;

        let mut record = TransferRecord::queued(resource, session, now);
        if let Some(previous) = existing {
            if previous.status == TransferStatus::Paused {
                // Resume keeps what was already fetched.
                record.completed_units = previous.completed_units;
                record.total_units = match (record.total_units, previous.total_units) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                record.progress = previous.progress;
                if record.resource.metadata.is_null() {
                    record.resource.metadata = previous.resource.metadata.clone();
                }
            }
            info!(
                "Restarting transfer {} (was {})",
                key,
                previous.status_label()
            );
        } else {
            info!("Starting transfer {}", key);
        }

        records.insert(key, record.clone());
        self.publish(RegistryEvent::Upserted(record.clone()));
        Ok(BeginOutcome::Started(record))
    }

    /// Move a freshly queued record to in progress.
    pub fn mark_in_progress(&self, key: &TransferKey, session: &str) -> Option<TransferRecord> {
        self.apply_delta(key, session, ProgressDelta::in_progress())
    }

    /// Merge one decoded frame into the record owned by `session`.
    ///
    /// Returns `None` when the frame was dropped: unknown record, foreign
    /// session, record no longer active, or a transition the state machine
    /// forbids.
    pub fn apply_delta(
        &self,
        key: &TransferKey,
        session: &str,
        delta: ProgressDelta,
    ) -> Option<TransferRecord> {
        let now = self.clock.now_millis();
        let mut records = self.lock();
        let current = records.get_mut(key)?;

        if current.session.as_deref() != Some(session) {
            debug!("Dropping frame for {} from stale session {}", key, session);
            return None;
        }
        if !current.status.is_active() || !current.status.can_transition_to(delta.status) {
            debug!(
                "Dropping {:?} frame for {} in status {:?}",
                delta.status, key, current.status
            );
            return None;
        }

        // Any accepted frame proves the stream is alive, even when it
        // changes nothing visible.
        current.last_event_at = now;

        let mut record = current.clone();
        record.merge_units(&delta);
        record.status = delta.status;

        match delta.status {
            TransferStatus::Completed => {
                record.can_select = true;
                record.progress = 100;
                match record.total_units {
                    Some(total) => record.completed_units = total,
                    None => record.total_units = Some(record.completed_units),
                }
                record.error = None;
                record.finished_at = Some(now);
                record.session = None;
                info!("Transfer {} completed", key);
            }
            TransferStatus::Failed => {
                let error = delta
                    .error
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                warn!("Transfer {} failed: {}", key, error);
                record.error = Some(error);
                record.error_acknowledged = false;
                record.finished_at = Some(now);
                record.session = None;
            }
            TransferStatus::Paused => {
                info!("Transfer {} paused by remote", key);
                record.session = None;
            }
            TransferStatus::Queued | TransferStatus::InProgress => {}
        }

        if record == *current {
            return Some(record);
        }
        record.updated_at = now;
        records.insert(key.clone(), record.clone());
        self.publish(RegistryEvent::Upserted(record.clone()));
        Some(record)
    }

    /// Revoke the session so any frame still in flight is ignored.
    ///
    /// Returns true if `session` owned the record.
    pub fn detach_session(&self, key: &TransferKey, session: &str) -> bool {
        let mut records = self.lock();
        match records.get_mut(key) {
            Some(record) if record.session.as_deref() == Some(session) => {
                record.session = None;
                true
            }
            _ => false,
        }
    }

    /// Force a non-terminal record into `Paused` or `Failed`, regardless of
    /// which session owns it. Used for cancellation and stale transfers.
    pub fn settle(
        &self,
        key: &TransferKey,
        status: TransferStatus,
        error: Option<String>,
    ) -> Option<TransferRecord> {
        self.settle_if(key, status, error, |_| true)
    }

    /// Like [`RegistryStore::settle`], but only when `predicate` holds for
    /// the current record.
    pub fn settle_if<P>(
        &self,
        key: &TransferKey,
        status: TransferStatus,
        error: Option<String>,
        predicate: P,
    ) -> Option<TransferRecord>
    where
        P: FnOnce(&TransferRecord) -> bool,
    {
        debug_assert!(matches!(
            status,
            TransferStatus::Paused | TransferStatus::Failed
        ));
        let now = self.clock.now_millis();
        let mut records = self.lock();
        let record = records.get_mut(key)?;
        if record.status.is_terminal() || !predicate(&*record) {
            return None;
        }

        record.status = status;
        record.session = None;
        record.updated_at = now;
        if status == TransferStatus::Failed {
            record.error = Some(error.unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()));
            record.error_acknowledged = false;
            record.finished_at = Some(now);
        }
        info!("Transfer {} settled as {:?}", key, status);

        let record = record.clone();
        self.publish(RegistryEvent::Upserted(record.clone()));
        Some(record)
    }

    /// Insert a record restored from durable storage. It always comes back
    /// paused and without a session. Existing records win.
    pub fn rehydrate(&self, mut record: TransferRecord) -> bool {
        let key = record.key();
        let mut records = self.lock();
        if records.contains_key(&key) {
            debug!("Skipping rehydration of {}, already tracked", key);
            return false;
        }

        record.status = TransferStatus::Paused;
        record.session = None;
        record.error = None;
        record.finished_at = None;
        records.insert(key, record.clone());
        self.publish(RegistryEvent::Upserted(record));
        true
    }

    pub fn remove(&self, key: &TransferKey) -> Option<TransferRecord> {
        self.remove_if(key, |_| true)
    }

    /// Remove the record only if `predicate` accepts it.
    pub fn remove_if<P>(&self, key: &TransferKey, predicate: P) -> Option<TransferRecord>
    where
        P: FnOnce(&TransferRecord) -> bool,
    {
        let mut records = self.lock();
        if !records.get(key).is_some_and(predicate) {
            return None;
        }
        let removed = records.remove(key);
        if removed.is_some() {
            self.publish(RegistryEvent::Removed(key.clone()));
        }
        removed
    }

    /// Mark a failure as shown to the user. Returns false if the record is
    /// missing or not failed.
    pub fn acknowledge_failure(&self, key: &TransferKey) -> bool {
        let mut records = self.lock();
        match records.get_mut(key) {
            Some(record) if record.status == TransferStatus::Failed => {
                if !record.error_acknowledged {
                    record.error_acknowledged = true;
                    let record = record.clone();
                    self.publish(RegistryEvent::Upserted(record));
                }
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &TransferKey) -> Option<TransferRecord> {
        self.lock().get(key).cloned()
    }

    /// All records, oldest start first.
    pub fn snapshot(&self) -> Vec<TransferRecord> {
        let mut records: Vec<_> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        records
    }

    pub fn records_of(&self, kind: TransferKind) -> Vec<TransferRecord> {
        self.snapshot()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }

    pub fn active_count(&self, kind: TransferKind) -> usize {
        self.lock()
            .values()
            .filter(|r| r.kind == kind && r.status.is_active())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
