//! Transfer orchestrator.
//!
//! Starts, cancels and finalizes transfers. Each started transfer gets a
//! fresh session id and a cancellation token; a spawned pump task reads the
//! transport stream, decodes frames and merges them into the registry under
//! that session. Cancelling revokes the session before the remote abort is
//! sent, so a frame racing the abort can never resurrect the record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::capacity::CapacityPolicy;
use super::decoder::ProgressDecoder;
use super::error::StartError;
use super::models::{TransferKey, TransferKind, TransferRecord, TransferResource, TransferStatus};
use super::registry::{BeginOutcome, RegistryStore};
use super::sweeper::AbandonHandler;
use super::transport::{TransferRequest, Transport};

struct ActiveSession {
    id: String,
    token: CancellationToken,
    request: TransferRequest,
}

type SessionMap = Arc<Mutex<HashMap<TransferKey, ActiveSession>>>;

fn lock_sessions(sessions: &SessionMap) -> MutexGuard<'_, HashMap<TransferKey, ActiveSession>> {
    sessions
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TransferOrchestrator {
    registry: Arc<RegistryStore>,
    transport: Arc<dyn Transport>,
    capacity: Arc<dyn CapacityPolicy>,
    sessions: SessionMap,
    shutdown_token: CancellationToken,
}

impl TransferOrchestrator {
    pub fn new(
        registry: Arc<RegistryStore>,
        transport: Arc<dyn Transport>,
        capacity: Arc<dyn CapacityPolicy>,
    ) -> Self {
        Self {
            registry,
            transport,
            capacity,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<RegistryStore> {
        &self.registry
    }

    /// Start (or restart) a transfer.
    ///
    /// Returns as soon as the record is in progress and the pump task is
    /// spawned. An already running transfer is returned as is, without
    /// touching the transport.
    pub fn start(&self, resource: TransferResource) -> Result<TransferRecord, StartError> {
        if resource.id.trim().is_empty() {
            return Err(StartError::InvalidResource(
                "resource id must not be empty".to_string(),
            ));
        }
        if self.shutdown_token.is_cancelled() {
            return Err(StartError::InvalidResource(
                "transfer engine is shutting down".to_string(),
            ));
        }

        let session = Uuid::new_v4().to_string();
        let capacity = self.capacity.clone();
        let outcome = self
            .registry
            .begin(resource, session.clone(), |ctx| capacity.admit(ctx))
            .inspect_err(|e| warn!("Rejected transfer start: {}", e))?;

        let record = match outcome {
            BeginOutcome::AlreadyActive(record) => return Ok(record),
            BeginOutcome::Started(record) => record,
        };

        let key = record.key();
        let request = TransferRequest::from(&record.resource);
        let token = self.shutdown_token.child_token();

        if let Some(previous) = lock_sessions(&self.sessions).insert(
            key.clone(),
            ActiveSession {
                id: session.clone(),
                token: token.clone(),
                request: request.clone(),
            },
        ) {
            // Leftover pump from a session that already settled.
            previous.token.cancel();
        }

        let record = self
            .registry
            .mark_in_progress(&key, &session)
            .unwrap_or(record);

        tokio::spawn(run_pump(
            self.registry.clone(),
            self.transport.clone(),
            self.sessions.clone(),
            key,
            session,
            request,
            token,
        ));

        Ok(record)
    }

    /// Resume a paused transfer with a fresh session.
    pub fn resume(&self, kind: TransferKind, id: &str) -> Result<TransferRecord, StartError> {
        let key = TransferKey::new(kind, id);
        match self.registry.get(&key) {
            Some(record) if record.status == TransferStatus::Paused => self.start(record.resource),
            Some(record) => Err(StartError::InvalidResource(format!(
                "transfer {} is {}, not paused",
                key,
                record.status_label()
            ))),
            None => Err(StartError::InvalidResource(format!(
                "no transfer tracked for {}",
                key
            ))),
        }
    }

    /// Cancel a transfer.
    ///
    /// The session is revoked first, then the remote abort is issued. An
    /// acknowledged abort leaves the record paused; a failed abort marks it
    /// failed with the abort error, since the remote state is unknown.
    ///
    /// Returns `None` if nothing is tracked for this id.
    pub async fn cancel(&self, kind: TransferKind, id: &str) -> Option<TransferRecord> {
        let key = TransferKey::new(kind, id);
        let session = lock_sessions(&self.sessions).remove(&key);
        if let Some(session) = &session {
            session.token.cancel();
            self.registry.detach_session(&key, &session.id);
        }

        let record = self.registry.get(&key)?;
        if record.status.is_terminal() {
            debug!("Cancel of {} ignored, already {}", key, record.status_label());
            return Some(record);
        }

        let request = session
            .map(|s| s.request)
            .unwrap_or_else(|| TransferRequest::from(&record.resource));

        info!("Cancelling transfer {}", key);
        let settled = match self.transport.abort(&request).await {
            Ok(()) => self.registry.settle(&key, TransferStatus::Paused, None),
            Err(e) => {
                error!("Abort of {} failed: {}", key, e);
                self.registry.settle(
                    &key,
                    TransferStatus::Failed,
                    Some(format!("abort failed: {}", e)),
                )
            }
        };
        settled.or_else(|| self.registry.get(&key))
    }

    /// Remove a paused or failed record.
    pub fn discard(&self, kind: TransferKind, id: &str) -> Option<TransferRecord> {
        let key = TransferKey::new(kind, id);
        let removed = self.registry.remove_if(&key, |r| {
            matches!(r.status, TransferStatus::Paused | TransferStatus::Failed)
        })?;
        if let Some(session) = lock_sessions(&self.sessions).remove(&key) {
            session.token.cancel();
        }
        info!("Discarded transfer {}", key);
        Some(removed)
    }

    /// Mark a failure as displayed so the sweeper may evict it.
    pub fn acknowledge_failure(&self, kind: TransferKind, id: &str) -> bool {
        self.registry
            .acknowledge_failure(&TransferKey::new(kind, id))
    }

    pub fn active_count(&self, kind: TransferKind) -> usize {
        self.registry.active_count(kind)
    }

    /// Number of pump tasks still holding a session.
    pub fn live_sessions(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    /// Stop every pump without touching the records. Run the lifecycle
    /// guard teardown afterwards to snapshot them.
    pub fn shutdown(&self) {
        info!("Stopping transfer orchestrator");
        self.shutdown_token.cancel();
        lock_sessions(&self.sessions).clear();
    }
}

impl AbandonHandler for TransferOrchestrator {
    fn abandon(&self, key: &TransferKey) {
        if let Some(session) = lock_sessions(&self.sessions).remove(key) {
            debug!("Releasing session of stale transfer {}", key);
            session.token.cancel();
        }
    }
}

/// Read one transfer stream to its end.
async fn run_pump(
    registry: Arc<RegistryStore>,
    transport: Arc<dyn Transport>,
    sessions: SessionMap,
    key: TransferKey,
    session: String,
    request: TransferRequest,
    token: CancellationToken,
) {
    let mut decoder = ProgressDecoder::new();

    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("Transfer {} cancelled before the stream opened", key);
            release_session(&sessions, &key, &session);
            return;
        }
        opened = transport.open(&request) => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to open stream for {}: {}", key, e);
            registry.apply_delta(&key, &session, decoder.decode_transport_error(&e));
            release_session(&sessions, &key, &session);
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Pump for {} stopped by cancellation", key);
                break;
            }
            next = stream.next() => next,
        };

        let delta = match next {
            Some(Ok(frame)) => decoder.decode(frame),
            Some(Err(e)) => decoder.decode_transport_error(&e),
            None => {
                warn!("Stream for {} ended without a terminal status", key);
                break;
            }
        };

        match registry.apply_delta(&key, &session, delta) {
            Some(record) if record.status.is_active() => {}
            Some(record) => {
                debug!("Pump for {} finished with {:?}", key, record.status);
                break;
            }
            None => {
                debug!("Session {} no longer owns {}, stopping pump", session, key);
                break;
            }
        }
    }

    release_session(&sessions, &key, &session);
}

fn release_session(sessions: &SessionMap, key: &TransferKey, session: &str) {
    let mut sessions = lock_sessions(sessions);
    if sessions.get(key).is_some_and(|s| s.id == session) {
        sessions.remove(key);
    }
}
