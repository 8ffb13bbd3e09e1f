//! Expiry sweeper.
//!
//! Periodically removes bookkeeping that nobody needs anymore:
//! - completed records once their grace period has passed,
//! - failed records once the failure was acknowledged,
//! - queued or in-progress records whose stream delivered nothing for the
//!   stale threshold (evicted or failed, per policy).
//!
//! Paused records are left alone, they wait for the user.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::models::{TransferKey, TransferRecord, TransferStatus};
use super::registry::RegistryStore;
use crate::config::TransferSettings;

/// What to do with a transfer that never reported a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleTransferPolicy {
    /// Drop the record silently.
    #[default]
    Evict,
    /// Keep the record as failed so the user sees it.
    Fail,
}

impl StaleTransferPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaleTransferPolicy::Evict => "evict",
            StaleTransferPolicy::Fail => "fail",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "evict" => Some(StaleTransferPolicy::Evict),
            "fail" => Some(StaleTransferPolicy::Fail),
            _ => None,
        }
    }
}

/// Gets told when the sweeper gives up on a transfer, so whoever runs its
/// stream can stop reading it.
pub trait AbandonHandler: Send + Sync {
    fn abandon(&self, key: &TransferKey);
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub stale_threshold: Duration,
    pub completed_grace: Duration,
    pub stale_policy: StaleTransferPolicy,
}

impl SweeperConfig {
    pub fn new(config: &TransferSettings) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_secs),
            stale_threshold: Duration::from_secs(config.stale_threshold_secs),
            completed_grace: Duration::from_secs(config.completed_grace_secs),
            stale_policy: config.stale_policy,
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new(&TransferSettings::default())
    }
}

/// Outcome of a single sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted_stale: usize,
    pub failed_stale: usize,
    pub removed_completed: usize,
    pub removed_failed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.evicted_stale + self.failed_stale + self.removed_completed + self.removed_failed
    }
}

pub struct ExpirySweeper {
    registry: Arc<RegistryStore>,
    config: SweeperConfig,
    abandon_handler: Option<Arc<dyn AbandonHandler>>,
}

impl ExpirySweeper {
    pub fn new(registry: Arc<RegistryStore>, config: SweeperConfig) -> Self {
        Self {
            registry,
            config,
            abandon_handler: None,
        }
    }

    pub fn with_abandon_handler(mut self, handler: Arc<dyn AbandonHandler>) -> Self {
        self.abandon_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    fn abandon(&self, key: &TransferKey) {
        if let Some(handler) = &self.abandon_handler {
            handler.abandon(key);
        }
    }

    /// Run one sweep over the registry.
    pub fn sweep(&self) -> SweepReport {
        let now = self.registry.now_millis();
        let stale_ms = self.config.stale_threshold.as_millis() as i64;
        let grace_ms = self.config.completed_grace.as_millis() as i64;
        let mut report = SweepReport::default();

        for record in self.registry.snapshot() {
            let key = record.key();
            match record.status {
                TransferStatus::Queued | TransferStatus::InProgress => {
                    let last_activity = record.last_activity_at();
                    if now - last_activity <= stale_ms {
                        continue;
                    }
                    warn!(
                        "Transfer {} silent in {} for {}s",
                        key,
                        record.status_label(),
                        (now - last_activity) / 1000
                    );
                    // A frame or a restart after the snapshot revives the record.
                    let unchanged = |r: &TransferRecord| {
                        r.status.is_active() && r.last_activity_at() == last_activity
                    };
                    match self.config.stale_policy {
                        StaleTransferPolicy::Evict => {
                            if self.registry.remove_if(&key, unchanged).is_some() {
                                self.abandon(&key);
                                report.evicted_stale += 1;
                            }
                        }
                        StaleTransferPolicy::Fail => {
                            let error = format!(
                                "stalled: no progress for {}s",
                                self.config.stale_threshold.as_secs()
                            );
                            if self
                                .registry
                                .settle_if(&key, TransferStatus::Failed, Some(error), unchanged)
                                .is_some()
                            {
                                self.abandon(&key);
                                report.failed_stale += 1;
                            }
                        }
                    }
                }
                TransferStatus::Completed => {
                    let expired = record
                        .finished_at
                        .map_or(true, |finished| now - finished >= grace_ms);
                    if expired
                        && self
                            .registry
                            .remove_if(&key, |r| r.status == TransferStatus::Completed)
                            .is_some()
                    {
                        report.removed_completed += 1;
                    }
                }
                TransferStatus::Failed => {
                    if record.error_acknowledged
                        && self
                            .registry
                            .remove_if(&key, |r| {
                                r.status == TransferStatus::Failed && r.error_acknowledged
                            })
                            .is_some()
                    {
                        report.removed_failed += 1;
                    }
                }
                TransferStatus::Paused => {}
            }
        }

        if report.total() > 0 {
            info!("Sweep finished: {:?}", report);
        } else {
            debug!("Sweep finished, nothing to do");
        }
        report
    }

    /// Run [`ExpirySweeper::sweep`] every `interval` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the first immediate tick, wait for the first interval
            ticker.tick().await;

            info!(
                "Expiry sweeper started (every {:?}, stale after {:?}, policy {})",
                self.config.interval,
                self.config.stale_threshold,
                self.config.stale_policy.as_str()
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    _ = shutdown.cancelled() => {
                        info!("Expiry sweeper stopped");
                        break;
                    }
                }
            }
        })
    }
}
