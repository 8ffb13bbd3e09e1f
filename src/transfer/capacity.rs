//! Concurrency limits per transfer kind.

use crate::config::TransferSettings;

use super::error::StartError;
use super::models::TransferKind;
use super::registry::AdmissionContext;

/// Decides whether a new transfer session may start.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait CapacityPolicy: Send + Sync {
    /// Maximum number of concurrently active transfers of `kind`.
    fn limit(&self, kind: TransferKind) -> usize;

    /// Admit or reject a start.
    ///
    /// Re-pulling a resource that is already usable is always allowed, it does
    /// not compete for a download slot in the listing.
    fn admit(&self, ctx: &AdmissionContext) -> Result<(), StartError> {
        if ctx.already_selectable {
            return Ok(());
        }
        let limit = self.limit(ctx.kind);
        if ctx.active >= limit {
            return Err(StartError::CapacityExceeded {
                kind: ctx.kind,
                limit,
            });
        }
        Ok(())
    }
}

/// Fixed per-kind limits.
#[derive(Debug, Clone)]
pub struct FixedCapacityPolicy {
    pub max_models: usize,
    pub max_tool_packages: usize,
}

impl FixedCapacityPolicy {
    pub fn new(config: &TransferSettings) -> Self {
        Self {
            max_models: config.max_model_transfers,
            max_tool_packages: config.max_tool_transfers,
        }
    }
}

impl Default for FixedCapacityPolicy {
    fn default() -> Self {
        Self::new(&TransferSettings::default())
    }
}

impl CapacityPolicy for FixedCapacityPolicy {
    fn limit(&self, kind: TransferKind) -> usize {
        match kind {
            TransferKind::Model => self.max_models,
            TransferKind::ToolPackage => self.max_tool_packages,
        }
    }
}
