//! Data models for the transfer engine.
//!
//! Defines transfer kinds, statuses, records, progress deltas and the
//! per-kind status vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of resource being transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Model,       // Model weights pulled through a progress stream
    ToolPackage, // Installable MCP tool service
}

impl TransferKind {
    pub const ALL: [TransferKind; 2] = [TransferKind::Model, TransferKind::ToolPackage];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Model => "model",
            TransferKind::ToolPackage => "tool_package",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "model" => Some(TransferKind::Model),
            "tool_package" | "tool" | "mcp" => Some(TransferKind::ToolPackage),
            _ => None,
        }
    }

    /// Durable storage key holding the snapshot for this kind.
    pub fn storage_key(&self) -> &'static str {
        match self {
            TransferKind::Model => "transfers.model",
            TransferKind::ToolPackage => "transfers.tool_package",
        }
    }

    /// External label for a status, in this kind's vocabulary.
    ///
    /// Models expose the engine's own names. Tool packages keep the labels
    /// used by the MCP listing (`downloading` / `success` / `error`).
    pub fn status_label(&self, status: TransferStatus) -> &'static str {
        match (self, status) {
            (TransferKind::Model, TransferStatus::Queued) => "queued",
            (TransferKind::Model, TransferStatus::InProgress) => "in_progress",
            (TransferKind::Model, TransferStatus::Paused) => "paused",
            (TransferKind::Model, TransferStatus::Completed) => "completed",
            (TransferKind::Model, TransferStatus::Failed) => "failed",
            (TransferKind::ToolPackage, TransferStatus::Queued) => "downloading",
            (TransferKind::ToolPackage, TransferStatus::InProgress) => "downloading",
            (TransferKind::ToolPackage, TransferStatus::Paused) => "canceled",
            (TransferKind::ToolPackage, TransferStatus::Completed) => "success",
            (TransferKind::ToolPackage, TransferStatus::Failed) => "error",
        }
    }

    /// Inverse of [`TransferKind::status_label`].
    pub fn parse_status_label(&self, label: &str) -> Option<TransferStatus> {
        match self {
            TransferKind::Model => match label {
                "queued" => Some(TransferStatus::Queued),
                "in_progress" => Some(TransferStatus::InProgress),
                "paused" => Some(TransferStatus::Paused),
                "completed" => Some(TransferStatus::Completed),
                "failed" => Some(TransferStatus::Failed),
                _ => None,
            },
            TransferKind::ToolPackage => match label {
                "downloading" => Some(TransferStatus::InProgress),
                "canceled" => Some(TransferStatus::Paused),
                "success" => Some(TransferStatus::Completed),
                "error" => Some(TransferStatus::Failed),
                _ => None,
            },
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Queued,
    InProgress,
    Paused,
    Completed, // terminal
    Failed,    // terminal
}

impl TransferStatus {
    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// Returns true while a stream session may still be feeding the record.
    pub fn is_active(&self) -> bool {
        matches!(self, TransferStatus::Queued | TransferStatus::InProgress)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Re-entering the same status is allowed so progress-only frames can be
    /// merged without a transition.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        if *self == next {
            return !self.is_terminal();
        }
        match self {
            Queued => matches!(next, InProgress | Paused | Failed),
            InProgress => matches!(next, Completed | Failed | Paused),
            Paused => matches!(next, InProgress),
            Completed | Failed => false,
        }
    }
}

/// Identity of a record in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferKey {
    pub kind: TransferKind,
    pub id: String,
}

impl TransferKey {
    pub fn new(kind: TransferKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Kind-specific request parameters forwarded to the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferParams {
    pub service_name: Option<String>,
    pub service_source: Option<String>,
    pub provider_name: Option<String>,
}

/// A resource the user asked to transfer, with whatever metadata the
/// catalog knew about it at start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResource {
    pub kind: TransferKind,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub params: TransferParams,
    /// Size hint known before any frame arrives.
    #[serde(default)]
    pub total_units: Option<u64>,
    /// Set when the catalog already lists this resource as usable.
    #[serde(default)]
    pub can_select: bool,
    /// Opaque catalog metadata, copied into synthesized catalog rows.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TransferResource {
    pub fn new(kind: TransferKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            params: TransferParams::default(),
            total_units: None,
            can_select: false,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_total_units(mut self, total: u64) -> Self {
        self.total_units = Some(total);
        self
    }

    pub fn with_params(mut self, params: TransferParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn key(&self) -> TransferKey {
        TransferKey::new(self.kind, self.id.clone())
    }
}

/// One tracked transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: String,
    pub kind: TransferKind,
    pub status: TransferStatus,
    pub completed_units: u64,
    pub total_units: Option<u64>,
    /// Display percentage, 0..=100.
    pub progress: u8,
    pub can_select: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: i64,
    pub updated_at: i64,
    /// Last time the owning stream delivered a frame.
    #[serde(default)]
    pub last_event_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub error_acknowledged: bool,
    /// Stream session allowed to mutate this record. Never persisted.
    #[serde(skip)]
    pub session: Option<String>,
    pub resource: TransferResource,
}

impl TransferRecord {
    /// Create a fresh queued record for a resource.
    pub fn queued(resource: TransferResource, session: String, now: i64) -> Self {
        Self {
            id: resource.id.clone(),
            kind: resource.kind,
            status: TransferStatus::Queued,
            completed_units: 0,
            total_units: resource.total_units,
            progress: 0,
            can_select: false,
            error: None,
            started_at: now,
            updated_at: now,
            last_event_at: now,
            finished_at: None,
            error_acknowledged: false,
            session: Some(session),
            resource,
        }
    }

    pub fn key(&self) -> TransferKey {
        TransferKey::new(self.kind, self.id.clone())
    }

    /// Most recent sign of life: the last accepted frame, or the start.
    pub fn last_activity_at(&self) -> i64 {
        self.last_event_at.max(self.started_at)
    }

    /// Percentage derived from units when known, otherwise the reported value.
    pub fn percentage(&self) -> u8 {
        match self.total_units {
            Some(total) if total > 0 => {
                let derived = (self.completed_units.min(total) * 100 / total) as u8;
                derived.max(self.progress)
            }
            _ => self.progress,
        }
    }

    /// External status label in this record's kind vocabulary.
    pub fn status_label(&self) -> &'static str {
        self.kind.status_label(self.status)
    }

    /// Merge the unit fields of a delta, keeping both counters monotonic and
    /// `completed_units <= total_units`.
    pub(crate) fn merge_units(&mut self, delta: &ProgressDelta) {
        if let Some(total) = delta.total_units {
            let total = self.total_units.map_or(total, |known| known.max(total));
            self.total_units = Some(total);
        }
        if let Some(completed) = delta.completed_units {
            self.completed_units = self.completed_units.max(completed);
        }
        if let Some(total) = self.total_units {
            self.completed_units = self.completed_units.min(total);
        }
        if let Some(progress) = delta.progress {
            self.progress = self.progress.max(progress.min(100));
        }
    }
}

/// Normalized update produced by the decoder for one frame.
///
/// `None` fields were absent from the frame and must not overwrite known
/// values.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressDelta {
    pub status: TransferStatus,
    pub completed_units: Option<u64>,
    pub total_units: Option<u64>,
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl ProgressDelta {
    pub fn in_progress() -> Self {
        Self {
            status: TransferStatus::InProgress,
            completed_units: None,
            total_units: None,
            progress: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TransferStatus::Failed,
            error: Some(error.into()),
            ..Self::in_progress()
        }
    }

    pub fn paused() -> Self {
        Self {
            status: TransferStatus::Paused,
            ..Self::in_progress()
        }
    }

    pub fn with_units(mut self, completed: Option<u64>, total: Option<u64>) -> Self {
        self.completed_units = completed;
        self.total_units = total;
        self
    }
}
