//! Catalog listing models.

use serde::{Deserialize, Serialize};

use crate::transfer::{TransferKind, TransferRecord, TransferStatus};

/// A resource as shown in one listing view.
///
/// Entries carry their own copy of the transfer fields. They are owned by the
/// view, and `status` is `None` for resources nobody is transferring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub kind: TransferKind,
    pub name: String,
    #[serde(default)]
    pub status: Option<TransferStatus>,
    #[serde(default)]
    pub completed_units: u64,
    #[serde(default)]
    pub total_units: Option<u64>,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub can_select: bool,
    /// Built locally from a finished transfer rather than fetched.
    #[serde(default)]
    pub synthesized: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CatalogEntry {
    pub fn new(kind: TransferKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            status: None,
            completed_units: 0,
            total_units: None,
            progress: 0,
            can_select: false,
            synthesized: false,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn selectable(mut self) -> Self {
        self.can_select = true;
        self
    }

    /// Row for a resource that finished transferring but was never fetched.
    pub fn from_record(record: &TransferRecord) -> Self {
        let mut entry = Self::new(record.kind, record.id.clone(), record.resource.name.clone());
        entry.metadata = record.resource.metadata.clone();
        entry.synthesized = true;
        entry.apply(record);
        entry
    }

    /// Whether the visible transfer state differs from `record`.
    pub fn differs_from(&self, record: &TransferRecord) -> bool {
        self.status != Some(record.status)
            || self.completed_units != record.completed_units
            || self.total_units != record.total_units
            || self.progress != record.percentage()
            || self.can_select != self.projected_can_select(record)
    }

    /// A resource that is already usable stays usable whatever happens to a
    /// re-pull of it.
    fn projected_can_select(&self, record: &TransferRecord) -> bool {
        self.can_select || record.can_select
    }

    /// Copy the transfer fields of `record`.
    pub fn apply(&mut self, record: &TransferRecord) {
        self.status = Some(record.status);
        self.completed_units = record.completed_units;
        self.total_units = record.total_units;
        self.progress = record.percentage();
        self.can_select = self.projected_can_select(record);
    }

    /// Forget a transfer that is no longer tracked. Returns true if anything
    /// changed. Completed rows keep their state.
    pub fn release(&mut self) -> bool {
        match self.status {
            None | Some(TransferStatus::Completed) => false,
            Some(_) => {
                self.status = None;
                self.completed_units = 0;
                self.progress = 0;
                true
            }
        }
    }
}

/// Query for one page of a catalog source. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub page: usize,
    pub page_size: usize,
    pub search: Option<String>,
}

/// One page of catalog entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogPage {
    pub entries: Vec<CatalogEntry>,
    pub page: usize,
    pub total: Option<usize>,
    pub has_more: bool,
}
