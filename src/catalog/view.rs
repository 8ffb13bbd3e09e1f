//! One independently paginated catalog view.

use std::collections::HashMap;

use serde::Serialize;

use super::models::{CatalogEntry, CatalogPage};
use crate::transfer::{TransferKind, TransferRecord, TransferStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewConfig {
    /// Unique name, e.g. "all", "owned", "marketplace".
    pub name: String,
    pub kind: TransferKind,
    /// Insert a synthesized row when a transfer completes for a resource the
    /// view has not fetched.
    pub accepts_synthesized: bool,
}

impl ViewConfig {
    pub fn new(name: impl Into<String>, kind: TransferKind) -> Self {
        Self {
            name: name.into(),
            kind,
            accepts_synthesized: true,
        }
    }

    pub fn without_synthesized(mut self) -> Self {
        self.accepts_synthesized = false;
        self
    }
}

/// Immutable copy of a view handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub name: String,
    pub revision: u64,
    pub pages_loaded: usize,
    pub has_more: bool,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug)]
pub struct CatalogView {
    config: ViewConfig,
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
    pages_loaded: usize,
    has_more: bool,
    revision: u64,
}

impl CatalogView {
    pub fn new(config: ViewConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            index: HashMap::new(),
            pages_loaded: 0,
            has_more: true,
            revision: 0,
        }
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> TransferKind {
        self.config.kind
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            name: self.config.name.clone(),
            revision: self.revision,
            pages_loaded: self.pages_loaded,
            has_more: self.has_more,
            entries: self.entries.clone(),
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
    }

    /// Append a fetched page. Entries already present (synthesized or from an
    /// earlier page) are skipped. Returns the number of rows added.
    pub fn append_page(&mut self, page: CatalogPage) -> usize {
        let mut added = 0;
        for entry in page.entries {
            if entry.kind != self.config.kind || self.index.contains_key(&entry.id) {
                continue;
            }
            self.index.insert(entry.id.clone(), self.entries.len());
            self.entries.push(entry);
            added += 1;
        }
        self.pages_loaded = self.pages_loaded.max(page.page);
        self.has_more = page.has_more;
        self.revision += 1;
        added
    }

    /// Drop every row, e.g. when the search query changes.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.pages_loaded = 0;
        self.has_more = true;
        self.revision += 1;
    }

    /// Bring the row for `record` in line with it. Returns true if the view
    /// changed. Calling it twice with the same record changes nothing the
    /// second time.
    pub fn reconcile(&mut self, record: &TransferRecord) -> bool {
        if record.kind != self.config.kind {
            return false;
        }

        if let Some(&i) = self.index.get(&record.id) {
            let entry = &mut self.entries[i];
            if !entry.differs_from(record) {
                return false;
            }
            entry.apply(record);
            self.revision += 1;
            return true;
        }

        if record.status == TransferStatus::Completed && self.config.accepts_synthesized {
            self.entries.insert(0, CatalogEntry::from_record(record));
            self.rebuild_index();
            self.revision += 1;
            return true;
        }
        false
    }

    /// The record for `id` is gone from the registry.
    pub fn release(&mut self, id: &str) -> bool {
        let Some(&i) = self.index.get(id) else {
            return false;
        };
        if self.entries[i].release() {
            self.revision += 1;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferResource;

    fn page(page: usize, ids: &[&str], has_more: bool) -> CatalogPage {
        CatalogPage {
            entries: ids
                .iter()
                .map(|id| CatalogEntry::new(TransferKind::Model, *id, *id))
                .collect(),
            page,
            total: None,
            has_more,
        }
    }

    fn completed(id: &str) -> TransferRecord {
        let resource = TransferResource::new(TransferKind::Model, id, id).with_total_units(100);
        let mut record = TransferRecord::queued(resource, "s".into(), 0);
        record.status = TransferStatus::Completed;
        record.completed_units = 100;
        record.can_select = true;
        record
    }

    #[test]
    fn test_append_page_dedupes() {
        let mut view = CatalogView::new(ViewConfig::new("all", TransferKind::Model));
        assert_eq!(view.append_page(page(1, &["a", "b"], true)), 2);
        assert_eq!(view.append_page(page(2, &["b", "c"], false)), 1);
        assert_eq!(view.entries().len(), 3);
        assert_eq!(view.pages_loaded(), 2);
        assert!(!view.has_more());
        assert_eq!(view.get("c").unwrap().id, "c");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut view = CatalogView::new(ViewConfig::new("all", TransferKind::Model));
        view.append_page(page(1, &["a"], false));
        let before = view.revision();

        let record = completed("a");
        assert!(view.reconcile(&record));
        assert_eq!(view.revision(), before + 1);
        assert!(!view.reconcile(&record));
        assert_eq!(view.revision(), before + 1);
    }

    #[test]
    fn test_completion_synthesizes_missing_row_once() {
        let mut view = CatalogView::new(ViewConfig::new("owned", TransferKind::Model));
        view.append_page(page(1, &["a"], false));

        let record = completed("z");
        assert!(view.reconcile(&record));
        assert!(!view.reconcile(&record));
        assert_eq!(view.entries()[0].id, "z");
        assert!(view.entries()[0].synthesized);
        assert_eq!(view.get("a").unwrap().id, "a");

        // A later page containing the row does not duplicate it.
        assert_eq!(view.append_page(page(2, &["z"], false)), 0);
        assert_eq!(view.entries().len(), 2);
    }

    #[test]
    fn test_non_terminal_records_never_insert_rows() {
        let mut view = CatalogView::new(ViewConfig::new("all", TransferKind::Model));
        let mut record = completed("a");
        record.status = TransferStatus::Paused;
        assert!(!view.reconcile(&record));
        assert!(view.entries().is_empty());
    }

    #[test]
    fn test_views_without_synthesized_rows_only_patch() {
        let mut view =
            CatalogView::new(ViewConfig::new("marketplace", TransferKind::Model).without_synthesized());
        assert!(!view.reconcile(&completed("a")));
        assert!(view.entries().is_empty());
    }

    #[test]
    fn test_other_kind_is_ignored() {
        let mut view = CatalogView::new(ViewConfig::new("tools", TransferKind::ToolPackage));
        assert!(!view.reconcile(&completed("a")));
    }
}
