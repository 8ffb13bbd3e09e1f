//! Catalog data sources.

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::models::{CatalogEntry, CatalogPage, CatalogQuery};

/// Paginated listing of resources, e.g. "all models" or "marketplace".
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_page(&self, query: &CatalogQuery) -> Result<CatalogPage>;
}

/// Source backed by a fixed list, filtered by case-insensitive substring
/// match on id and name.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogSource {
    entries: Vec<CatalogEntry>,
}

impl StaticCatalogSource {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn fetch_page(&self, query: &CatalogQuery) -> Result<CatalogPage> {
        if query.page == 0 || query.page_size == 0 {
            bail!(
                "Invalid page query: page {} size {}",
                query.page,
                query.page_size
            );
        }

        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let matching: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|e| match &needle {
                Some(needle) => {
                    e.id.to_lowercase().contains(needle) || e.name.to_lowercase().contains(needle)
                }
                None => true,
            })
            .collect();

        let start = (query.page - 1) * query.page_size;
        let entries: Vec<CatalogEntry> = matching
            .iter()
            .skip(start)
            .take(query.page_size)
            .map(|e| (*e).clone())
            .collect();

        Ok(CatalogPage {
            has_more: start + entries.len() < matching.len(),
            entries,
            page: query.page,
            total: Some(matching.len()),
        })
    }
}
