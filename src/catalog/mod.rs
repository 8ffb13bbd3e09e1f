//! Catalog views
//!
//! Paginated resource listings that mirror the transfer registry. Each view
//! is fetched page by page from a [`CatalogSource`] and patched in place as
//! transfers progress, so the user sees the same state in every listing.

mod models;
mod reconciler;
mod source;
mod throttle;
mod view;

pub use models::{CatalogEntry, CatalogPage, CatalogQuery};
pub use reconciler::{CatalogReconciler, ReconcilerOptions};
#[cfg(feature = "mock")]
pub use source::MockCatalogSource;
pub use source::{CatalogSource, StaticCatalogSource};
pub use throttle::{ThrottleDecision, TrailingThrottle};
pub use view::{CatalogView, ViewConfig, ViewSnapshot};
