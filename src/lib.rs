//! Transfer Engine Library
//!
//! Download orchestration for models and tool packages, with catalog views
//! that follow transfer progress and durable pause/resume across restarts.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod sqlite_persistence;
pub mod storage;
pub mod transfer;

// Re-export commonly used types for convenience
pub use catalog::{CatalogReconciler, CatalogSource, StaticCatalogSource, ViewConfig};
pub use engine::TransferEngine;
pub use storage::{InMemoryKvStore, KvStore, SqliteKvStore};
pub use transfer::{
    HttpTransport, RegistryStore, TransferKind, TransferOrchestrator, TransferRecord,
    TransferResource, TransferStatus, Transport,
};
