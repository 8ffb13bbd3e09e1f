//! Durable key/value storage.
//!
//! The lifecycle guard only needs `get`/`set`/`remove`; the SQLite store is
//! the default backend and the in-memory one serves tests.

mod kv_store;
mod schema;
mod sqlite_kv_store;

pub use kv_store::{InMemoryKvStore, KvStore};
#[cfg(feature = "mock")]
pub use kv_store::MockKvStore;
pub use schema::KV_STORE_VERSIONED_SCHEMAS;
pub use sqlite_kv_store::SqliteKvStore;
