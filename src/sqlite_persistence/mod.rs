//! Shared SQLite helpers: declarative tables and versioned schemas.

mod versioned_schema;

pub use versioned_schema::{
    read_schema_version, Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

/// Offset added to every schema version stored in `PRAGMA user_version`, so
/// that a database created by another tool (version 0) is never mistaken for
/// one of ours.
pub const BASE_DB_VERSION: usize = 99999;
