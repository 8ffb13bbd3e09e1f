//! Database schema for the transfer state database.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

/// Opaque key/value entries. Values are JSON documents.
const KV_ENTRIES_TABLE_V0: Table = Table {
    name: "kv_entries",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
};

pub const KV_STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[KV_ENTRIES_TABLE_V0],
    migration: None,
}];
