//! SQLite schema for the durable persistence sink.
//!
//! The sink mirrors the object tree as two tables: one row per object with
//! its parent and position, and one row per property holding the tagged
//! primitive value.

/// Schema version stored in `sink_metadata`
pub const SINK_SCHEMA_VERSION: &str = "1.0";

/// One row per persisted node
pub const SCHEMA_CREATE_OBJECTS: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    uuid TEXT PRIMARY KEY NOT NULL,
    object_type TEXT NOT NULL,

    -- NULL for the root of a persisted subtree
    parent_uuid TEXT,
    child_index INTEGER NOT NULL
)
"#;

/// One row per (node, property). `value` is untyped so each primitive keeps
/// its own storage class; `data_type` says how to read it back.
pub const SCHEMA_CREATE_PROPERTIES: &str = r#"
CREATE TABLE IF NOT EXISTS properties (
    uuid TEXT NOT NULL,
    name TEXT NOT NULL,
    data_type TEXT NOT NULL,
    value,
    PRIMARY KEY (uuid, name)
)
"#;

pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS sink_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_objects_parent ON objects(parent_uuid, child_index);
"#;

/// Every descendant of ?1 including itself
pub const SUBTREE_CTE: &str = r#"
WITH RECURSIVE subtree(uuid) AS (
    SELECT ?1
    UNION ALL
    SELECT o.uuid FROM objects o JOIN subtree s ON o.parent_uuid = s.uuid
)
"#;
