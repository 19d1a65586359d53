//! Common fixtures for integration tests.
//!
//! Builds scripted in-memory sources and on-disk SQLite databases, and
//! wires mirrors to recording listeners.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use metamirror_core::metadata::{
    DataSourceParams, MemorySource, MetadataTree, PoolSettings, SqliteConnectionFactory,
};
use metamirror_core::persist::{PersisterListener, RecordingPersister};

/// Source with two catalogs, each holding schemas and tables:
///
/// ```text
/// sales ── eu ── orders, invoices
///       └─ us ── orders
/// hr    ── (tables) people
/// ```
pub fn warehouse_source() -> MemorySource {
    let source = MemorySource::new().with_terms(Some("DATABASE"), Some("SCHEMA"));
    source
        .add_catalog("sales")
        .add_schema(Some("sales"), "eu")
        .add_schema(Some("sales"), "us")
        .add_table(Some("sales"), Some("eu"), "orders")
        .add_table(Some("sales"), Some("eu"), "invoices")
        .add_table(Some("sales"), Some("us"), "orders")
        .add_catalog("hr")
        .add_table(Some("hr"), None, "people");
    source
}

/// Mirror with one database backed by `source`
pub fn mirror_of(source: &MemorySource) -> (MetadataTree, Uuid) {
    mirror_with_settings(source, PoolSettings::default())
}

pub fn mirror_with_settings(source: &MemorySource, settings: PoolSettings) -> (MetadataTree, Uuid) {
    let mut mirror = MetadataTree::new();
    let db = mirror
        .add_database(
            DataSourceParams::new("warehouse", "memory:warehouse"),
            Arc::new(source.clone()),
            settings,
        )
        .expect("Failed to add database");
    (mirror, db)
}

/// Attach a persister listener with a recording sink to `node`
pub fn record_persistence(mirror: &mut MetadataTree, node: Uuid) -> RecordingPersister {
    let recorder = RecordingPersister::new();
    mirror
        .tree_mut()
        .attach_listener(node, Box::new(PersisterListener::new(recorder.clone())))
        .expect("Failed to attach persister");
    recorder
}

pub fn names(mirror: &MetadataTree, uuids: &[Uuid]) -> Vec<String> {
    uuids
        .iter()
        .map(|u| mirror.node(*u).expect("node exists").name().to_string())
        .collect()
}

/// A SQLite database with two related tables and one unrelated table
pub struct ShopDatabase {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl ShopDatabase {
    pub fn create() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("shop.db");
        let conn = rusqlite::Connection::open(&path).expect("Failed to open fixture db");
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE orders (
                 id INTEGER PRIMARY KEY,
                 customer_id INTEGER NOT NULL REFERENCES customers(id)
             );
             CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT);",
        )
        .expect("Failed to create fixture schema");
        Self { temp_dir, path }
    }

    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    pub fn params(&self) -> DataSourceParams {
        DataSourceParams::new("shop", self.url())
    }

    pub fn mirror(&self) -> (MetadataTree, Uuid) {
        let mut mirror = MetadataTree::new();
        let db = mirror
            .add_database(
                self.params(),
                Arc::new(SqliteConnectionFactory),
                PoolSettings::default(),
            )
            .expect("Failed to add database");
        (mirror, db)
    }

    pub fn execute(&self, sql: &str) {
        rusqlite::Connection::open(&self.path)
            .expect("Failed to open fixture db")
            .execute_batch(sql)
            .expect("Failed to run fixture SQL");
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }
}
