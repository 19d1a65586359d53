//! Database Metadata Mirror
//!
//! Mirrors the catalog/schema/table structure of external data sources into
//! an [`ObjectTree`](crate::tree::ObjectTree), fetching each level on first
//! read through a pooled connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────┐     ┌───────────────────┐
//! │   MetadataTree   │────▶│ PoolManager │────▶│ ConnectionFactory │
//! │ populate/refresh │     │  (per db)   │     │ (SQLite, memory)  │
//! └────────┬─────────┘     └─────────────┘     └───────────────────┘
//!          │ mutations
//!          ▼
//!    ┌────────────┐
//!    │ ObjectTree │──▶ listeners
//!    └────────────┘
//! ```
//!
//! ## Population
//!
//! A container's children are fetched as catalogs, else schemas, else
//! tables; only one level is materialized per call.

mod memory;
mod pool;
mod relationships;
mod source;
mod sqlite;
mod tree;

pub use memory::{MemoryFailure, MemorySource};
pub use pool::{
    ConnectionPool, ExhaustionPolicy, PoolError, PoolManager, PoolMetrics, PoolSettings,
    PooledConnection, DEFAULT_MAX_ACTIVE,
};
pub use relationships::TableGraph;
pub use source::{
    CatalogInfo, Connection, ConnectionError, ConnectionFactory, DataSourceParams, ForeignKeyInfo,
    MetadataSource, SchemaInfo, TableInfo,
};
pub use sqlite::{SqliteConnection, SqliteConnectionFactory, SQLITE_SCHEME};
pub use tree::{
    MetadataTree, DRIVER_PROPERTY, NOT_CONFIGURED_NAME, REMARKS_PROPERTY, SOURCE_BACKED_PROPERTY,
    TABLE_TYPE_PROPERTY, URL_PROPERTY, USER_PROPERTY, WORKING_COPY_NAME,
};

use thiserror::Error;
use uuid::Uuid;

use crate::tree::TreeError;

/// Failure while talking to a data source during population or refresh
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Errors from the metadata mirror
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Failed to {operation} '{node}': {source}")]
    Population {
        node: String,
        operation: &'static str,
        #[source]
        source: SourceError,
    },

    #[error("Failed to refresh '{node}': {source}")]
    Refresh {
        node: String,
        #[source]
        source: SourceError,
    },

    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Node {0} is not a database")]
    NotADatabase(Uuid),

    #[error("Node not found: {0}")]
    NotFound(Uuid),

    #[error("Database '{0}' has no data source configured")]
    NotConfigured(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
