//! metamirror Core Library
//!
//! Mirrors the structure of external relational data sources into an
//! observable object tree and replays tree mutations against persistence
//! sinks.
//!
//! ## Modules
//!
//! - [`tree`]: arena-backed object tree with listener dispatch
//! - [`value`]: property values and their persisted primitives
//! - [`persist`]: change-capture listener, converter and sinks
//! - [`metadata`]: lazily-populated database mirror with connection pooling
//! - [`graph`]: breadth-first search and connected components
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use metamirror_core::metadata::{DataSourceParams, MetadataTree, PoolSettings, SqliteConnectionFactory};
//! use metamirror_core::persist::{PersisterListener, SqlitePersister};
//!
//! let mut mirror = MetadataTree::new();
//! let db = mirror.add_database(
//!     DataSourceParams::new("shop", "sqlite:shop.db"),
//!     Arc::new(SqliteConnectionFactory),
//!     PoolSettings::default(),
//! )?;
//!
//! let sink = SqlitePersister::open("mirror.db".as_ref())?;
//! mirror.tree_mut().attach_listener(db, Box::new(PersisterListener::new(sink)))?;
//!
//! for table in mirror.tables(db)? {
//!     println!("{}", mirror.node(table)?.name());
//! }
//! ```

pub mod graph;
pub mod metadata;
pub mod persist;
pub mod tree;
pub mod value;

pub use graph::{breadth_first_search, find_connected_components, GraphModel};
pub use metadata::{
    ConnectionFactory, DataSourceParams, MetadataError, MetadataTree, PoolError, PoolSettings,
    TableGraph,
};
pub use persist::{
    Converter, DataTypeRegistry, PersistOperation, PersistenceError, Persister, PersisterListener,
    RecordingPersister, SqlitePersister,
};
pub use tree::{Node, NodeKind, ObjectTree, PopulationState, TreeError, TreeEvent, TreeListener};
pub use value::{DataType, Image, SimpleValue, Value};
