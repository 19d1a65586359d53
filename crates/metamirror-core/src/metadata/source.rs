//! Metadata source contracts.
//!
//! A [`ConnectionFactory`] opens raw [`Connection`]s from
//! [`DataSourceParams`]; a connection lends out a [`MetadataSource`] whose
//! fetches are scoped to the call, so no cursor outlives it.

use metamirror_config::DataSourceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by connections and metadata fetches
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection is closed")]
    Closed,

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unsupported data source: {0}")]
    Unsupported(String),
}

/// Parameters identifying one external data source.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceParams {
    /// Display name
    pub name: String,
    pub url: String,
    pub driver: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl DataSourceParams {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            driver: None,
            user: None,
            password: None,
        }
    }

    /// Build parameters from a configured data source, reading the password
    /// from the environment variable it names
    pub fn from_config(name: &str, config: &DataSourceConfig) -> Self {
        Self {
            name: name.to_string(),
            url: config.url.clone(),
            driver: config.driver.clone(),
            user: config.user.clone(),
            password: config
                .password_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok()),
        }
    }
}

impl std::fmt::Debug for DataSourceParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceParams")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("driver", &self.driver)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    pub catalog: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// e.g. "TABLE", "VIEW"
    pub table_type: String,
    pub remarks: Option<String>,
}

/// A foreign key declared on `table`, referencing `referenced_table`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: Option<String>,
    pub table: String,
    pub referenced_table: String,
    /// (column, referenced column); the referenced column is absent when
    /// the key targets the primary key implicitly
    pub columns: Vec<(String, Option<String>)>,
}

/// Read access to a data source's structural metadata.
pub trait MetadataSource {
    /// Vendor term for the catalog level, `None` if catalogs do not exist
    fn catalog_term(&self) -> Result<Option<String>, ConnectionError>;

    /// Vendor term for the schema level, `None` if schemas do not exist
    fn schema_term(&self) -> Result<Option<String>, ConnectionError>;

    fn fetch_catalogs(&self) -> Result<Vec<CatalogInfo>, ConnectionError>;

    fn fetch_schemas(&self, catalog: Option<&str>) -> Result<Vec<SchemaInfo>, ConnectionError>;

    fn fetch_tables(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
    ) -> Result<Vec<TableInfo>, ConnectionError>;

    fn fetch_imported_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ForeignKeyInfo>, ConnectionError>;
}

/// A raw connection to a data source
pub trait Connection: Send {
    fn metadata(&self) -> Result<Box<dyn MetadataSource + '_>, ConnectionError>;

    /// Run one statement, returning the number of affected rows
    fn execute(&self, sql: &str) -> Result<usize, ConnectionError>;

    fn close(&mut self) -> Result<(), ConnectionError>;

    fn is_closed(&self) -> bool;
}

/// Opens connections for a set of data source parameters
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, params: &DataSourceParams) -> Result<Box<dyn Connection>, ConnectionError>;
}
