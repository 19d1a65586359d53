//! In-memory metadata source.
//!
//! [`MemorySource`] serves a mutable, scripted catalog/schema/table layout
//! through the regular connection contracts. Clones share state, so a
//! handle kept by the caller can reshape the source between populate and
//! refresh, inject failures, and observe connection counts.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::source::{
    CatalogInfo, Connection, ConnectionError, ConnectionFactory, DataSourceParams, ForeignKeyInfo,
    MetadataSource, SchemaInfo, TableInfo,
};

/// Operation a [`MemorySource`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryFailure {
    Connect,
    FetchCatalogs,
    FetchSchemas,
    FetchTables,
    FetchImportedKeys,
}

#[derive(Debug, Clone)]
struct StoredKey {
    catalog: Option<String>,
    schema: Option<String>,
    key: ForeignKeyInfo,
}

#[derive(Debug, Default)]
struct MemoryState {
    catalog_term: Option<String>,
    schema_term: Option<String>,
    catalogs: Vec<String>,
    schemas: Vec<SchemaInfo>,
    tables: Vec<TableInfo>,
    foreign_keys: Vec<StoredKey>,
    failures: HashSet<MemoryFailure>,
    opened: usize,
    closed: usize,
}

impl MemoryState {
    fn check(&self, failure: MemoryFailure) -> Result<(), ConnectionError> {
        if self.failures.contains(&failure) {
            return Err(ConnectionError::Query(format!("injected failure: {failure:?}")));
        }
        Ok(())
    }
}

fn same(a: &Option<String>, b: Option<&str>) -> bool {
    a.as_deref() == b
}

/// Scripted metadata source held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the vendor terms reported for the catalog and schema levels
    pub fn with_terms(self, catalog: Option<&str>, schema: Option<&str>) -> Self {
        {
            let mut state = self.state.lock();
            state.catalog_term = catalog.map(str::to_string);
            state.schema_term = schema.map(str::to_string);
        }
        self
    }

    pub fn add_catalog(&self, name: &str) -> &Self {
        self.state.lock().catalogs.push(name.to_string());
        self
    }

    pub fn add_schema(&self, catalog: Option<&str>, name: &str) -> &Self {
        self.state.lock().schemas.push(SchemaInfo {
            name: name.to_string(),
            catalog: catalog.map(str::to_string),
        });
        self
    }

    pub fn add_table(&self, catalog: Option<&str>, schema: Option<&str>, name: &str) -> &Self {
        self.state.lock().tables.push(TableInfo {
            name: name.to_string(),
            catalog: catalog.map(str::to_string),
            schema: schema.map(str::to_string),
            table_type: "TABLE".to_string(),
            remarks: None,
        });
        self
    }

    /// Declare a foreign key from `table` to `referenced_table` in one container
    pub fn add_foreign_key(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
        referenced_table: &str,
    ) -> &Self {
        self.state.lock().foreign_keys.push(StoredKey {
            catalog: catalog.map(str::to_string),
            schema: schema.map(str::to_string),
            key: ForeignKeyInfo {
                name: None,
                table: table.to_string(),
                referenced_table: referenced_table.to_string(),
                columns: Vec::new(),
            },
        });
        self
    }

    pub fn remove_catalog(&self, name: &str) -> &Self {
        self.state.lock().catalogs.retain(|c| c != name);
        self
    }

    pub fn remove_schema(&self, catalog: Option<&str>, name: &str) -> &Self {
        self.state
            .lock()
            .schemas
            .retain(|s| !(s.name == name && same(&s.catalog, catalog)));
        self
    }

    pub fn remove_table(&self, catalog: Option<&str>, schema: Option<&str>, name: &str) -> &Self {
        self.state.lock().tables.retain(|t| {
            !(t.name == name && same(&t.catalog, catalog) && same(&t.schema, schema))
        });
        self
    }

    pub fn fail_on(&self, failure: MemoryFailure) -> &Self {
        self.state.lock().failures.insert(failure);
        self
    }

    pub fn clear_failures(&self) -> &Self {
        self.state.lock().failures.clear();
        self
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn connections_closed(&self) -> usize {
        self.state.lock().closed
    }
}

impl ConnectionFactory for MemorySource {
    fn connect(&self, _params: &DataSourceParams) -> Result<Box<dyn Connection>, ConnectionError> {
        let mut state = self.state.lock();
        state.check(MemoryFailure::Connect)?;
        state.opened += 1;
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    closed: bool,
}

impl Connection for MemoryConnection {
    fn metadata(&self) -> Result<Box<dyn MetadataSource + '_>, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        Ok(Box::new(MemoryMetadata { state: &self.state }))
    }

    fn execute(&self, _sql: &str) -> Result<usize, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        Ok(0)
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        if !self.closed {
            self.closed = true;
            self.state.lock().closed += 1;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct MemoryMetadata<'a> {
    state: &'a Mutex<MemoryState>,
}

impl MetadataSource for MemoryMetadata<'_> {
    fn catalog_term(&self) -> Result<Option<String>, ConnectionError> {
        Ok(self.state.lock().catalog_term.clone())
    }

    fn schema_term(&self) -> Result<Option<String>, ConnectionError> {
        Ok(self.state.lock().schema_term.clone())
    }

    fn fetch_catalogs(&self) -> Result<Vec<CatalogInfo>, ConnectionError> {
        let state = self.state.lock();
        state.check(MemoryFailure::FetchCatalogs)?;
        Ok(state
            .catalogs
            .iter()
            .map(|name| CatalogInfo { name: name.clone() })
            .collect())
    }

    fn fetch_schemas(&self, catalog: Option<&str>) -> Result<Vec<SchemaInfo>, ConnectionError> {
        let state = self.state.lock();
        state.check(MemoryFailure::FetchSchemas)?;
        Ok(state
            .schemas
            .iter()
            .filter(|s| same(&s.catalog, catalog))
            .cloned()
            .collect())
    }

    fn fetch_tables(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
    ) -> Result<Vec<TableInfo>, ConnectionError> {
        let state = self.state.lock();
        state.check(MemoryFailure::FetchTables)?;
        Ok(state
            .tables
            .iter()
            .filter(|t| same(&t.catalog, catalog) && same(&t.schema, schema))
            .cloned()
            .collect())
    }

    fn fetch_imported_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ForeignKeyInfo>, ConnectionError> {
        let state = self.state.lock();
        state.check(MemoryFailure::FetchImportedKeys)?;
        Ok(state
            .foreign_keys
            .iter()
            .filter(|k| same(&k.catalog, catalog) && same(&k.schema, schema) && k.key.table == table)
            .map(|k| k.key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_filters_by_container() {
        let source = MemorySource::new();
        source
            .add_catalog("A")
            .add_schema(Some("A"), "s1")
            .add_schema(None, "loose")
            .add_table(Some("A"), Some("s1"), "t");

        let mut conn = source.connect(&DataSourceParams::new("m", "memory:")).unwrap();
        {
            let md = conn.metadata().unwrap();
            assert_eq!(md.fetch_schemas(Some("A")).unwrap().len(), 1);
            assert_eq!(md.fetch_schemas(None).unwrap()[0].name, "loose");
            assert_eq!(md.fetch_tables(Some("A"), Some("s1")).unwrap().len(), 1);
            assert!(md.fetch_tables(None, None).unwrap().is_empty());
        }
        conn.close().unwrap();
        assert!(matches!(conn.metadata(), Err(ConnectionError::Closed)));
        assert_eq!(source.connections_closed(), 1);
    }

    #[test]
    fn test_injected_failure() {
        let source = MemorySource::new();
        source.fail_on(MemoryFailure::FetchCatalogs);
        let conn = source.connect(&DataSourceParams::new("m", "memory:")).unwrap();
        let md = conn.metadata().unwrap();
        assert!(md.fetch_catalogs().is_err());
        assert!(md.fetch_schemas(None).is_ok());
    }
}
