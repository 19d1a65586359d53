//! SQLite metadata source.
//!
//! SQLite has no catalogs. The main database and any attached databases are
//! reported as schemas; tables and views come from each schema's
//! `sqlite_master`, foreign keys from `PRAGMA foreign_key_list`.
//!
//! URLs take the form `sqlite:<path>` or `sqlite::memory:`.

use rusqlite::OpenFlags;
use tracing::debug;

use super::source::{
    CatalogInfo, Connection, ConnectionError, ConnectionFactory, DataSourceParams, ForeignKeyInfo,
    MetadataSource, SchemaInfo, TableInfo,
};

/// URL scheme accepted by [`SqliteConnectionFactory`]
pub const SQLITE_SCHEME: &str = "sqlite:";

const IN_MEMORY: &str = ":memory:";

/// Opens SQLite databases named by `sqlite:` URLs
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnectionFactory;

impl SqliteConnectionFactory {
    fn path_of(url: &str) -> Result<&str, ConnectionError> {
        let rest = url
            .strip_prefix(SQLITE_SCHEME)
            .ok_or_else(|| ConnectionError::Unsupported(format!("not a sqlite URL: {url}")))?;
        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            return Err(ConnectionError::Unsupported(format!("missing path in {url}")));
        }
        Ok(path)
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn connect(&self, params: &DataSourceParams) -> Result<Box<dyn Connection>, ConnectionError> {
        if let Some(driver) = params.driver.as_deref() {
            if !driver.eq_ignore_ascii_case("sqlite") {
                return Err(ConnectionError::Unsupported(format!("driver '{driver}'")));
            }
        }
        let path = Self::path_of(&params.url)?;
        let conn = if path == IN_MEMORY {
            rusqlite::Connection::open_in_memory()?
        } else {
            // Existing databases only; a typo should not create an empty file
            rusqlite::Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        };
        debug!(path, "Opened SQLite connection");
        Ok(Box::new(SqliteConnection { conn: Some(conn) }))
    }
}

/// A live SQLite connection
pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    fn conn(&self) -> Result<&rusqlite::Connection, ConnectionError> {
        self.conn.as_ref().ok_or(ConnectionError::Closed)
    }
}

impl Connection for SqliteConnection {
    fn metadata(&self) -> Result<Box<dyn MetadataSource + '_>, ConnectionError> {
        Ok(Box::new(SqliteMetadata { conn: self.conn()? }))
    }

    fn execute(&self, sql: &str) -> Result<usize, ConnectionError> {
        Ok(self.conn()?.execute(sql, [])?)
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| ConnectionError::Sqlite(e))?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct SqliteMetadata<'a> {
    conn: &'a rusqlite::Connection,
}

impl MetadataSource for SqliteMetadata<'_> {
    fn catalog_term(&self) -> Result<Option<String>, ConnectionError> {
        Ok(None)
    }

    fn schema_term(&self) -> Result<Option<String>, ConnectionError> {
        Ok(Some("schema".to_string()))
    }

    fn fetch_catalogs(&self) -> Result<Vec<CatalogInfo>, ConnectionError> {
        Ok(Vec::new())
    }

    fn fetch_schemas(&self, catalog: Option<&str>) -> Result<Vec<SchemaInfo>, ConnectionError> {
        if catalog.is_some() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare("PRAGMA database_list")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names
            .into_iter()
            .filter(|name| name != "temp")
            .map(|name| SchemaInfo {
                name,
                catalog: None,
            })
            .collect())
    }

    fn fetch_tables(
        &self,
        _catalog: Option<&str>,
        schema: Option<&str>,
    ) -> Result<Vec<TableInfo>, ConnectionError> {
        let schema_name = schema.unwrap_or("main");
        let sql = format!(
            "SELECT name, type FROM {}.sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
            quote_ident(schema_name)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(name, kind)| TableInfo {
                name,
                catalog: None,
                schema: schema.map(str::to_string),
                table_type: kind.to_uppercase(),
                remarks: None,
            })
            .collect())
    }

    fn fetch_imported_keys(
        &self,
        _catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ForeignKeyInfo>, ConnectionError> {
        let sql = format!(
            "PRAGMA {}.foreign_key_list({})",
            quote_ident(schema.unwrap_or("main")),
            quote_ident(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // One row per column; rows sharing an id belong to one key
        let mut keys: Vec<(i64, ForeignKeyInfo)> = Vec::new();
        for (id, referenced, from, to) in rows {
            match keys.iter_mut().find(|(key_id, _)| *key_id == id) {
                Some((_, key)) => key.columns.push((from, to)),
                None => keys.push((
                    id,
                    ForeignKeyInfo {
                        name: None,
                        table: table.to_string(),
                        referenced_table: referenced,
                        columns: vec![(from, to)],
                    },
                )),
            }
        }
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, DataSourceParams) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shop.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE orders (id INTEGER PRIMARY KEY,
                                  customer_id INTEGER REFERENCES customers(id));
             CREATE VIEW big_orders AS SELECT * FROM orders;",
        )
        .unwrap();
        let url = format!("sqlite:{}", path.display());
        (temp, DataSourceParams::new("shop", url))
    }

    #[test]
    fn test_schemas_and_tables() {
        let (_temp, params) = fixture();
        let conn = SqliteConnectionFactory.connect(&params).unwrap();
        let md = conn.metadata().unwrap();

        assert!(md.fetch_catalogs().unwrap().is_empty());
        let schemas: Vec<String> = md
            .fetch_schemas(None)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(schemas, vec!["main".to_string()]);

        let tables: Vec<(String, String)> = md
            .fetch_tables(None, Some("main"))
            .unwrap()
            .into_iter()
            .map(|t| (t.name, t.table_type))
            .collect();
        assert_eq!(
            tables,
            vec![
                ("big_orders".to_string(), "VIEW".to_string()),
                ("customers".to_string(), "TABLE".to_string()),
                ("orders".to_string(), "TABLE".to_string()),
            ]
        );
    }

    #[test]
    fn test_imported_keys() {
        let (_temp, params) = fixture();
        let conn = SqliteConnectionFactory.connect(&params).unwrap();
        let md = conn.metadata().unwrap();

        let keys = md.fetch_imported_keys(None, Some("main"), "orders").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].referenced_table, "customers");
        assert_eq!(
            keys[0].columns,
            vec![("customer_id".to_string(), Some("id".to_string()))]
        );
        assert!(md
            .fetch_imported_keys(None, Some("main"), "customers")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let params = DataSourceParams::new(
            "missing",
            format!("sqlite:{}", temp.path().join("nope.db").display()),
        );
        assert!(SqliteConnectionFactory.connect(&params).is_err());
    }

    #[test]
    fn test_rejects_foreign_urls() {
        let params = DataSourceParams::new("pg", "postgres://localhost/db");
        assert!(matches!(
            SqliteConnectionFactory.connect(&params),
            Err(ConnectionError::Unsupported(_))
        ));
    }

    #[test]
    fn test_execute_and_close() {
        let params = DataSourceParams::new("mem", "sqlite::memory:");
        let mut conn = SqliteConnectionFactory.connect(&params).unwrap();
        conn.execute("CREATE TABLE t (x INTEGER)").unwrap();
        assert_eq!(conn.execute("INSERT INTO t VALUES (1)").unwrap(), 1);

        conn.close().unwrap();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.execute("SELECT 1"),
            Err(ConnectionError::Closed)
        ));
    }
}
