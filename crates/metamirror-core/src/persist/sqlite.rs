//! SQLite Persistence Sink
//!
//! Durable [`Persister`] storing the mirrored tree in a SQLite database.
//! Nested `begin` calls are counted so only the outermost bracket issues
//! `BEGIN`/`COMMIT`; a rollback at any depth abandons the whole transaction.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use rust_decimal::Decimal;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::schema::{
    SCHEMA_CREATE_INDEXES, SCHEMA_CREATE_METADATA, SCHEMA_CREATE_OBJECTS,
    SCHEMA_CREATE_PROPERTIES, SINK_SCHEMA_VERSION, SUBTREE_CTE,
};
use super::{Converter, PersistenceError, Persister};
use crate::value::{DataType, SimpleKind, SimpleValue, Value};

/// A persisted object row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub uuid: Uuid,
    pub object_type: String,
    pub parent: Option<Uuid>,
    pub index: usize,
}

/// A persisted property row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProperty {
    pub data_type: DataType,
    pub value: Option<SimpleValue>,
}

/// Persistence sink backed by a SQLite database
pub struct SqlitePersister {
    conn: Connection,
    depth: usize,
}

impl SqlitePersister {
    /// Open or create a sink database at `path`
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::initialize(conn)
    }

    /// Create an in-memory sink (for tests)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::initialize(conn)
    }

    fn configure_connection(conn: &Connection) -> SqliteResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn initialize(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute(SCHEMA_CREATE_OBJECTS, [])?;
        conn.execute(SCHEMA_CREATE_PROPERTIES, [])?;
        conn.execute(SCHEMA_CREATE_METADATA, [])?;
        conn.execute_batch(SCHEMA_CREATE_INDEXES)?;

        let sink = Self { conn, depth: 0 };
        match sink.get_metadata("schema_version")? {
            Some(version) if version != SINK_SCHEMA_VERSION => {
                return Err(PersistenceError::SchemaVersionMismatch {
                    expected: SINK_SCHEMA_VERSION.to_string(),
                    found: version,
                });
            }
            Some(_) => {}
            None => sink.set_metadata("schema_version", SINK_SCHEMA_VERSION)?,
        }
        Ok(sink)
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM sink_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sink_metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Current nesting depth of `begin` calls
    pub fn transaction_depth(&self) -> usize {
        self.depth
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn load_object(&self, uuid: Uuid) -> Result<Option<StoredObject>, PersistenceError> {
        self.conn
            .query_row(
                "SELECT uuid, object_type, parent_uuid, child_index FROM objects WHERE uuid = ?1",
                params![uuid.to_string()],
                Self::row_to_object_raw,
            )
            .optional()?
            .map(Self::decode_object)
            .transpose()
    }

    /// Children of `parent` in index order; `None` lists the stored roots
    pub fn load_children(&self, parent: Option<Uuid>) -> Result<Vec<StoredObject>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, object_type, parent_uuid, child_index FROM objects
             WHERE parent_uuid IS ?1 ORDER BY child_index",
        )?;
        let rows = stmt
            .query_map(params![parent.map(|p| p.to_string())], Self::row_to_object_raw)?
            .collect::<SqliteResult<Vec<_>>>()?;
        rows.into_iter().map(Self::decode_object).collect()
    }

    pub fn load_property(
        &self,
        uuid: Uuid,
        name: &str,
    ) -> Result<Option<StoredProperty>, PersistenceError> {
        let row: Option<(String, SqlValue)> = self
            .conn
            .query_row(
                "SELECT data_type, value FROM properties WHERE uuid = ?1 AND name = ?2",
                params![uuid.to_string(), name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(data_type, value)| Self::decode_property(&data_type, value))
            .transpose()
    }

    /// Read a property back as a complex value
    pub fn load_value(
        &self,
        uuid: Uuid,
        name: &str,
        converter: &Converter,
    ) -> Result<Option<Value>, PersistenceError> {
        match self.load_property(uuid, name)? {
            Some(StoredProperty {
                data_type,
                value: Some(simple),
            }) => Ok(Some(converter.to_complex(&simple, data_type)?)),
            _ => Ok(None),
        }
    }

    pub fn object_count(&self) -> Result<usize, PersistenceError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn property_count(&self) -> Result<usize, PersistenceError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM properties", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn object_exists(&self, uuid: &str) -> Result<bool, PersistenceError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM objects WHERE uuid = ?1", params![uuid], |_| Ok(()))
            .optional()?
            .is_some())
    }

    fn row_to_object_raw(row: &rusqlite::Row<'_>) -> SqliteResult<(String, String, Option<String>, i64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode_object(
        (uuid, object_type, parent, index): (String, String, Option<String>, i64),
    ) -> Result<StoredObject, PersistenceError> {
        Ok(StoredObject {
            uuid: parse_uuid(&uuid)?,
            object_type,
            parent: parent.as_deref().map(parse_uuid).transpose()?,
            index: index as usize,
        })
    }

    fn decode_property(data_type: &str, value: SqlValue) -> Result<StoredProperty, PersistenceError> {
        let data_type = DataType::parse(data_type)
            .ok_or_else(|| PersistenceError::Corrupt(format!("unknown data type '{data_type}'")))?;
        let value = match (data_type.simple_kind(), value) {
            (_, SqlValue::Null) | (None, _) => None,
            (Some(SimpleKind::Text), SqlValue::Text(s)) => Some(SimpleValue::Text(s)),
            (Some(SimpleKind::Integer), SqlValue::Integer(i)) => Some(SimpleValue::Integer(i)),
            (Some(SimpleKind::Boolean), SqlValue::Integer(i)) => Some(SimpleValue::Boolean(i != 0)),
            (Some(SimpleKind::Decimal), SqlValue::Text(s)) => Some(SimpleValue::Decimal(
                s.parse::<Decimal>()
                    .map_err(|e| PersistenceError::Corrupt(format!("decimal '{s}': {e}")))?,
            )),
            (Some(SimpleKind::Timestamp), SqlValue::Text(s)) => Some(SimpleValue::Timestamp(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| PersistenceError::Corrupt(format!("timestamp '{s}': {e}")))?
                    .with_timezone(&Utc),
            )),
            (Some(SimpleKind::Binary), SqlValue::Blob(bytes)) => Some(SimpleValue::Binary(bytes)),
            (Some(kind), other) => {
                return Err(PersistenceError::Corrupt(format!(
                    "{:?} stored for {kind:?} property",
                    other.data_type()
                )))
            }
        };
        Ok(StoredProperty { data_type, value })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(s).map_err(|e| PersistenceError::Corrupt(format!("uuid '{s}': {e}")))
}

fn to_sql(value: &SimpleValue) -> SqlValue {
    match value {
        SimpleValue::Text(s) => SqlValue::Text(s.clone()),
        SimpleValue::Integer(i) => SqlValue::Integer(*i),
        SimpleValue::Decimal(d) => SqlValue::Text(d.to_string()),
        SimpleValue::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        SimpleValue::Timestamp(t) => SqlValue::Text(t.to_rfc3339()),
        SimpleValue::Binary(bytes) => SqlValue::Blob(bytes.clone()),
    }
}

impl Persister for SqlitePersister {
    fn begin(&mut self, label: &str) -> Result<(), PersistenceError> {
        if self.depth == 0 {
            debug!(label, "BEGIN");
            self.conn.execute_batch("BEGIN")?;
        }
        self.depth += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), PersistenceError> {
        if self.depth == 0 {
            return Err(PersistenceError::Transaction(
                "commit without matching begin".to_string(),
            ));
        }
        self.depth -= 1;
        if self.depth == 0 {
            debug!("COMMIT");
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), PersistenceError> {
        if self.depth == 0 {
            warn!("Rollback requested with no open transaction");
            return Ok(());
        }
        self.depth = 0;
        debug!("ROLLBACK");
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn persist_object(
        &mut self,
        uuid: Uuid,
        object_type: &str,
        parent: Option<Uuid>,
        index: usize,
    ) -> Result<(), PersistenceError> {
        let uuid_s = uuid.to_string();
        let parent_s = parent.map(|p| p.to_string());
        let index = index as i64;

        if self.object_exists(&uuid_s)? {
            self.conn.execute(
                "UPDATE objects SET object_type = ?2, parent_uuid = ?3, child_index = ?4 WHERE uuid = ?1",
                params![uuid_s, object_type, parent_s, index],
            )?;
            return Ok(());
        }

        // Sibling shift and insert land together or not at all
        let sp = self.conn.savepoint()?;
        if let Some(parent_s) = &parent_s {
            sp.execute(
                "UPDATE objects SET child_index = child_index + 1
                 WHERE parent_uuid = ?1 AND child_index >= ?2",
                params![parent_s, index],
            )?;
        }
        sp.execute(
            "INSERT INTO objects (uuid, object_type, parent_uuid, child_index) VALUES (?1, ?2, ?3, ?4)",
            params![uuid_s, object_type, parent_s, index],
        )?;
        sp.commit()?;
        Ok(())
    }

    fn persist_property(
        &mut self,
        uuid: Uuid,
        property: &str,
        data_type: DataType,
        _old: Option<&SimpleValue>,
        new: Option<&SimpleValue>,
    ) -> Result<(), PersistenceError> {
        let uuid_s = uuid.to_string();
        if !self.object_exists(&uuid_s)? {
            return Err(PersistenceError::Rejected {
                operation: "persist_property",
                reason: format!("unknown object {uuid}"),
            });
        }
        trace!(uuid = %uuid, property, data_type = %data_type, "Persisting property");
        self.conn.execute(
            "INSERT INTO properties (uuid, name, data_type, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(uuid, name) DO UPDATE SET data_type = excluded.data_type, value = excluded.value",
            params![
                uuid_s,
                property,
                data_type.as_str(),
                new.map(to_sql).unwrap_or(SqlValue::Null)
            ],
        )?;
        Ok(())
    }

    fn remove_object(&mut self, parent: Uuid, child: Uuid) -> Result<(), PersistenceError> {
        let Some(stored) = self.load_object(child)? else {
            return Err(PersistenceError::Rejected {
                operation: "remove_object",
                reason: format!("unknown object {child}"),
            });
        };
        if stored.parent != Some(parent) {
            return Err(PersistenceError::Rejected {
                operation: "remove_object",
                reason: format!("{child} is not a child of {parent}"),
            });
        }

        let child_s = child.to_string();
        let sp = self.conn.savepoint()?;
        sp.execute(
            &format!("{SUBTREE_CTE} DELETE FROM properties WHERE uuid IN (SELECT uuid FROM subtree)"),
            params![child_s],
        )?;
        let removed = sp.execute(
            &format!("{SUBTREE_CTE} DELETE FROM objects WHERE uuid IN (SELECT uuid FROM subtree)"),
            params![child_s],
        )?;
        sp.execute(
            "UPDATE objects SET child_index = child_index - 1
             WHERE parent_uuid = ?1 AND child_index > ?2",
            params![parent.to_string(), stored.index as i64],
        )?;
        sp.commit()?;
        debug!(child = %child, removed, "Removed persisted subtree");
        Ok(())
    }
}
