//! Lazily-populated metadata tree.
//!
//! Databases hang off the tree root. Each database owns a [`PoolManager`];
//! its catalogs, schemas and tables are fetched on first read and reconciled
//! by name on refresh.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pool::{PoolManager, PoolMetrics, PoolSettings, PooledConnection};
use super::source::{ConnectionFactory, DataSourceParams, MetadataSource};
use super::{MetadataError, SourceError};
use crate::tree::{Node, NodeKind, ObjectTree, PopulationState, PropertyChange};
use crate::value::Value;

pub const URL_PROPERTY: &str = "url";
pub const DRIVER_PROPERTY: &str = "driver";
pub const USER_PROPERTY: &str = "user";
pub const SOURCE_BACKED_PROPERTY: &str = "source_backed";
pub const TABLE_TYPE_PROPERTY: &str = "table_type";
pub const REMARKS_PROPERTY: &str = "remarks";

/// Database properties whose change invalidates the mirrored structure
const RESET_PROPERTIES: [&str; 3] = [URL_PROPERTY, DRIVER_PROPERTY, USER_PROPERTY];

/// Name reported by a database that is not backed by a source
pub const WORKING_COPY_NAME: &str = "Working Copy";
/// Name reported by a database with no data source
pub const NOT_CONFIGURED_NAME: &str = "Not Configured";

struct DatabaseState {
    pool: Arc<PoolManager>,
    catalog_term: Option<String>,
    schema_term: Option<String>,
    source_backed: bool,
}

/// Object tree mirroring the structure of one or more data sources
pub struct MetadataTree {
    tree: ObjectTree,
    databases: HashMap<Uuid, DatabaseState>,
}

impl Default for MetadataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataTree {
    pub fn new() -> Self {
        Self {
            tree: ObjectTree::new(),
            databases: HashMap::new(),
        }
    }

    pub fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    /// Mutable access for attaching listeners and application nodes
    pub fn tree_mut(&mut self) -> &mut ObjectTree {
        &mut self.tree
    }

    pub fn root(&self) -> Uuid {
        self.tree.root()
    }

    pub fn node(&self, uuid: Uuid) -> Result<&Node, MetadataError> {
        self.tree.get(uuid).ok_or(MetadataError::NotFound(uuid))
    }

    fn database(&self, db: Uuid) -> Result<&DatabaseState, MetadataError> {
        self.databases.get(&db).ok_or(MetadataError::NotADatabase(db))
    }

    fn database_mut(&mut self, db: Uuid) -> Result<&mut DatabaseState, MetadataError> {
        self.databases
            .get_mut(&db)
            .ok_or(MetadataError::NotADatabase(db))
    }

    /// Databases in root order
    pub fn databases(&self) -> Vec<Uuid> {
        self.tree
            .get(self.root())
            .map(|root| {
                root.children()
                    .iter()
                    .copied()
                    .filter(|c| self.databases.contains_key(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // Databases
    // ========================================================================

    /// Add a source-backed database under the root.
    ///
    /// Nothing is fetched until the database's children are first read.
    pub fn add_database(
        &mut self,
        params: DataSourceParams,
        factory: Arc<dyn ConnectionFactory>,
        settings: PoolSettings,
    ) -> Result<Uuid, MetadataError> {
        let mut node = Node::unpopulated(NodeKind::Database, params.name.clone())
            .with_property(URL_PROPERTY, params.url.as_str())
            .reserving(&RESET_PROPERTIES)
            .pinned();
        if let Some(driver) = &params.driver {
            node = node.with_property(DRIVER_PROPERTY, driver.as_str());
        }
        if let Some(user) = &params.user {
            node = node.with_property(USER_PROPERTY, user.as_str());
        }

        let uuid = self.tree.insert(node);
        self.databases.insert(
            uuid,
            DatabaseState {
                pool: Arc::new(PoolManager::new(factory, params, settings)),
                catalog_term: None,
                schema_term: None,
                source_backed: true,
            },
        );
        let root = self.root();
        self.tree.append_child(root, uuid)?;
        Ok(uuid)
    }

    /// Add an in-memory database with no data source, born populated
    pub fn add_working_copy(&mut self) -> Result<Uuid, MetadataError> {
        let uuid = self.tree.insert(
            Node::new(NodeKind::Database, WORKING_COPY_NAME)
                .reserving(&RESET_PROPERTIES)
                .pinned(),
        );
        self.databases.insert(
            uuid,
            DatabaseState {
                pool: Arc::new(PoolManager::unconfigured()),
                catalog_term: None,
                schema_term: None,
                source_backed: false,
            },
        );
        let root = self.root();
        self.tree.append_child(root, uuid)?;
        Ok(uuid)
    }

    /// Detach a database from the mirror and close its pool
    pub fn remove_database(&mut self, db: Uuid) -> Result<(), MetadataError> {
        let name = self.display(db);
        let state = self
            .databases
            .remove(&db)
            .ok_or(MetadataError::NotADatabase(db))?;
        state.pool.disconnect();
        let root = self.root();
        self.tree.remove_pinned_child(root, db)?;
        info!(database = %name, "Removed database");
        Ok(())
    }

    fn display_name(state: &DatabaseState) -> String {
        if !state.source_backed {
            return WORKING_COPY_NAME.to_string();
        }
        state
            .pool
            .params()
            .map_or_else(|| NOT_CONFIGURED_NAME.to_string(), |p| p.name)
    }

    fn sync_name(&mut self, db: Uuid) -> Result<(), MetadataError> {
        let name = Self::display_name(self.database(db)?);
        self.tree.set_name(db, name)?;
        Ok(())
    }

    pub fn is_source_backed(&self, db: Uuid) -> Result<bool, MetadataError> {
        Ok(self.database(db)?.source_backed)
    }

    /// Mark a database as backed by its source or as an in-memory working copy
    pub fn set_source_backed(&mut self, db: Uuid, source_backed: bool) -> Result<(), MetadataError> {
        let state = self.database_mut(db)?;
        if state.source_backed == source_backed {
            return Ok(());
        }
        state.source_backed = source_backed;
        self.tree.set_property(
            db,
            SOURCE_BACKED_PROPERTY,
            Some(Value::Boolean(source_backed)),
        )?;
        self.sync_name(db)
    }

    pub fn data_source(&self, db: Uuid) -> Result<Option<DataSourceParams>, MetadataError> {
        Ok(self.database(db)?.pool.params())
    }

    fn modify_params(
        &mut self,
        db: Uuid,
        apply: impl FnOnce(&mut DataSourceParams),
    ) -> Result<(), MetadataError> {
        let state = self.database(db)?;
        let mut params = state
            .pool
            .params()
            .ok_or_else(|| MetadataError::NotConfigured(self.display(db)))?;
        apply(&mut params);
        state.pool.set_params(Some(params));
        Ok(())
    }

    /// Write a reserved connection property on the database node.
    ///
    /// The node is the only record of url, driver and user; the pool's
    /// parameters are rebuilt from it whenever one of them changes.
    fn update_source_property(
        &mut self,
        db: Uuid,
        property: &str,
        value: Option<&str>,
    ) -> Result<(), MetadataError> {
        if self.database(db)?.pool.params().is_none() {
            return Err(MetadataError::NotConfigured(self.display(db)));
        }
        let value = value.map(|v| Value::Text(v.to_string()));
        match self.tree.set_reserved_property(db, property, value) {
            Ok(None) => Ok(()),
            Ok(Some(change)) => self.on_property_changed(db, &change),
            Err(err) => {
                // A failing listener still saw the new value on the node
                self.sync_pool_params(db)?;
                self.reset(db)?;
                Err(err.into())
            }
        }
    }

    fn on_property_changed(&mut self, db: Uuid, change: &PropertyChange) -> Result<(), MetadataError> {
        if RESET_PROPERTIES.contains(&change.property.as_str()) {
            info!(
                database = %self.display(db),
                property = %change.property,
                "Data source parameter changed, resetting"
            );
            self.sync_pool_params(db)?;
            self.reset(db)?;
        }
        Ok(())
    }

    /// Copy url, driver and user from the database node into the pool
    fn sync_pool_params(&mut self, db: Uuid) -> Result<(), MetadataError> {
        let node = self.node(db)?;
        let text = |property: &str| {
            node.property(property)
                .and_then(Value::as_text)
                .map(str::to_string)
        };
        let (url, driver, user) = (text(URL_PROPERTY), text(DRIVER_PROPERTY), text(USER_PROPERTY));

        let state = self.database(db)?;
        if let Some(mut params) = state.pool.params() {
            params.url = url.unwrap_or_default();
            params.driver = driver;
            params.user = user;
            state.pool.set_params(Some(params));
        }
        Ok(())
    }

    pub fn set_url(&mut self, db: Uuid, url: &str) -> Result<(), MetadataError> {
        self.update_source_property(db, URL_PROPERTY, Some(url))
    }

    pub fn set_driver(&mut self, db: Uuid, driver: Option<&str>) -> Result<(), MetadataError> {
        self.update_source_property(db, DRIVER_PROPERTY, driver)
    }

    pub fn set_user(&mut self, db: Uuid, user: Option<&str>) -> Result<(), MetadataError> {
        self.update_source_property(db, USER_PROPERTY, user)
    }

    /// Change the credential; the pool is rebuilt but the tree is kept
    pub fn set_password(&mut self, db: Uuid, password: Option<&str>) -> Result<(), MetadataError> {
        self.modify_params(db, |p| p.password = password.map(str::to_string))
    }

    /// Rename the data source, re-firing the database's name change
    pub fn rename_data_source(&mut self, db: Uuid, name: &str) -> Result<(), MetadataError> {
        self.modify_params(db, |p| p.name = name.to_string())?;
        self.sync_name(db)
    }

    pub fn catalog_term(&self, db: Uuid) -> Result<Option<String>, MetadataError> {
        Ok(self.database(db)?.catalog_term.clone())
    }

    pub fn schema_term(&self, db: Uuid) -> Result<Option<String>, MetadataError> {
        Ok(self.database(db)?.schema_term.clone())
    }

    // ========================================================================
    // Connections
    // ========================================================================

    pub fn get_connection(&self, db: Uuid) -> Result<PooledConnection, MetadataError> {
        Ok(self.database(db)?.pool.get_connection()?)
    }

    /// Close and discard the database's pool
    pub fn disconnect(&self, db: Uuid) -> Result<(), MetadataError> {
        self.database(db)?.pool.disconnect();
        Ok(())
    }

    pub fn is_connected(&self, db: Uuid) -> Result<bool, MetadataError> {
        Ok(self.database(db)?.pool.is_connected())
    }

    pub fn max_active_connections(&self, db: Uuid) -> Result<usize, MetadataError> {
        Ok(self.database(db)?.pool.max_active_connections())
    }

    pub fn pool_metrics(&self, db: Uuid) -> Result<Option<PoolMetrics>, MetadataError> {
        Ok(self.database(db)?.pool.metrics())
    }

    /// Discard the pool and, for source-backed databases, every child.
    ///
    /// A working copy keeps its children and stays populated.
    pub fn reset(&mut self, db: Uuid) -> Result<(), MetadataError> {
        let state = self.database_mut(db)?;
        state.pool.disconnect();
        if !state.source_backed {
            debug!(database = %db, "Working copy keeps its children on reset");
            return Ok(());
        }
        state.catalog_term = None;
        state.schema_term = None;

        let children = self.tree.children(db)?.to_vec();
        for child in children {
            self.tree.remove_child(db, child)?;
        }
        self.tree.set_population(db, PopulationState::Unpopulated)?;
        info!(database = %self.display(db), "Reset database");
        Ok(())
    }

    // ========================================================================
    // Population
    // ========================================================================

    fn display(&self, uuid: Uuid) -> String {
        self.tree
            .get(uuid)
            .map_or_else(|| uuid.to_string(), |n| n.name().to_string())
    }

    /// Catalog and schema names enclosing `uuid`, nearest first
    pub fn container_path(&self, uuid: Uuid) -> (Option<String>, Option<String>) {
        let nodes = self.tree.nodes();
        let name_of = |kind: &NodeKind| {
            nodes
                .find_ancestor(uuid, kind)
                .and_then(|id| nodes.get(id))
                .map(|n| n.name().to_string())
        };
        (name_of(&NodeKind::Catalog), name_of(&NodeKind::Schema))
    }

    /// Fetch a node's children from its data source if not done yet.
    ///
    /// Idempotent. On failure the node is still marked populated, keeps any
    /// children attached before the failure, and the error is returned.
    pub fn populate(&mut self, uuid: Uuid) -> Result<(), MetadataError> {
        let node = self.node(uuid)?;
        if node.population() != PopulationState::Unpopulated {
            return Ok(());
        }
        let kind = node.kind().clone();
        let name = node.name().to_string();

        let source_db = self
            .tree
            .nodes()
            .find_ancestor(uuid, &NodeKind::Database)
            .and_then(|db| self.databases.get(&db).map(|state| (db, state)))
            .filter(|(_, state)| state.source_backed)
            .map(|(db, state)| (db, Arc::clone(&state.pool)));

        let Some((db, pool)) = source_db.filter(|_| kind.is_source_container()) else {
            self.tree.set_population(uuid, PopulationState::Populated)?;
            return Ok(());
        };

        info!(node = %name, kind = %kind, "Populating");
        self.tree.set_population(uuid, PopulationState::Populating)?;
        let result = self.populate_from_source(uuid, db, &kind, &pool);
        self.tree.set_population(uuid, PopulationState::Populated)?;

        match result {
            Ok(count) => {
                info!(node = %name, children = count, "Populated");
                Ok(())
            }
            Err(source) => {
                warn!(node = %name, "Population failed: {}", source);
                Err(MetadataError::Population {
                    node: name,
                    operation: population_operation(&kind),
                    source,
                })
            }
        }
    }

    fn populate_from_source(
        &mut self,
        uuid: Uuid,
        db: Uuid,
        kind: &NodeKind,
        pool: &PoolManager,
    ) -> Result<usize, SourceError> {
        let conn = pool.get_connection()?;
        let md = conn.metadata()?;

        if *kind == NodeKind::Database {
            let catalog_term = md.catalog_term()?.filter(|t| !t.is_empty());
            let schema_term = md.schema_term()?.filter(|t| !t.is_empty());
            if let Some(state) = self.databases.get_mut(&db) {
                state.catalog_term = catalog_term;
                state.schema_term = schema_term;
            }
        }

        let children = self.fetch_children(uuid, kind, md.as_ref())?;
        let count = children.len();
        for child in children {
            let child = self.tree.insert(child);
            self.tree.append_child(uuid, child)?;
        }
        Ok(count)
    }

    /// Fetch the fresh child list of a container: catalogs, else schemas,
    /// else tables, one level only
    fn fetch_children(
        &self,
        uuid: Uuid,
        kind: &NodeKind,
        md: &dyn MetadataSource,
    ) -> Result<Vec<Node>, SourceError> {
        let name = self.display(uuid);
        let (catalog, schema) = match kind {
            NodeKind::Database => {
                let catalogs = md.fetch_catalogs()?;
                if !catalogs.is_empty() {
                    return Ok(catalogs
                        .into_iter()
                        .map(|c| Node::unpopulated(NodeKind::Catalog, c.name))
                        .collect());
                }
                let schemas = md.fetch_schemas(None)?;
                if !schemas.is_empty() {
                    return Ok(schema_nodes(schemas));
                }
                (None, None)
            }
            NodeKind::Catalog => {
                let schemas = md.fetch_schemas(Some(&name))?;
                if !schemas.is_empty() {
                    return Ok(schema_nodes(schemas));
                }
                (Some(name), None)
            }
            NodeKind::Schema => (self.container_path(uuid).0, Some(name)),
            _ => return Ok(Vec::new()),
        };

        Ok(md
            .fetch_tables(catalog.as_deref(), schema.as_deref())?
            .into_iter()
            .map(|t| {
                let mut node = Node::new(NodeKind::Table, t.name)
                    .with_property(TABLE_TYPE_PROPERTY, t.table_type);
                if let Some(remarks) = t.remarks {
                    node = node.with_property(REMARKS_PROPERTY, remarks);
                }
                node
            })
            .collect())
    }

    /// Children of a node, populating it first if needed
    pub fn children(&mut self, uuid: Uuid) -> Result<Vec<Uuid>, MetadataError> {
        self.populate(uuid)?;
        Ok(self.tree.children(uuid)?.to_vec())
    }

    pub fn is_populated(&self, uuid: Uuid) -> Result<bool, MetadataError> {
        Ok(self.node(uuid)?.is_populated())
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Reconcile a populated database with its source.
    ///
    /// Additions and removals are applied by name; existing nodes are kept,
    /// and populated descendants are refreshed the same way rather than
    /// rebuilt. Runs inside one compound transaction whose end is fired even
    /// when the refresh fails.
    pub fn refresh(&mut self, db: Uuid) -> Result<(), MetadataError> {
        let node = self.node(db)?;
        if *node.kind() != NodeKind::Database {
            return Err(MetadataError::NotADatabase(db));
        }
        let name = node.name().to_string();
        if !node.is_populated() {
            info!(database = %name, "Not refreshing unpopulated database");
            return Ok(());
        }
        let state = self.database(db)?;
        if !state.source_backed {
            debug!(database = %name, "Not refreshing working copy");
            return Ok(());
        }
        let pool = Arc::clone(&state.pool);

        info!(database = %name, "Refreshing");
        self.tree.begin_transaction(db, format!("Refreshing {name}"))?;
        let result = self.refresh_from_source(db, &pool);
        let ended = self.tree.commit_transaction(db);

        result.map_err(|source| MetadataError::Refresh { node: name, source })?;
        ended?;
        Ok(())
    }

    fn refresh_from_source(&mut self, db: Uuid, pool: &PoolManager) -> Result<(), SourceError> {
        let conn = pool.get_connection()?;
        let md = conn.metadata()?;

        // Same level fallback as population, so an unchanged source keeps
        // the level it was populated with
        let fresh = self.fetch_children(db, &NodeKind::Database, md.as_ref())?;
        self.reconcile(db, fresh)?;
        self.refresh_descendants(db, md.as_ref())
    }

    fn refresh_descendants(&mut self, parent: Uuid, md: &dyn MetadataSource) -> Result<(), SourceError> {
        for child in self.tree.children(parent)?.to_vec() {
            let Some(node) = self.tree.get(child) else {
                continue;
            };
            let kind = node.kind().clone();
            if !node.is_populated() || !matches!(kind, NodeKind::Catalog | NodeKind::Schema) {
                continue;
            }
            let fresh = self.fetch_children(child, &kind, md)?;
            self.reconcile(child, fresh)?;
            self.refresh_descendants(child, md)?;
        }
        Ok(())
    }

    /// Apply a fresh child list to `parent` by case-insensitive name
    fn reconcile(&mut self, parent: Uuid, fresh: Vec<Node>) -> Result<(), SourceError> {
        let current = self.tree.children(parent)?.to_vec();
        for uuid in current {
            let stale = self
                .tree
                .get(uuid)
                .is_some_and(|n| !fresh.iter().any(|f| f.name_matches(n.name())));
            if stale {
                debug!(parent = %parent, child = %self.display(uuid), "Removing vanished child");
                self.tree.remove_child(parent, uuid)?;
            }
        }

        for (position, node) in fresh.into_iter().enumerate() {
            let children = self.tree.children(parent)?;
            let existing = children.iter().copied().find(|c| {
                self.tree
                    .get(*c)
                    .is_some_and(|n| n.name_matches(node.name()))
            });
            match existing {
                Some(uuid) => self.update_source_properties(uuid, &node)?,
                None => {
                    let index = position.min(children.len());
                    debug!(parent = %parent, child = %node.name(), "Adding new child");
                    let child = self.tree.insert(node);
                    self.tree.add_child(parent, child, index)?;
                }
            }
        }
        Ok(())
    }

    fn update_source_properties(&mut self, uuid: Uuid, fresh: &Node) -> Result<(), SourceError> {
        for property in [TABLE_TYPE_PROPERTY, REMARKS_PROPERTY] {
            self.tree
                .set_property(uuid, property, fresh.property(property).cloned())?;
        }
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Kind of the first child, populating first
    pub fn child_kind(&mut self, uuid: Uuid) -> Result<Option<NodeKind>, MetadataError> {
        let children = self.children(uuid)?;
        Ok(children
            .first()
            .and_then(|c| self.tree.get(*c))
            .map(|n| n.kind().clone()))
    }

    /// True when the node has no children or its children are catalogs
    pub fn is_catalog_container(&mut self, uuid: Uuid) -> Result<bool, MetadataError> {
        Ok(self
            .child_kind(uuid)?
            .is_none_or(|kind| kind == NodeKind::Catalog))
    }

    /// True when the node has no children or its children are schemas
    pub fn is_schema_container(&mut self, uuid: Uuid) -> Result<bool, MetadataError> {
        Ok(self
            .child_kind(uuid)?
            .is_none_or(|kind| kind == NodeKind::Schema))
    }

    fn find_named(&self, candidates: &[Uuid], kind: &NodeKind, name: &str) -> Option<Uuid> {
        candidates.iter().copied().find(|c| {
            self.tree
                .get(*c)
                .is_some_and(|n| n.kind() == kind && n.name_matches(name))
        })
    }

    pub fn catalog_by_name(&mut self, db: Uuid, name: &str) -> Result<Option<Uuid>, MetadataError> {
        let children = self.children(db)?;
        Ok(self.find_named(&children, &NodeKind::Catalog, name))
    }

    /// Find a schema directly under `parent` or inside any of its catalogs
    pub fn schema_by_name(&mut self, parent: Uuid, name: &str) -> Result<Option<Uuid>, MetadataError> {
        let children = self.children(parent)?;
        match self.child_kind(parent)? {
            Some(NodeKind::Catalog) => {
                for catalog in children {
                    if let Some(schema) = self.schema_by_name(catalog, name)? {
                        return Ok(Some(schema));
                    }
                }
                Ok(None)
            }
            Some(NodeKind::Schema) => Ok(self.find_named(&children, &NodeKind::Schema, name)),
            _ => Ok(None),
        }
    }

    /// Find a table by optional catalog and schema names.
    ///
    /// Without a schema name, every schema under the selected container is
    /// searched in order.
    pub fn table_by_name(
        &mut self,
        db: Uuid,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Option<Uuid>, MetadataError> {
        if table.is_empty() {
            return Err(MetadataError::InvalidArgument(
                "table name must not be empty".to_string(),
            ));
        }

        let mut container = db;
        if let Some(catalog) = catalog.filter(|c| !c.is_empty()) {
            match self.catalog_by_name(db, catalog)? {
                Some(found) => container = found,
                None => return Ok(None),
            }
        }
        if let Some(schema) = schema.filter(|s| !s.is_empty()) {
            let children = self.children(container)?;
            match self.find_named(&children, &NodeKind::Schema, schema) {
                Some(found) => container = found,
                None => return Ok(None),
            }
        }
        self.find_table_in(container, table)
    }

    fn find_table_in(&mut self, container: Uuid, table: &str) -> Result<Option<Uuid>, MetadataError> {
        let children = self.children(container)?;
        if let Some(found) = self.find_named(&children, &NodeKind::Table, table) {
            return Ok(Some(found));
        }
        for child in children {
            let is_container = self
                .tree
                .get(child)
                .is_some_and(|n| matches!(n.kind(), NodeKind::Catalog | NodeKind::Schema));
            if is_container {
                if let Some(found) = self.find_table_in(child, table)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Every table under `uuid`, populating containers along the way
    pub fn tables(&mut self, uuid: Uuid) -> Result<Vec<Uuid>, MetadataError> {
        let mut tables = Vec::new();
        for child in self.children(uuid)? {
            let kind = self.node(child)?.kind().clone();
            match kind {
                NodeKind::Table => tables.push(child),
                NodeKind::Catalog | NodeKind::Schema => tables.extend(self.tables(child)?),
                _ => {}
            }
        }
        Ok(tables)
    }
}

fn schema_nodes(schemas: Vec<super::source::SchemaInfo>) -> Vec<Node> {
    schemas
        .into_iter()
        .map(|s| Node::unpopulated(NodeKind::Schema, s.name))
        .collect()
}

fn population_operation(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Database => "populate database",
        NodeKind::Catalog => "populate catalog",
        NodeKind::Schema => "populate schema",
        _ => "populate",
    }
}

impl std::fmt::Debug for MetadataTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTree")
            .field("tree", &self.tree)
            .field("databases", &self.databases.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::{MemoryFailure, MemorySource};
    use crate::metadata::PoolError;
    use crate::tree::{EventRecorder, TreeEvent};
    use pretty_assertions::assert_eq;

    fn setup(source: &MemorySource) -> (MetadataTree, Uuid) {
        let mut mirror = MetadataTree::new();
        let db = mirror
            .add_database(
                DataSourceParams::new("warehouse", "memory:warehouse"),
                Arc::new(source.clone()),
                PoolSettings::default(),
            )
            .unwrap();
        (mirror, db)
    }

    fn names(mirror: &MetadataTree, uuids: &[Uuid]) -> Vec<String> {
        uuids
            .iter()
            .map(|u| mirror.node(*u).unwrap().name().to_string())
            .collect()
    }

    fn record(mirror: &mut MetadataTree, db: Uuid) -> EventRecorder {
        let recorder = EventRecorder::new();
        mirror
            .tree_mut()
            .attach_listener(db, Box::new(recorder.clone()))
            .unwrap();
        recorder
    }

    #[test]
    fn test_database_starts_unpopulated() {
        let source = MemorySource::new();
        let (mirror, db) = setup(&source);
        assert!(!mirror.is_populated(db).unwrap());
        assert_eq!(mirror.node(db).unwrap().name(), "warehouse");
        assert_eq!(source.connections_opened(), 0);
        assert!(!mirror.is_connected(db).unwrap());
    }

    #[test]
    fn test_catalog_scenario() {
        let source = MemorySource::new().with_terms(Some("DATABASE"), None);
        source.add_catalog("A").add_catalog("B");
        let (mut mirror, db) = setup(&source);

        let children = mirror.children(db).unwrap();
        assert_eq!(names(&mirror, &children), vec!["A", "B"]);
        assert!(mirror.is_catalog_container(db).unwrap());
        assert!(!mirror.is_schema_container(db).unwrap());
        assert_eq!(mirror.catalog_term(db).unwrap().as_deref(), Some("DATABASE"));
        assert!(!mirror.is_populated(children[0]).unwrap());
    }

    #[test]
    fn test_fallback_to_schemas_then_tables() {
        let source = MemorySource::new();
        source.add_schema(None, "public").add_table(None, None, "loose");
        let (mut mirror, db) = setup(&source);
        assert_eq!(mirror.child_kind(db).unwrap(), Some(NodeKind::Schema));

        let only_tables = MemorySource::new();
        only_tables.add_table(None, None, "t1").add_table(None, None, "t2");
        let (mut mirror, db) = setup(&only_tables);
        let children = mirror.children(db).unwrap();
        assert_eq!(names(&mirror, &children), vec!["t1", "t2"]);
        assert!(mirror.is_populated(children[0]).unwrap());
    }

    #[test]
    fn test_populate_is_idempotent() {
        let source = MemorySource::new();
        source.add_schema(None, "s1").add_schema(None, "s2");
        let (mut mirror, db) = setup(&source);
        let recorder = record(&mut mirror, db);

        let first = mirror.children(db).unwrap();
        let events = recorder.events().len();
        let second = mirror.children(db).unwrap();

        assert_eq!(first, second);
        assert_eq!(recorder.events().len(), events);
        assert_eq!(source.connections_opened(), 1);
    }

    #[test]
    fn test_catalog_and_schema_population() {
        let source = MemorySource::new().with_terms(Some("catalog"), Some("schema"));
        source
            .add_catalog("sales")
            .add_schema(Some("sales"), "eu")
            .add_table(Some("sales"), Some("eu"), "orders")
            .add_catalog("hr")
            .add_table(Some("hr"), None, "people");
        let (mut mirror, db) = setup(&source);

        let eu = mirror.schema_by_name(db, "EU").unwrap().unwrap();
        let tables = mirror.children(eu).unwrap();
        assert_eq!(names(&mirror, &tables), vec!["orders"]);
        assert_eq!(
            mirror.container_path(tables[0]),
            (Some("sales".to_string()), Some("eu".to_string()))
        );

        let hr = mirror.catalog_by_name(db, "hr").unwrap().unwrap();
        assert_eq!(mirror.child_kind(hr).unwrap(), Some(NodeKind::Table));
        assert_eq!(mirror.tables(db).unwrap().len(), 2);
    }

    #[test]
    fn test_table_lookup() {
        let source = MemorySource::new();
        source
            .add_schema(None, "a")
            .add_schema(None, "b")
            .add_table(None, Some("a"), "t")
            .add_table(None, Some("b"), "u");
        let (mut mirror, db) = setup(&source);

        let u = mirror.table_by_name(db, None, None, "U").unwrap().unwrap();
        assert_eq!(mirror.node(u).unwrap().name(), "u");
        assert!(mirror.table_by_name(db, None, Some("a"), "u").unwrap().is_none());
        assert!(mirror.table_by_name(db, Some("x"), None, "t").unwrap().is_none());
        assert!(matches!(
            mirror.table_by_name(db, None, None, ""),
            Err(MetadataError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_population_failure_marks_populated() {
        let source = MemorySource::new();
        source.add_schema(None, "s").fail_on(MemoryFailure::FetchSchemas);
        let (mut mirror, db) = setup(&source);

        let err = mirror.populate(db).unwrap_err();
        assert!(matches!(
            err,
            MetadataError::Population {
                operation: "populate database",
                ..
            }
        ));
        assert!(mirror.is_populated(db).unwrap());
        assert!(mirror.children(db).unwrap().is_empty());

        // The connection went back to the pool
        assert_eq!(mirror.pool_metrics(db).unwrap().unwrap().returned, 1);
    }

    #[test]
    fn test_population_surfaces_pool_exhaustion() {
        let source = MemorySource::new();
        source.add_schema(None, "s");
        let mut mirror = MetadataTree::new();
        let db = mirror
            .add_database(
                DataSourceParams::new("tiny", "memory:"),
                Arc::new(source.clone()),
                PoolSettings {
                    max_active: 1,
                    ..PoolSettings::default()
                },
            )
            .unwrap();

        let _held = mirror.get_connection(db).unwrap();
        let err = mirror.populate(db).unwrap_err();
        assert!(matches!(
            err,
            MetadataError::Population {
                source: SourceError::Pool(PoolError::Exhausted { max_active: 1 }),
                ..
            }
        ));
    }

    #[test]
    fn test_refresh_unchanged_source_is_quiet() {
        let source = MemorySource::new().with_terms(None, Some("schema"));
        source
            .add_schema(None, "s")
            .add_table(None, Some("s"), "t");
        let (mut mirror, db) = setup(&source);
        let s = mirror.children(db).unwrap()[0];
        mirror.children(s).unwrap();
        let recorder = record(&mut mirror, db);

        mirror.refresh(db).unwrap();
        assert_eq!(recorder.structural_count(), 0);
        let names: Vec<&str> = recorder.events().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["transaction_started", "transaction_ended"]);
    }

    #[test]
    fn test_refresh_reconciles_by_name() {
        let source = MemorySource::new().with_terms(None, Some("schema"));
        source.add_schema(None, "keep").add_schema(None, "gone");
        let (mut mirror, db) = setup(&source);
        let before = mirror.children(db).unwrap();
        let keep = before[0];

        source.remove_schema(None, "gone").add_schema(None, "new");
        let recorder = record(&mut mirror, db);
        mirror.refresh(db).unwrap();

        let after = mirror.children(db).unwrap();
        assert_eq!(names(&mirror, &after), vec!["keep", "new"]);
        assert_eq!(after[0], keep);
        assert_eq!(recorder.structural_count(), 2);
    }

    #[test]
    fn test_refresh_descends_into_populated_children_only() {
        let source = MemorySource::new().with_terms(None, Some("schema"));
        source
            .add_schema(None, "open")
            .add_schema(None, "closed")
            .add_table(None, Some("open"), "a")
            .add_table(None, Some("closed"), "x");
        let (mut mirror, db) = setup(&source);
        let schemas = mirror.children(db).unwrap();
        let (open, closed) = (schemas[0], schemas[1]);
        let a = mirror.children(open).unwrap()[0];

        source
            .add_table(None, Some("open"), "b")
            .add_table(None, Some("closed"), "y");
        mirror.refresh(db).unwrap();

        assert_eq!(mirror.tree().children(open).unwrap().len(), 2);
        assert_eq!(mirror.tree().children(open).unwrap()[0], a);
        assert!(!mirror.is_populated(closed).unwrap());
    }

    #[test]
    fn test_refresh_skips_unpopulated() {
        let source = MemorySource::new();
        let (mut mirror, db) = setup(&source);
        mirror.refresh(db).unwrap();
        assert_eq!(source.connections_opened(), 0);
    }

    #[test]
    fn test_refresh_failure_still_ends_transaction() {
        let source = MemorySource::new().with_terms(None, Some("schema"));
        source.add_schema(None, "s");
        let (mut mirror, db) = setup(&source);
        mirror.children(db).unwrap();
        let recorder = record(&mut mirror, db);

        source.fail_on(MemoryFailure::FetchSchemas);
        let err = mirror.refresh(db).unwrap_err();
        assert!(matches!(err, MetadataError::Refresh { .. }));
        assert!(matches!(
            recorder.events().last(),
            Some(TreeEvent::TransactionEnded { .. })
        ));
    }

    #[test]
    fn test_reset_clears_children_and_pool() {
        let source = MemorySource::new();
        source.add_schema(None, "s");
        let (mut mirror, db) = setup(&source);
        mirror.children(db).unwrap();
        assert!(mirror.is_connected(db).unwrap());
        assert_eq!(mirror.max_active_connections(db).unwrap(), 1);

        mirror.reset(db).unwrap();
        assert!(!mirror.is_connected(db).unwrap());
        assert_eq!(mirror.max_active_connections(db).unwrap(), 0);
        assert!(!mirror.is_populated(db).unwrap());
        assert!(mirror.tree().children(db).unwrap().is_empty());

        // Repopulates on next read
        assert_eq!(mirror.children(db).unwrap().len(), 1);
    }

    #[test]
    fn test_working_copy_survives_reset() {
        let source = MemorySource::new();
        source.add_schema(None, "s");
        let (mut mirror, db) = setup(&source);
        mirror.children(db).unwrap();

        mirror.set_source_backed(db, false).unwrap();
        assert_eq!(mirror.node(db).unwrap().name(), WORKING_COPY_NAME);
        mirror.reset(db).unwrap();

        assert!(mirror.is_populated(db).unwrap());
        assert_eq!(mirror.tree().children(db).unwrap().len(), 1);
        assert!(!mirror.is_connected(db).unwrap());
    }

    #[test]
    fn test_parameter_change_triggers_reset() {
        let source = MemorySource::new();
        source.add_schema(None, "s");
        let (mut mirror, db) = setup(&source);
        mirror.children(db).unwrap();

        mirror.set_user(db, Some("analyst")).unwrap();
        assert!(!mirror.is_populated(db).unwrap());
        assert_eq!(
            mirror.node(db).unwrap().property(USER_PROPERTY),
            Some(&Value::from("analyst"))
        );

        mirror.children(db).unwrap();
        mirror.set_password(db, Some("secret")).unwrap();
        assert!(mirror.is_populated(db).unwrap());
        assert!(!mirror.is_connected(db).unwrap());
    }

    #[test]
    fn test_connection_properties_only_change_through_the_mirror() {
        let source = MemorySource::new();
        source.add_schema(None, "s");
        let (mut mirror, db) = setup(&source);
        mirror.children(db).unwrap();

        let err = mirror
            .tree_mut()
            .set_property(db, URL_PROPERTY, Some(Value::from("memory:other")))
            .unwrap_err();
        assert!(matches!(err, crate::tree::TreeError::ReservedProperty(_)));
        assert!(mirror.is_populated(db).unwrap());
        assert_eq!(
            mirror.node(db).unwrap().property(URL_PROPERTY),
            Some(&Value::from("memory:warehouse"))
        );

        mirror.set_url(db, "memory:other").unwrap();
        assert!(!mirror.is_populated(db).unwrap());
        assert!(mirror.tree().children(db).unwrap().is_empty());
        assert_eq!(
            mirror.data_source(db).unwrap().map(|p| p.url).as_deref(),
            Some("memory:other")
        );
        assert_eq!(
            mirror.node(db).unwrap().property(URL_PROPERTY),
            Some(&Value::from("memory:other"))
        );
    }

    #[test]
    fn test_remove_database_closes_pool() {
        let source = MemorySource::new();
        source.add_schema(None, "s");
        let (mut mirror, db) = setup(&source);
        mirror.children(db).unwrap();
        let root = mirror.root();

        assert!(matches!(
            mirror.tree_mut().remove_child(root, db),
            Err(crate::tree::TreeError::Pinned(_))
        ));
        assert!(mirror.is_connected(db).unwrap());

        mirror.remove_database(db).unwrap();
        assert!(mirror.databases().is_empty());
        assert!(mirror.node(db).is_err());
        assert!(matches!(
            mirror.get_connection(db),
            Err(MetadataError::NotADatabase(_))
        ));
        assert_eq!(source.connections_closed(), source.connections_opened());
    }

    #[test]
    fn test_rename_fires_name_change() {
        let source = MemorySource::new();
        let (mut mirror, db) = setup(&source);
        let recorder = record(&mut mirror, db);

        mirror.rename_data_source(db, "archive").unwrap();
        assert_eq!(mirror.node(db).unwrap().name(), "archive");
        let events = recorder.events();
        assert!(matches!(
            &events[..],
            [TreeEvent::PropertyChanged(change)] if change.property == "name"
        ));
    }

    #[test]
    fn test_working_copy_database() {
        let mut mirror = MetadataTree::new();
        let db = mirror.add_working_copy().unwrap();
        assert_eq!(mirror.node(db).unwrap().name(), WORKING_COPY_NAME);
        assert!(mirror.children(db).unwrap().is_empty());
        assert!(matches!(
            mirror.get_connection(db),
            Err(MetadataError::Pool(PoolError::NotConfigured))
        ));
        assert!(matches!(
            mirror.set_url(db, "memory:"),
            Err(MetadataError::NotConfigured(_))
        ));
    }
}
