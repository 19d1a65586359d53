//! Integration tests for change capture and persistence sinks.
//!
//! Drives the persister listener from real tree mutations and metadata
//! population, checking the operation stream and what lands in a SQLite
//! sink file.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p metamirror-core --test persistence_integration
//! ```

mod common;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use uuid::Uuid;

use common::{mirror_of, record_persistence, warehouse_source, ShopDatabase};
use metamirror_core::persist::{
    Converter, DataTypeRegistry, OperationKind, PersistOperation, PersistenceError,
    PersisterListener, RecordingPersister, SqlitePersister,
};
use metamirror_core::tree::{Node, NodeKind, ObjectTree, TreeError};
use metamirror_core::value::{DataType, Image, SimpleValue, Value};

// ============================================================================
// Test Helpers
// ============================================================================

fn object_uuids(operations: &[PersistOperation]) -> Vec<Uuid> {
    operations
        .iter()
        .filter_map(|op| match op {
            PersistOperation::PersistObject { uuid, .. } => Some(*uuid),
            _ => None,
        })
        .collect()
}

fn sink_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("sink").join("mirror.db")
}

fn stored_names(sink: &SqlitePersister, parent: Uuid) -> Vec<String> {
    sink.load_children(Some(parent))
        .expect("Failed to load children")
        .into_iter()
        .map(|child| {
            match sink
                .load_property(child.uuid, "name")
                .expect("Failed to load name")
                .and_then(|p| p.value)
            {
                Some(SimpleValue::Text(name)) => name,
                other => panic!("unexpected name value: {other:?}"),
            }
        })
        .collect()
}

// ============================================================================
// Operation stream
// ============================================================================

#[test]
fn test_attach_persists_every_object_and_property_in_preorder() {
    let source = warehouse_source();
    let (mut mirror, db) = mirror_of(&source);
    mirror.tables(db).expect("populate everything");

    let recorder = record_persistence(&mut mirror, db);
    let operations = recorder.operations();

    let subtree = mirror.tree().nodes().subtree(db);
    let expected_properties: usize = subtree
        .iter()
        .map(|u| 1 + mirror.node(*u).expect("node").properties().count())
        .sum();

    assert_eq!(object_uuids(&operations), subtree);
    assert_eq!(
        recorder.count(OperationKind::PersistProperty),
        expected_properties
    );
    assert!(matches!(
        operations.first(),
        Some(PersistOperation::Begin { label }) if label.contains("warehouse")
    ));
    assert_eq!(operations.last(), Some(&PersistOperation::Commit));
    assert_eq!(recorder.count(OperationKind::Begin), 1);
    assert_eq!(recorder.count(OperationKind::Commit), 1);
}

#[test]
fn test_population_after_attach_persists_each_child() {
    let source = warehouse_source();
    let (mut mirror, db) = mirror_of(&source);
    let recorder = record_persistence(&mut mirror, db);
    recorder.clear();

    let catalogs = mirror.children(db).expect("populate");

    let operations = recorder.operations();
    assert_eq!(object_uuids(&operations), catalogs);
    let indexes: Vec<usize> = operations
        .iter()
        .filter_map(|op| match op {
            PersistOperation::PersistObject { index, parent, .. } => {
                assert_eq!(*parent, Some(db));
                Some(*index)
            }
            _ => None,
        })
        .collect();
    assert_eq!(indexes, vec![0, 1]);
    assert_eq!(
        recorder.count(OperationKind::Begin),
        recorder.count(OperationKind::Commit)
    );
}

#[test]
fn test_cleared_property_uses_old_data_type() {
    let mut tree = ObjectTree::new();
    let node = tree.insert(
        Node::new(NodeKind::Custom("Gauge".into()), "pressure").with_property("level", 5i64),
    );
    let root = tree.root();
    tree.append_child(root, node).expect("attach node");

    let recorder = RecordingPersister::new();
    tree.attach_listener(node, Box::new(PersisterListener::new(recorder.clone())))
        .expect("attach listener");
    recorder.clear();

    tree.set_property(node, "level", None).expect("clear level");

    assert_eq!(
        recorder.operations(),
        vec![PersistOperation::PersistProperty {
            uuid: node,
            property: "level".to_string(),
            data_type: DataType::Integer,
            old: Some(SimpleValue::Integer(5)),
            new: None,
        }]
    );
}

#[test]
fn test_refresh_removals_reach_the_sink() {
    let source = warehouse_source();
    let (mut mirror, db) = mirror_of(&source);
    mirror.tables(db).expect("populate everything");
    let recorder = record_persistence(&mut mirror, db);
    recorder.clear();

    source.remove_catalog("hr");
    mirror.refresh(db).expect("refresh");

    let operations = recorder.operations();
    assert!(matches!(
        operations.first(),
        Some(PersistOperation::Begin { label }) if label.starts_with("Refreshing")
    ));
    assert_eq!(recorder.count(OperationKind::RemoveObject), 1);
    assert_eq!(recorder.count(OperationKind::PersistObject), 0);
    assert_eq!(operations.last(), Some(&PersistOperation::Commit));
}

#[test]
fn test_rejected_attach_is_reported_and_unregistered() {
    let source = warehouse_source();
    let (mut mirror, db) = mirror_of(&source);
    mirror.children(db).expect("populate");

    let recorder = RecordingPersister::new();
    recorder.reject(OperationKind::PersistProperty);
    let err = mirror
        .tree_mut()
        .attach_listener(db, Box::new(PersisterListener::new(recorder.clone())))
        .expect_err("sink rejects properties");

    match err {
        TreeError::Listener { source, .. } => {
            let persistence = source
                .downcast_ref::<PersistenceError>()
                .expect("persistence error");
            assert!(matches!(
                persistence,
                PersistenceError::Rejected {
                    operation: "persist_property",
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(mirror.tree().listeners_of(db).is_empty());
    assert_eq!(recorder.count(OperationKind::Commit), 0);
}

// ============================================================================
// SQLite sink
// ============================================================================

#[test]
fn test_sqlite_sink_mirrors_sqlite_source() {
    let shop = ShopDatabase::create();
    let sink_dir = TempDir::new().expect("Failed to create temp dir");
    let path = sink_path(&sink_dir);

    let (mut mirror, db) = shop.mirror();
    let sink = SqlitePersister::open(&path).expect("Failed to open sink");
    mirror
        .tree_mut()
        .attach_listener(db, Box::new(PersisterListener::new(sink)))
        .expect("attach sink");
    mirror.tables(db).expect("populate everything");

    let reader = SqlitePersister::open(&path).expect("Failed to reopen sink");
    let stored_db = reader
        .load_object(db)
        .expect("load database")
        .expect("database persisted");
    assert_eq!(stored_db.object_type, "Database");
    assert_eq!(stored_names(&reader, db), vec!["main"]);

    let main = reader.load_children(Some(db)).expect("load schemas")[0].uuid;
    let mut tables = stored_names(&reader, main);
    tables.sort();
    assert_eq!(tables, vec!["customers", "orders", "settings"]);
    assert_eq!(
        reader.object_count().expect("count"),
        mirror.tree().nodes().subtree(db).len()
    );
}

#[test]
fn test_sqlite_sink_follows_refresh() {
    let shop = ShopDatabase::create();
    let sink_dir = TempDir::new().expect("Failed to create temp dir");
    let path = sink_path(&sink_dir);

    let (mut mirror, db) = shop.mirror();
    mirror
        .tree_mut()
        .attach_listener(
            db,
            Box::new(PersisterListener::new(
                SqlitePersister::open(&path).expect("Failed to open sink"),
            )),
        )
        .expect("attach sink");
    mirror.tables(db).expect("populate everything");
    let main = mirror.children(db).expect("populated")[0];

    shop.execute("DROP TABLE settings; CREATE TABLE coupons (code TEXT PRIMARY KEY);");
    mirror.disconnect(db).expect("disconnect");
    mirror.refresh(db).expect("refresh");

    let reader = SqlitePersister::open(&path).expect("Failed to reopen sink");
    let mut tables = stored_names(&reader, main);
    tables.sort();
    assert_eq!(tables, vec!["coupons", "customers", "orders"]);
    let indexes: Vec<usize> = reader
        .load_children(Some(main))
        .expect("load tables")
        .iter()
        .map(|t| t.index)
        .collect();
    assert_eq!(indexes, vec![0, 1, 2]);
}

#[test]
fn test_complex_values_survive_the_sink() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = sink_path(&dir);
    let pixels: Vec<u8> = (0..2 * 3 * 4).map(|i| (i * 11) as u8).collect();
    let image = Image::from_rgba(2, 3, pixels).expect("valid image");
    let layout = serde_json::json!({"x": 10, "y": 20, "collapsed": false});

    let mut tree = ObjectTree::new();
    let root = tree.root();
    let node = tree.insert(Node::new(NodeKind::Custom("Diagram".into()), "overview"));
    tree.append_child(root, node).expect("attach node");
    tree.attach_listener(
        node,
        Box::new(PersisterListener::new(
            SqlitePersister::open(&path).expect("Failed to open sink"),
        )),
    )
    .expect("attach sink");

    tree.set_property(node, "thumbnail", Some(Value::Image(image.clone())))
        .expect("set image");
    tree.set_property(node, "layout", Some(Value::Json(layout.clone())))
        .expect("set layout");

    let reader = SqlitePersister::open(&path).expect("Failed to reopen sink");
    let converter = Converter::new(DataTypeRegistry::standard());
    assert_eq!(
        reader
            .load_property(node, "thumbnail")
            .expect("load")
            .map(|p| p.data_type),
        Some(DataType::PngImage)
    );
    assert_eq!(
        reader.load_value(node, "thumbnail", &converter).expect("load"),
        Some(Value::Image(image))
    );
    assert_eq!(
        reader.load_value(node, "layout", &converter).expect("load"),
        Some(Value::Json(layout))
    );
}
