/*
    Store Integration Tests

    Exercises on-disk stores end to end:
    - Persistence and settings across reopen
    - Initialization failures on tampered metadata
    - Consistency check failures after deliberate corruption, and repair
    - Revision behavior across mixed operations
    - Explicit transaction scopes
    - Independent stores on separate threads
*/

use std::path::{Path, PathBuf};

use confstore_core::config::StoreConfig;
use confstore_core::store::LOST_AND_FOUND;
use confstore_core::{ErrorCategory, Store, StoreError, Value, WritableTransaction};
use rusqlite::Connection;
use tempfile::TempDir;

struct TestDb {
    _dir: TempDir,
    path: PathBuf,
}

impl TestDb {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.db");
        Self { _dir: dir, path }
    }

    fn create(&self) -> Store {
        Store::open(&self.path, true, '.').unwrap()
    }

    fn reopen(&self) -> Result<Store, StoreError> {
        Store::open(&self.path, false, '.')
    }

    /// Raw connection for tampering with rows behind the store's back
    fn raw(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }
}

fn entry_id(store: &Store, name: &str) -> i64 {
    store.get_revision(name).unwrap().id
}

#[test]
fn test_values_survive_reopen() {
    let db = TestDb::new();
    {
        let store = db.create();
        store.create("server.http.port", 8080).unwrap();
        store.create("server.http.host", "example.org").unwrap();
        store.create("server.tls.cert", vec![0x30u8, 0x82]).unwrap();
        store.create("server.tls.key", Vec::<u8>::new()).unwrap();
    }

    let store = db.reopen().unwrap();
    assert_eq!(store.get_integer("server.http.port").unwrap(), 8080);
    assert_eq!(store.get_string("server.http.host").unwrap(), "example.org");
    assert_eq!(store.get_binary("server.tls.cert").unwrap(), vec![0x30, 0x82]);
    assert_eq!(store.get_binary("server.tls.key").unwrap(), Vec::<u8>::new());
    assert_eq!(store.get_children("server").unwrap(), vec!["http", "tls"]);
    store.check_data_consistency().unwrap();
}

#[test]
fn test_open_with_config() {
    let db = TestDb::new();
    let config = StoreConfig::new(&db.path)
        .create_if_missing(true)
        .delimiter('/')
        .revision_seed(7);

    let store = Store::open_with_config(&config).unwrap();
    store.create("a/b", 1).unwrap();
    assert_eq!(store.name_delimiter(), '/');
    drop(store);

    let err = db.reopen().err().unwrap();
    assert!(matches!(err, StoreError::InvalidDelimiterSetting(_)));
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_seeded_stores_start_at_same_revisions() {
    let first = TestDb::new();
    let second = TestDb::new();

    let open = |path: &Path| {
        Store::open_with_config(&StoreConfig::new(path).create_if_missing(true).revision_seed(99)).unwrap()
    };
    let a = open(&first.path);
    let b = open(&second.path);

    a.create("x.y", 1).unwrap();
    b.create("x.y", 1).unwrap();

    assert_eq!(a.get_revision("x.y").unwrap(), b.get_revision("x.y").unwrap());
}

#[test]
fn test_newer_major_version_is_rejected() {
    let db = TestDb::new();
    drop(db.create());

    db.raw()
        .execute("UPDATE Settings SET Value = 99 WHERE Name = 'MajorVersion'", [])
        .unwrap();

    assert!(matches!(db.reopen(), Err(StoreError::VersionNotSupported(_))));
}

#[test]
fn test_partial_version_is_rejected() {
    let db = TestDb::new();
    drop(db.create());

    db.raw().execute("DELETE FROM Settings WHERE Name = 'MinorVersion'", []).unwrap();

    assert!(matches!(db.reopen(), Err(StoreError::InvalidConfiguration(_))));
}

#[test]
fn test_malformed_delimiter_setting_is_rejected() {
    let db = TestDb::new();
    drop(db.create());

    db.raw()
        .execute("UPDATE Settings SET Value = '::' WHERE Name = 'NameDelimiter'", [])
        .unwrap();

    assert!(matches!(db.reopen(), Err(StoreError::InvalidConfiguration(_))));
}

#[test]
fn test_reserved_settings_cannot_be_overwritten() {
    let db = TestDb::new();
    {
        let store = db.create();
        assert!(store.set_setting("NameDelimiter", &Value::from("/")).is_err());
        assert!(store.set_setting("MajorVersion", &Value::Integer(99)).is_err());
        store.set_setting("Owner", &Value::from("ops")).unwrap();
    }

    let store = db.reopen().unwrap();
    assert_eq!(store.name_delimiter(), '.');
    assert_eq!(store.version(), (1, 0));
    assert_eq!(store.setting_string("Owner").unwrap(), "ops");
}

#[test]
fn test_root_problems_are_detected() {
    let db = TestDb::new();
    {
        let store = db.create();
        store.create("a", 1).unwrap();
    }

    db.raw().execute("UPDATE Entries SET Value = 5 WHERE Id = 0", []).unwrap();
    assert!(matches!(db.reopen(), Err(StoreError::InvalidRootEntry(_))));

    db.raw().execute("DELETE FROM Entries WHERE Id = 0", []).unwrap();
    let err = db.reopen().err().unwrap();
    assert!(matches!(err, StoreError::RootEntryMissing(_)));
    assert_eq!(err.category(), ErrorCategory::InconsistentData);
}

#[test]
fn test_consistency_after_mixed_operations() {
    let db = TestDb::new();
    let store = db.create();

    for i in 0..20 {
        store.set_or_create(&format!("group{}.item{}", i % 4, i), i).unwrap();
    }
    store.delete("group1", true).unwrap();
    assert!(store.try_delete("group2.item2", false).unwrap());
    store.set("group3.item3", "text").unwrap();

    store.check_data_consistency().unwrap();
    assert_eq!(store.repair_data_consistency().unwrap(), 0);
}

#[test]
fn test_dangling_parent_is_abandoned_then_repaired() {
    let db = TestDb::new();
    let store = db.create();
    store.create("a.b.c", 1).unwrap();
    let b = entry_id(&store, "a.b");

    db.raw()
        .execute("UPDATE Entries SET Parent = 4242 WHERE Id = ?1", [b])
        .unwrap();

    let err = store.check_data_consistency().unwrap_err();
    assert!(matches!(err, StoreError::AbandonedEntry(_)));

    let root_before = store.get_revision("").unwrap();
    assert_eq!(store.repair_data_consistency().unwrap(), 1);
    store.check_data_consistency().unwrap();

    let moved = format!("{}.b.c", LOST_AND_FOUND);
    assert_eq!(store.get_integer(&moved).unwrap(), 1);
    assert_ne!(store.get_revision("").unwrap(), root_before);
}

#[test]
fn test_cycle_is_abandoned_then_repaired() {
    let db = TestDb::new();
    let store = db.create();
    store.create("p.q", 1).unwrap();
    let p = entry_id(&store, "p");
    let q = entry_id(&store, "p.q");

    db.raw()
        .execute("UPDATE Entries SET Parent = ?1 WHERE Id = ?2", [q, p])
        .unwrap();

    assert!(matches!(store.check_data_consistency(), Err(StoreError::AbandonedEntry(_))));

    assert_eq!(store.repair_data_consistency().unwrap(), 1);
    store.check_data_consistency().unwrap();

    let smallest = p.min(q);
    let expected = if smallest == p {
        format!("{}.p.q", LOST_AND_FOUND)
    } else {
        format!("{}.q.p", LOST_AND_FOUND)
    };
    assert!(store.exists(&expected).unwrap());
}

#[test]
fn test_delimiter_in_stored_name_is_detected_then_repaired() {
    let db = TestDb::new();
    let store = db.create();
    store.create("a.b", 1).unwrap();
    let b = entry_id(&store, "a.b");

    db.raw()
        .execute("UPDATE Entries SET Name = 'b.c' WHERE Id = ?1", [b])
        .unwrap();

    let err = store.check_data_consistency().unwrap_err();
    assert!(matches!(err, StoreError::InvalidEntryNameFound(ref m) if m.contains(&b.to_string())));

    assert_eq!(store.repair_data_consistency().unwrap(), 1);
    store.check_data_consistency().unwrap();
    assert_eq!(store.get_integer("a.b_c").unwrap(), 1);
}

#[test]
fn test_unknown_entry_type() {
    let db = TestDb::new();
    let store = db.create();
    store.create("a", 1).unwrap();

    db.raw().execute("UPDATE Entries SET Type = 9 WHERE Name = 'a'", []).unwrap();

    assert!(matches!(store.get("a"), Err(StoreError::UnknownEntryType(_))));
    assert!(matches!(store.get_type("a"), Err(StoreError::UnknownEntryType(_))));
}

#[test]
fn test_revisions_track_subtrees() {
    let db = TestDb::new();
    let store = db.create();
    store.create("app.ui.theme", "dark").unwrap();
    store.create("app.net.port", 80).unwrap();

    let app = store.get_revision("app").unwrap();
    let ui = store.get_revision("app.ui").unwrap();
    let net = store.get_revision("app.net").unwrap();
    let root = store.get_revision("").unwrap();

    store.set("app.net.port", 81).unwrap();
    let after_set = store.get_revision("app").unwrap();
    assert_ne!(after_set, app);
    assert_ne!(store.get_revision("app.net").unwrap(), net);
    assert_eq!(store.get_revision("app.ui").unwrap(), ui);

    store.create("app.net.host", "h").unwrap();
    assert_ne!(store.get_revision("app").unwrap(), after_set);
    assert_eq!(store.get_revision("app.ui").unwrap(), ui);

    store.delete("app.net", true).unwrap();
    assert_eq!(store.get_revision("app.ui").unwrap(), ui);
    assert_ne!(store.get_revision("").unwrap(), root);
    assert_eq!(store.get_revision("app").unwrap().id, app.id);
}

#[test]
fn test_nested_transaction_scenario() {
    let db = TestDb::new();
    {
        let store = db.create();
        let outer = WritableTransaction::new(&store).unwrap();
        store.create("X", 1).unwrap();
        {
            let _inner = WritableTransaction::new(&store).unwrap();
            store.create("Y", 2).unwrap();
        }
        outer.commit().unwrap();
    }

    let store = db.reopen().unwrap();
    assert!(store.exists("X").unwrap());
    assert!(!store.exists("Y").unwrap());
}

#[test]
fn test_dropped_outer_transaction_leaves_nothing() {
    let db = TestDb::new();
    let store = db.create();
    let before = store.get_revision("").unwrap();
    {
        let _tx = WritableTransaction::new(&store).unwrap();
        store.create("a.b", Value::from("v")).unwrap();
        store.set("a.b", 3).unwrap();
    }

    assert!(!store.exists("a").unwrap());
    assert_eq!(store.get_revision("").unwrap(), before);
}

#[test]
fn test_try_delete_respects_children() {
    let db = TestDb::new();
    let store = db.create();
    store.create("a.b.c", 1).unwrap();
    store.create("a.d", 1).unwrap();

    let a = store.get_revision("a").unwrap();
    assert!(!store.try_delete("a.b", false).unwrap());
    assert_eq!(store.get_revision("a").unwrap(), a);
    assert!(store.exists("a.b.c").unwrap());

    let d = store.get_revision("a.d").unwrap();
    assert!(store.try_delete("a.b", true).unwrap());
    assert!(!store.exists("a.b").unwrap());
    assert_ne!(store.get_revision("a").unwrap(), a);
    assert_eq!(store.get_revision("a.d").unwrap(), d);
}

#[test]
fn test_stores_on_separate_threads() {
    let db = TestDb::new();
    drop(db.create());
    let path = db.path.clone();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let path = path.clone();
            std::thread::spawn(move || {
                let store = Store::open(&path, false, '.').unwrap();
                for i in 0..10 {
                    store.create(&format!("worker{}.key{}", worker, i), i).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let store = db.reopen().unwrap();
    assert_eq!(store.get_children("").unwrap().len(), 4);
    assert_eq!(store.get_children("worker2").unwrap().len(), 10);
    store.check_data_consistency().unwrap();
}
