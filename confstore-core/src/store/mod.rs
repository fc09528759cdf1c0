//! Hierarchical configuration store
//!
//! Entries form a tree stored as flat rows in one SQLite table, each row
//! pointing at its parent. Names address entries by path (`a.b.c` with the
//! default delimiter). Every mutation bumps the revision of the touched entry,
//! its ancestors and the root, so a caller can detect changes anywhere below a
//! node by comparing a single [`Revision`].
//!
//! ```no_run
//! use confstore_core::Store;
//!
//! # fn example() -> confstore_core::StoreResult<()> {
//! let store = Store::open("settings.db", true, '.')?;
//! store.set_or_create("server.port", 8080)?;
//!
//! let before = store.get_revision("server")?;
//! store.set("server.port", 8081)?;
//! assert_ne!(before, store.get_revision("server")?);
//! # Ok(())
//! # }
//! ```

mod consistency;
mod entries;
mod errors;
mod name;
mod revision;
mod schema;
mod settings;
mod statements;
mod transaction;
mod types;

pub use consistency::{check_links, EntryLinks, LOST_AND_FOUND};
pub use errors::{ErrorCategory, StoreError, StoreResult};
pub use name::{is_valid_name, join_path, split_name, EntryPath, DEFAULT_NAME_DELIMITER};
pub use revision::RevisionGenerator;
pub use schema::{CURRENT_MAJOR_VERSION, CURRENT_MINOR_VERSION};
pub use transaction::{ReadOnlyTransaction, WritableTransaction};
pub use types::{EntryId, Revision, Value, ValueType, ROOT_ID};

use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tracing::info;

use crate::config::StoreConfig;
use transaction::TransactionHandle;

/// A configuration store backed by one SQLite connection.
///
/// Operations are synchronous. A store is bound to the thread that opened it;
/// open one store per thread against the same file and let SQLite locking
/// coordinate them.
pub struct Store {
    pub(crate) conn: Connection,
    pub(crate) transaction: TransactionHandle,
    delimiter: Cell<char>,
    version: Cell<(i64, i64)>,
    revisions: RefCell<RevisionGenerator>,
}

impl Store {
    /// Open the store at `path`.
    ///
    /// With `create_if_missing` a new database file is created if none
    /// exists. `delimiter` must match the delimiter recorded in an existing
    /// store, or the open fails with [`StoreError::InvalidDelimiterSetting`].
    pub fn open(
        path: impl AsRef<Path>,
        create_if_missing: bool,
        delimiter: char,
    ) -> StoreResult<Self> {
        let config = StoreConfig::new(path.as_ref())
            .create_if_missing(create_if_missing)
            .delimiter(delimiter);
        Self::open_with_config(&config)
    }

    /// Open the store described by `config`
    pub fn open_with_config(config: &StoreConfig) -> StoreResult<Self> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        if config.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let manager = with_connection_setup(
            SqliteConnectionManager::file(&config.path).with_flags(flags),
            config.busy_timeout,
            config.secure_delete,
            config.statement_cache_capacity,
        );
        let conn = manager.connect()?;

        let revisions = match config.revision_seed {
            Some(seed) => RevisionGenerator::from_seed(seed),
            None => RevisionGenerator::new(),
        };

        let store = Self::initialize(conn, config.delimiter, revisions)?;
        info!(
            path = %config.path.display(),
            delimiter = %store.name_delimiter(),
            "opened configuration store"
        );
        Ok(store)
    }

    /// Private in-memory store, gone when dropped
    pub fn memory(delimiter: char) -> StoreResult<Self> {
        let defaults = StoreConfig::default();
        let manager = with_connection_setup(
            SqliteConnectionManager::memory(),
            defaults.busy_timeout,
            defaults.secure_delete,
            defaults.statement_cache_capacity,
        );
        let conn = manager.connect()?;

        Self::initialize(conn, delimiter, RevisionGenerator::new())
    }

    fn initialize(
        conn: Connection,
        delimiter: char,
        revisions: RevisionGenerator,
    ) -> StoreResult<Self> {
        let store = Self {
            conn,
            transaction: Rc::default(),
            delimiter: Cell::new(delimiter),
            version: Cell::new((0, 0)),
            revisions: RefCell::new(revisions),
        };

        let tx = WritableTransaction::new(&store)?;
        store.prepare_schema(delimiter)?;
        tx.commit()?;

        Ok(store)
    }

    /// Delimiter currently used to split names
    pub fn name_delimiter(&self) -> char {
        self.delimiter.get()
    }

    /// `(major, minor)` schema version recorded in the opened store
    pub fn version(&self) -> (i64, i64) {
        self.version.get()
    }

    /// Validate `name` against this store's delimiter and split it
    pub fn parse_name(&self, name: &str) -> StoreResult<EntryPath> {
        split_name(name, self.name_delimiter())
    }

    /// Join `path` with this store's delimiter; inverse of [`Store::parse_name`]
    pub fn path_to_name<S: AsRef<str>>(&self, path: &[S]) -> String {
        join_path(path, self.name_delimiter())
    }

    pub(crate) fn set_delimiter(&self, delimiter: char) {
        self.delimiter.set(delimiter);
    }

    pub(crate) fn next_initial_revision(&self) -> i64 {
        self.revisions.borrow_mut().next_revision()
    }
}

fn with_connection_setup(
    manager: SqliteConnectionManager,
    busy_timeout: Duration,
    secure_delete: bool,
    statement_cache_capacity: usize,
) -> SqliteConnectionManager {
    let capacity = statement_cache_capacity.max(statements::Query::COUNT);
    manager.with_init(move |conn| {
        schema::configure_connection(conn, busy_timeout, secure_delete, capacity)
    })
}
