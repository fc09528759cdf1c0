//! Transaction scopes
//!
//! A [`Store`] runs at most one SQLite transaction at a time. Scopes nest:
//! the outermost scope owns the real `BEGIN`/`COMMIT`, every nested writable
//! scope runs inside its own savepoint. Dropping a scope without committing
//! undoes exactly the writes made since it was opened.
//!
//! ```no_run
//! use confstore_core::{Store, WritableTransaction};
//!
//! # fn example(store: &Store) -> confstore_core::StoreResult<()> {
//! let tx = WritableTransaction::new(store)?;
//! store.set_or_create("server.port", 8080)?;
//! store.set_or_create("server.host", "localhost")?;
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! Scopes are meant to end in reverse order of opening. If an outer nested
//! scope ends first, SQLite ends the savepoints opened after it too: a
//! rollback undoes their writes, a release folds them into the enclosing
//! scope. The inner scopes then find their savepoint gone and their own
//! drop does nothing, while their `commit` fails with `InvalidTransaction`.
//!
//! A failed commit, savepoint release or rollback leaves the connection in an
//! unknown state. The process is aborted in that case instead of letting the
//! caller continue on top of it.

use rusqlite::Connection;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, error};

use super::errors::{StoreError, StoreResult};
use super::Store;
use crate::metrics;

/// Shared handle to the transaction bookkeeping of one store
pub(crate) type TransactionHandle = Rc<RefCell<TransactionSlot>>;

#[derive(Debug, Default)]
pub(crate) struct TransactionSlot {
    active: Option<ActiveTransaction>,
    next_id: u64,
    next_savepoint: u64,
    /// Savepoints still open in the active transaction, oldest first
    savepoints: Vec<String>,
}

impl TransactionSlot {
    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_writable(&self) -> bool {
        self.active.map(|a| a.writable).unwrap_or(false)
    }

    fn savepoint_position(&self, name: &str) -> Option<usize> {
        self.savepoints.iter().position(|sp| sp == name)
    }

    fn is_current(&self, id: u64) -> bool {
        self.active.map(|a| a.id == id).unwrap_or(false)
    }

    fn start(&mut self, writable: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.active = Some(ActiveTransaction { id, writable });
        self.savepoints.clear();
        id
    }

    fn savepoint_name(&mut self) -> String {
        let name = format!("confstore_sp_{}", self.next_savepoint);
        self.next_savepoint += 1;
        name
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveTransaction {
    id: u64,
    writable: bool,
}

fn fatal(action: &str, err: rusqlite::Error) -> ! {
    error!(error = %err, "{} failed, transaction state is undefined; aborting", action);
    std::process::abort()
}

/// Read scope: joins the active transaction or starts a deferred one.
///
/// While it is alive no implicit writable scope can be opened on the same
/// store, so a sequence of reads sees one consistent snapshot.
pub struct ReadOnlyTransaction<'s> {
    conn: &'s Connection,
    slot: TransactionHandle,
    transaction_id: u64,
    outermost: bool,
}

impl<'s> ReadOnlyTransaction<'s> {
    pub fn new(store: &'s Store) -> StoreResult<Self> {
        let conn = &store.conn;
        let slot = Rc::clone(&store.transaction);

        let (transaction_id, outermost) = {
            let mut state = slot.borrow_mut();
            let active = state.active;
            match active {
                Some(active) => (active.id, false),
                None => {
                    conn.execute_batch("BEGIN DEFERRED")?;
                    let id = state.start(false);
                    debug!(transaction = id, "began read-only transaction");
                    (id, true)
                }
            }
        };

        Ok(Self {
            conn,
            slot,
            transaction_id,
            outermost,
        })
    }
}

impl Drop for ReadOnlyTransaction<'_> {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }

        let mut state = self.slot.borrow_mut();
        if !state.is_current(self.transaction_id) {
            return;
        }
        state.active = None;

        if !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                fatal("ending read-only transaction", e);
            }
        }
        debug!(transaction = self.transaction_id, "ended read-only transaction");
    }
}

/// Write scope: starts an immediate transaction or a savepoint in the active one.
///
/// Opening it while a read-only transaction is active fails with
/// [`StoreError::InvalidTransaction`]; there is no upgrade path.
pub struct WritableTransaction<'s> {
    conn: &'s Connection,
    slot: TransactionHandle,
    transaction_id: u64,
    savepoint: Option<String>,
    committed: bool,
}

impl<'s> WritableTransaction<'s> {
    pub fn new(store: &'s Store) -> StoreResult<Self> {
        let conn = &store.conn;
        let slot = Rc::clone(&store.transaction);

        let (transaction_id, savepoint) = {
            let mut state = slot.borrow_mut();
            let active = state.active;
            match active {
                Some(active) if !active.writable => {
                    return Err(StoreError::InvalidTransaction(
                        "a read-only transaction is already active".to_string(),
                    ));
                }
                Some(active) => {
                    let name = state.savepoint_name();
                    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
                    state.savepoints.push(name.clone());
                    debug!(transaction = active.id, savepoint = %name, "opened savepoint");
                    (active.id, Some(name))
                }
                None => {
                    conn.execute_batch("BEGIN IMMEDIATE")?;
                    let id = state.start(true);
                    debug!(transaction = id, "began writable transaction");
                    (id, None)
                }
            }
        };

        Ok(Self {
            conn,
            slot,
            transaction_id,
            savepoint,
            committed: false,
        })
    }

    /// True if this scope owns the underlying transaction
    pub fn is_outermost(&self) -> bool {
        self.savepoint.is_none()
    }

    /// Commit this scope.
    ///
    /// The outermost scope makes its changes durable; a nested scope folds its
    /// changes into the enclosing one. Fails with `InvalidTransaction` if the
    /// enclosing transaction has already ended.
    pub fn commit(mut self) -> StoreResult<()> {
        let mut state = self.slot.borrow_mut();
        if !state.is_current(self.transaction_id) {
            return Err(StoreError::InvalidTransaction(
                "the enclosing transaction has already ended".to_string(),
            ));
        }

        match &self.savepoint {
            Some(name) => {
                let position = match state.savepoint_position(name) {
                    Some(position) => position,
                    None => {
                        return Err(StoreError::InvalidTransaction(format!(
                            "savepoint {} was already ended by an earlier scope",
                            name
                        )))
                    }
                };
                if let Err(e) = self.conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name)) {
                    fatal("releasing savepoint", e);
                }
                state.savepoints.truncate(position);
                debug!(transaction = self.transaction_id, savepoint = %name, "released savepoint");
            }
            None => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    fatal("committing transaction", e);
                }
                state.active = None;
                state.savepoints.clear();
                metrics::transaction_committed();
                debug!(transaction = self.transaction_id, "committed transaction");
            }
        }

        drop(state);
        self.committed = true;
        Ok(())
    }
}

impl Drop for WritableTransaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let mut state = self.slot.borrow_mut();
        if !state.is_current(self.transaction_id) {
            return;
        }

        match &self.savepoint {
            Some(name) => {
                let position = match state.savepoint_position(name) {
                    Some(position) => position,
                    None => return,
                };
                state.savepoints.truncate(position);
                if !self.conn.is_autocommit() {
                    let sql = format!("ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}", name);
                    if let Err(e) = self.conn.execute_batch(&sql) {
                        fatal("rolling back savepoint", e);
                    }
                }
                debug!(transaction = self.transaction_id, savepoint = %name, "rolled back savepoint");
            }
            None => {
                state.active = None;
                state.savepoints.clear();
                if !self.conn.is_autocommit() {
                    if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                        fatal("rolling back transaction", e);
                    }
                }
                debug!(transaction = self.transaction_id, "rolled back transaction");
            }
        }
        metrics::transaction_rolled_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::memory('.').unwrap()
    }

    #[test]
    fn test_scopes_return_to_idle() {
        let store = store();
        {
            let _tx = WritableTransaction::new(&store).unwrap();
            assert!(store.transaction.borrow().is_writable());
        }
        assert!(!store.transaction.borrow().is_active());

        {
            let _tx = ReadOnlyTransaction::new(&store).unwrap();
            assert!(store.transaction.borrow().is_active());
            assert!(!store.transaction.borrow().is_writable());
        }
        assert!(!store.transaction.borrow().is_active());
    }

    #[test]
    fn test_no_upgrade_from_read_only() {
        let store = store();
        let _read = ReadOnlyTransaction::new(&store).unwrap();

        let err = WritableTransaction::new(&store).err().unwrap();
        assert!(matches!(err, StoreError::InvalidTransaction(_)));

        // implicit writes hit the same wall
        let err = store.create("a", 1).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransaction(_)));
    }

    #[test]
    fn test_read_only_inside_writable_is_allowed() {
        let store = store();
        let tx = WritableTransaction::new(&store).unwrap();
        {
            let _read = ReadOnlyTransaction::new(&store).unwrap();
            assert!(!store.exists("a").unwrap());
        }
        store.create("a", 1).unwrap();
        tx.commit().unwrap();

        assert!(store.exists("a").unwrap());
    }

    #[test]
    fn test_nested_rollback_keeps_outer_writes() {
        let store = store();

        let outer = WritableTransaction::new(&store).unwrap();
        assert!(outer.is_outermost());
        store.create("x", 1).unwrap();
        {
            let inner = WritableTransaction::new(&store).unwrap();
            assert!(!inner.is_outermost());
            store.create("y", 2).unwrap();
        }
        outer.commit().unwrap();

        assert!(store.exists("x").unwrap());
        assert!(!store.exists("y").unwrap());
    }

    #[test]
    fn test_committed_inner_scope_survives_sibling_rollback() {
        let store = store();

        let outer = WritableTransaction::new(&store).unwrap();
        {
            let first = WritableTransaction::new(&store).unwrap();
            store.create("kept", 1).unwrap();
            first.commit().unwrap();
        }
        {
            let _second = WritableTransaction::new(&store).unwrap();
            store.create("dropped", 1).unwrap();
        }
        outer.commit().unwrap();

        assert!(store.exists("kept").unwrap());
        assert!(!store.exists("dropped").unwrap());
    }

    #[test]
    fn test_outer_rollback_discards_committed_inner() {
        let store = store();
        {
            let _outer = WritableTransaction::new(&store).unwrap();
            let inner = WritableTransaction::new(&store).unwrap();
            store.create("a", 1).unwrap();
            inner.commit().unwrap();
        }
        assert!(!store.exists("a").unwrap());
    }

    #[test]
    fn test_sibling_scopes_dropped_out_of_order() {
        let store = store();

        let outer = WritableTransaction::new(&store).unwrap();
        store.create("base", 1).unwrap();
        let first = WritableTransaction::new(&store).unwrap();
        store.create("first", 1).unwrap();
        let second = WritableTransaction::new(&store).unwrap();
        store.create("second", 1).unwrap();

        // ending `first` also ends `second`, whose drop is then a no-op
        drop(first);
        drop(second);
        assert!(store.transaction.borrow().savepoints.is_empty());

        outer.commit().unwrap();
        assert!(store.exists("base").unwrap());
        assert!(!store.exists("first").unwrap());
        assert!(!store.exists("second").unwrap());
    }

    #[test]
    fn test_commit_of_ended_savepoint_is_rejected() {
        let store = store();

        let outer = WritableTransaction::new(&store).unwrap();
        let first = WritableTransaction::new(&store).unwrap();
        let second = WritableTransaction::new(&store).unwrap();
        store.create("a", 1).unwrap();
        first.commit().unwrap();

        let err = second.commit().unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransaction(_)));

        outer.commit().unwrap();
        assert!(store.exists("a").unwrap());
    }

    #[test]
    fn test_commit_after_outer_ended_is_rejected() {
        let store = store();

        let outer = WritableTransaction::new(&store).unwrap();
        let inner = WritableTransaction::new(&store).unwrap();
        outer.commit().unwrap();

        let err = inner.commit().unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransaction(_)));
        assert!(!store.transaction.borrow().is_active());
    }
}
