//! Entry tree operations
//!
//! Each public operation runs in its own scope: a read-only one for queries,
//! a writable one for mutations. Inside a caller's [`WritableTransaction`]
//! these become savepoints, so a failing operation undoes only itself.
//!
//! [`WritableTransaction`]: super::WritableTransaction

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::errors::{StoreError, StoreResult};
use super::name::EntryPath;
use super::statements::{prepare, Query};
use super::transaction::{ReadOnlyTransaction, WritableTransaction};
use super::types::{EntryId, Revision, Value, ValueType, ROOT_ID};
use super::Store;
use crate::metrics;

/// Ids along the existing prefix of a path, root excluded
struct Resolved {
    chain: Vec<EntryId>,
}

impl Resolved {
    fn is_complete(&self, path: &EntryPath) -> bool {
        self.chain.len() == path.len()
    }

    fn last(&self) -> EntryId {
        self.chain.last().copied().unwrap_or(ROOT_ID)
    }
}

enum DeleteOutcome {
    Deleted(usize),
    NotFound,
    HasChildren,
}

impl Store {
    // ===== Path resolution =====

    fn path_or_root(&self, name: &str) -> StoreResult<EntryPath> {
        if name.is_empty() {
            Ok(Vec::new())
        } else {
            self.parse_name(name)
        }
    }

    pub(crate) fn lookup_child(&self, parent: EntryId, name: &str) -> StoreResult<Option<EntryId>> {
        let mut stmt = prepare(&self.conn, Query::GetEntryId)?;
        Ok(stmt.query_row(params![name, parent], |row| row.get(0)).optional()?)
    }

    /// Follow `path` from the root as far as it exists
    fn resolve(&self, path: &EntryPath) -> StoreResult<Resolved> {
        let mut chain = Vec::with_capacity(path.len());
        let mut parent = ROOT_ID;

        for segment in path {
            match self.lookup_child(parent, segment)? {
                Some(id) => {
                    chain.push(id);
                    parent = id;
                }
                None => break,
            }
        }

        Ok(Resolved { chain })
    }

    /// Ids of every entry along `path`; `EntryNotFound` unless all exist
    fn resolve_existing(&self, name: &str, path: &EntryPath) -> StoreResult<Vec<EntryId>> {
        let resolved = self.resolve(path)?;
        if !resolved.is_complete(path) {
            return Err(StoreError::EntryNotFound(name.to_string()));
        }
        Ok(resolved.chain)
    }

    fn entry_id(&self, name: &str) -> StoreResult<EntryId> {
        let path = self.path_or_root(name)?;
        Ok(self.resolve_existing(name, &path)?.last().copied().unwrap_or(ROOT_ID))
    }

    // ===== Revision bookkeeping =====

    fn read_revision(&self, id: EntryId) -> StoreResult<i64> {
        let mut stmt = prepare(&self.conn, Query::GetRevision)?;
        stmt.query_row([id], |row| row.get(0))
            .optional()?
            .ok_or_else(|| StoreError::EntryNotFound(format!("entry id {}", id)))
    }

    fn bump_revision(&self, id: EntryId) -> StoreResult<()> {
        let next = self.read_revision(id)?.wrapping_add(1);
        let updated = prepare(&self.conn, Query::UpdateRevision)?.execute(params![id, next])?;
        if updated != 1 {
            return Err(StoreError::InvalidQuery(format!("revision update of entry {} changed {} rows", id, updated)));
        }
        Ok(())
    }

    /// Bump the root, then every id of `chain` in order
    pub(crate) fn bump_revisions(&self, chain: &[EntryId]) -> StoreResult<()> {
        self.bump_revision(ROOT_ID)?;
        for &id in chain {
            self.bump_revision(id)?;
        }
        Ok(())
    }

    // ===== Row writes =====

    pub(crate) fn insert_entry(&self, parent: EntryId, name: &str, value: &Value) -> StoreResult<EntryId> {
        let revision = self.next_initial_revision();
        let mut stmt = prepare(&self.conn, Query::InsertEntry)?;
        let id = stmt.insert(params![
            name,
            parent,
            value.value_type().as_i64(),
            revision,
            value.to_entry_column()
        ])?;

        debug!(id, parent, entry = name, "inserted entry");
        Ok(id)
    }

    /// Create `path[from..]` below `parent`; the last segment gets `value`
    fn create_missing(&self, mut parent: EntryId, path: &EntryPath, from: usize, value: &Value) -> StoreResult<()> {
        let intermediate = Value::default();
        let last = path.len() - 1;

        for (index, segment) in path.iter().enumerate().skip(from) {
            let value = if index == last { value } else { &intermediate };
            parent = self.insert_entry(parent, segment, value)?;
        }

        metrics::entries_created((path.len() - from) as u64);
        Ok(())
    }

    fn update_value(&self, id: EntryId, value: &Value) -> StoreResult<()> {
        let updated = prepare(&self.conn, Query::UpdateValue)?.execute(params![
            value.value_type().as_i64(),
            value.to_entry_column(),
            id
        ])?;
        if updated != 1 {
            return Err(StoreError::InvalidQuery(format!("value update of entry {} changed {} rows", id, updated)));
        }

        metrics::entries_updated();
        Ok(())
    }

    fn write(&self, name: &str, value: Value, allow_create: bool, allow_update: bool) -> StoreResult<()> {
        let path = self.parse_name(name)?;
        let tx = WritableTransaction::new(self)?;
        let resolved = self.resolve(&path)?;

        if resolved.is_complete(&path) {
            if !allow_update {
                return Err(StoreError::NameAlreadyExists(name.to_string()));
            }
            self.update_value(resolved.last(), &value)?;
            self.bump_revisions(&resolved.chain)?;
        } else {
            if !allow_create {
                return Err(StoreError::EntryNotFound(name.to_string()));
            }
            self.bump_revisions(&resolved.chain)?;
            self.create_missing(resolved.last(), &path, resolved.chain.len(), &value)?;
        }

        tx.commit()
    }

    // ===== Queries =====

    /// True if an entry named `name` exists
    pub fn exists(&self, name: &str) -> StoreResult<bool> {
        let path = self.parse_name(name)?;
        let _tx = ReadOnlyTransaction::new(self)?;
        Ok(self.resolve(&path)?.is_complete(&path))
    }

    fn type_of(&self, id: EntryId) -> StoreResult<ValueType> {
        let mut stmt = prepare(&self.conn, Query::GetEntryType)?;
        let raw: i64 = stmt.query_row([id], |row| row.get(0))?;
        ValueType::from_column(id, raw)
    }

    pub fn get_type(&self, name: &str) -> StoreResult<ValueType> {
        let path = self.parse_name(name)?;
        let _tx = ReadOnlyTransaction::new(self)?;
        let chain = self.resolve_existing(name, &path)?;
        self.type_of(chain[chain.len() - 1])
    }

    pub fn is_integer(&self, name: &str) -> StoreResult<bool> {
        Ok(self.get_type(name)? == ValueType::Integer)
    }

    pub fn is_string(&self, name: &str) -> StoreResult<bool> {
        Ok(self.get_type(name)? == ValueType::String)
    }

    pub fn is_binary(&self, name: &str) -> StoreResult<bool> {
        Ok(self.get_type(name)? == ValueType::Binary)
    }

    /// Change-detection token of an entry; the empty name is the root.
    ///
    /// The revision changes whenever the entry or anything below it is
    /// created, modified or deleted.
    pub fn get_revision(&self, name: &str) -> StoreResult<Revision> {
        let _tx = ReadOnlyTransaction::new(self)?;
        let id = self.entry_id(name)?;
        Ok(Revision::new(id, self.read_revision(id)?))
    }

    /// True if the entry has at least one child; the empty name is the root
    pub fn has_child(&self, name: &str) -> StoreResult<bool> {
        let _tx = ReadOnlyTransaction::new(self)?;
        let id = self.entry_id(name)?;
        let count: i64 = prepare(&self.conn, Query::CountChildren)?.query_row([id], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Names of the immediate children, ascending
    pub fn get_children(&self, name: &str) -> StoreResult<Vec<String>> {
        let _tx = ReadOnlyTransaction::new(self)?;
        let id = self.entry_id(name)?;
        let mut stmt = prepare(&self.conn, Query::ChildNames)?;
        let names = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub(crate) fn child_ids(&self, parent: EntryId) -> StoreResult<Vec<EntryId>> {
        let mut stmt = prepare(&self.conn, Query::ChildIds)?;
        let ids = stmt
            .query_map([parent], |row| row.get(0))?
            .collect::<Result<Vec<EntryId>, _>>()?;
        Ok(ids)
    }

    /// Typed value of an entry
    pub fn get(&self, name: &str) -> StoreResult<Value> {
        let path = self.parse_name(name)?;
        let _tx = ReadOnlyTransaction::new(self)?;
        let chain = self.resolve_existing(name, &path)?;
        let id = chain[chain.len() - 1];

        let mut stmt = prepare(&self.conn, Query::GetEntryValue)?;
        let value = stmt.query_row([id], |row| {
            let raw_type: i64 = row.get(0)?;
            Ok(ValueType::from_column(id, raw_type)
                .and_then(|ty| Value::from_entry_column(id, ty, row.get_ref(1)?)))
        })?;
        value
    }

    pub fn get_integer(&self, name: &str) -> StoreResult<i64> {
        match self.get(name)? {
            Value::Integer(v) => Ok(v),
            other => Err(wrong_type(name, ValueType::Integer, &other)),
        }
    }

    pub fn get_string(&self, name: &str) -> StoreResult<String> {
        match self.get(name)? {
            Value::String(v) => Ok(v),
            other => Err(wrong_type(name, ValueType::String, &other)),
        }
    }

    pub fn get_binary(&self, name: &str) -> StoreResult<Vec<u8>> {
        match self.get(name)? {
            Value::Binary(v) => Ok(v),
            other => Err(wrong_type(name, ValueType::Binary, &other)),
        }
    }

    // ===== Mutations =====

    /// Create a new entry; missing intermediate entries are created as `Integer(0)`
    pub fn create(&self, name: &str, value: impl Into<Value>) -> StoreResult<()> {
        self.write(name, value.into(), true, false)
    }

    /// Overwrite the type and value of an existing entry
    pub fn set(&self, name: &str, value: impl Into<Value>) -> StoreResult<()> {
        self.write(name, value.into(), false, true)
    }

    /// Overwrite the entry if it exists, create it otherwise
    pub fn set_or_create(&self, name: &str, value: impl Into<Value>) -> StoreResult<()> {
        self.write(name, value.into(), true, true)
    }

    /// Delete an entry; `false` if it is missing, or has children and
    /// `recursive` is not set.
    pub fn try_delete(&self, name: &str, recursive: bool) -> StoreResult<bool> {
        Ok(matches!(self.delete_entry(name, recursive)?, DeleteOutcome::Deleted(_)))
    }

    /// Delete an entry, and with `recursive` its whole subtree
    pub fn delete(&self, name: &str, recursive: bool) -> StoreResult<()> {
        match self.delete_entry(name, recursive)? {
            DeleteOutcome::Deleted(_) => Ok(()),
            DeleteOutcome::NotFound => Err(StoreError::EntryNotFound(name.to_string())),
            DeleteOutcome::HasChildren => Err(StoreError::HasChildEntry(name.to_string())),
        }
    }

    fn delete_entry(&self, name: &str, recursive: bool) -> StoreResult<DeleteOutcome> {
        let path = self.parse_name(name)?;
        let tx = WritableTransaction::new(self)?;

        let resolved = self.resolve(&path)?;
        if !resolved.is_complete(&path) {
            return Ok(DeleteOutcome::NotFound);
        }
        let (&id, ancestors) = match resolved.chain.split_last() {
            Some(split) => split,
            None => return Ok(DeleteOutcome::NotFound),
        };

        let subtree = self.collect_subtree(id)?;
        if subtree.len() > 1 && !recursive {
            return Ok(DeleteOutcome::HasChildren);
        }

        // children before parents
        let mut stmt = prepare(&self.conn, Query::DeleteEntry)?;
        for &doomed in subtree.iter().rev() {
            stmt.execute([doomed])?;
        }
        drop(stmt);

        self.bump_revisions(ancestors)?;
        tx.commit()?;

        metrics::entries_deleted(subtree.len() as u64);
        debug!(entry = name, removed = subtree.len(), "deleted entry");
        Ok(DeleteOutcome::Deleted(subtree.len()))
    }

    /// `id` followed by all its descendants, parents before children
    fn collect_subtree(&self, id: EntryId) -> StoreResult<Vec<EntryId>> {
        let mut order = vec![id];
        let mut next = 0;

        while next < order.len() {
            let children = self.child_ids(order[next])?;
            order.extend(children);
            next += 1;
        }

        Ok(order)
    }
}

fn wrong_type(name: &str, expected: ValueType, found: &Value) -> StoreError {
    StoreError::WrongValueType(format!(
        "{} is {}, not {}",
        name,
        found.value_type(),
        expected
    ))
}
