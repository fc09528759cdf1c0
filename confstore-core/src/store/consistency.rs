//! Structural verification and repair of the entry tree
//!
//! The checker reads the tree through [`EntryLinks`], so it can be run
//! against anything that can list ids, names and parent links.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};

use super::errors::{StoreError, StoreResult};
use super::name::is_valid_segment;
use super::statements::{prepare, Query};
use super::transaction::{ReadOnlyTransaction, WritableTransaction};
use super::types::{EntryId, Value, ROOT_ID};
use super::Store;
use crate::metrics;

/// Top-level entry that collects entries re-attached by repair
pub const LOST_AND_FOUND: &str = "lost+found";

/// Read access to the tree structure, root excluded from every listing
pub trait EntryLinks {
    /// Every distinct stored name
    fn distinct_names(&self) -> StoreResult<Vec<String>>;

    /// Ids of all entries named `name`, ascending
    fn ids_named(&self, name: &str) -> StoreResult<Vec<EntryId>>;

    /// All ids, duplicates included if the source has any
    fn all_ids(&self) -> StoreResult<Vec<EntryId>>;

    /// Ids of the immediate children of `parent`
    fn children_of(&self, parent: EntryId) -> StoreResult<Vec<EntryId>>;
}

fn format_ids(ids: &[EntryId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

/// Verify names and linkage of the tree exposed by `links`.
///
/// Fails with the first problem found: `InvalidEntryNameFound` for a name
/// containing `delimiter`, `EntryIdNotUnique`, `InvalidEntryLinking` when an
/// id is reached twice, `AbandonedEntry` for ids not reachable from the root.
pub fn check_links(links: &impl EntryLinks, delimiter: char) -> StoreResult<()> {
    for name in links.distinct_names()? {
        if name.contains(delimiter) {
            let ids = links.ids_named(&name)?;
            return Err(StoreError::InvalidEntryNameFound(format!(
                "name {:?} contains the delimiter (ids {})",
                name,
                format_ids(&ids)
            )));
        }
    }

    let mut unvisited = HashSet::new();
    for id in links.all_ids()? {
        if !unvisited.insert(id) {
            return Err(StoreError::EntryIdNotUnique(format!("id {} is used more than once", id)));
        }
    }

    let mut worklist = vec![ROOT_ID];
    while let Some(parent) = worklist.pop() {
        for child in links.children_of(parent)? {
            if !unvisited.remove(&child) {
                return Err(StoreError::InvalidEntryLinking(format!(
                    "entry {} is reached more than once (via parent {})",
                    child, parent
                )));
            }
            worklist.push(child);
        }
    }

    if !unvisited.is_empty() {
        let mut abandoned: Vec<EntryId> = unvisited.into_iter().collect();
        abandoned.sort_unstable();
        return Err(StoreError::AbandonedEntry(format!(
            "entries not reachable from root: {}",
            format_ids(&abandoned)
        )));
    }

    Ok(())
}

impl EntryLinks for Store {
    fn distinct_names(&self) -> StoreResult<Vec<String>> {
        let mut stmt = prepare(&self.conn, Query::DistinctNames)?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn ids_named(&self, name: &str) -> StoreResult<Vec<EntryId>> {
        let mut stmt = prepare(&self.conn, Query::IdsByName)?;
        let ids = stmt
            .query_map([name], |row| row.get(0))?
            .collect::<Result<Vec<EntryId>, _>>()?;
        Ok(ids)
    }

    fn all_ids(&self) -> StoreResult<Vec<EntryId>> {
        let mut stmt = prepare(&self.conn, Query::NonRootIds)?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<EntryId>, _>>()?;
        Ok(ids)
    }

    fn children_of(&self, parent: EntryId) -> StoreResult<Vec<EntryId>> {
        self.child_ids(parent)
    }
}

#[derive(Debug, Clone)]
struct Link {
    parent: EntryId,
    name: String,
}

impl Store {
    /// Verify the structure of the whole tree in one read scope
    pub fn check_data_consistency(&self) -> StoreResult<()> {
        let _tx = ReadOnlyTransaction::new(self)?;
        metrics::consistency_check();

        let result = check_links(self, self.name_delimiter());
        if let Err(e) = &result {
            metrics::consistency_failure();
            warn!(error = %e, "consistency check failed");
        }
        result
    }

    /// Fix every problem [`Store::check_data_consistency`] can report.
    ///
    /// Names containing the delimiter are rewritten, then entries unreachable
    /// from the root are moved below a top-level `lost+found` entry. Returns
    /// the number of entries renamed or moved; 0 means nothing was wrong.
    pub fn repair_data_consistency(&self) -> StoreResult<i64> {
        let tx = WritableTransaction::new(self)?;
        let mut touched = BTreeSet::new();

        let renamed = self.repair_names(&mut touched)?;
        let moved = self.reattach_abandoned(&mut touched)?;

        let total = renamed + moved;
        if total > 0 {
            let mut bumped = BTreeSet::new();
            for id in touched {
                bumped.extend(self.ancestry(id)?);
            }
            self.bump_revisions(&bumped.into_iter().collect::<Vec<_>>())?;
        }

        tx.commit()?;

        if total > 0 {
            metrics::repair_moved(total as u64);
            info!(renamed, moved, "repaired configuration store");
        }
        Ok(total as i64)
    }

    fn read_links(&self) -> StoreResult<BTreeMap<EntryId, Link>> {
        let mut stmt = prepare(&self.conn, Query::AllLinks)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, Link { parent: row.get(1)?, name: row.get(2)? }))
        })?;

        let mut links = BTreeMap::new();
        for row in rows {
            let (id, link) = row?;
            links.insert(id, link);
        }
        Ok(links)
    }

    fn move_entry(&self, id: EntryId, parent: EntryId, name: &str) -> StoreResult<()> {
        let updated = prepare(&self.conn, Query::MoveEntry)?.execute(rusqlite::params![id, parent, name])?;
        if updated != 1 {
            return Err(StoreError::InvalidQuery(format!("moving entry {} changed {} rows", id, updated)));
        }
        Ok(())
    }

    /// `base`, or `base_<id>` (then `base_<id>_<n>`) if a sibling already uses it
    fn free_name(&self, parent: EntryId, base: &str, id: EntryId) -> StoreResult<String> {
        let mut candidate = base.to_string();
        let mut attempt = 0;

        loop {
            match self.lookup_child(parent, &candidate)? {
                None => return Ok(candidate),
                Some(existing) if existing == id => return Ok(candidate),
                Some(_) => {
                    attempt += 1;
                    candidate = if attempt == 1 {
                        format!("{}_{}", base, id)
                    } else {
                        format!("{}_{}_{}", base, id, attempt)
                    };
                }
            }
        }
    }

    fn repair_names(&self, touched: &mut BTreeSet<EntryId>) -> StoreResult<usize> {
        let delimiter = self.name_delimiter();
        let replacement = if delimiter == '_' { "-" } else { "_" };
        let mut renamed = 0;

        for (id, link) in self.read_links()? {
            if !link.name.contains(delimiter) {
                continue;
            }

            let base = link.name.replace(delimiter, replacement);
            let name = self.free_name(link.parent, &base, id)?;
            self.move_entry(id, link.parent, &name)?;

            warn!(id, from = %link.name, to = %name, "renamed entry with invalid name");
            touched.insert(id);
            renamed += 1;
        }

        Ok(renamed)
    }

    fn lost_and_found(&self) -> StoreResult<EntryId> {
        let delimiter = self.name_delimiter();
        let name: String = LOST_AND_FOUND.chars().filter(|c| *c != delimiter).collect();
        debug_assert!(is_valid_segment(&name, delimiter));

        match self.lookup_child(ROOT_ID, &name)? {
            Some(id) => Ok(id),
            None => self.insert_entry(ROOT_ID, &name, &Value::default()),
        }
    }

    fn reattach_abandoned(&self, touched: &mut BTreeSet<EntryId>) -> StoreResult<usize> {
        let mut moved = 0;
        let mut recovery = None;

        loop {
            let links = self.read_links()?;
            let reachable = reachable_from_root(&links);
            let abandoned: BTreeSet<EntryId> =
                links.keys().copied().filter(|id| !reachable.contains(id)).collect();

            let subtree_root = match pick_subtree_root(&links, &abandoned) {
                Some(id) => id,
                None => break,
            };

            let target = match recovery {
                Some(id) => id,
                None => {
                    let id = self.lost_and_found()?;
                    recovery = Some(id);
                    id
                }
            };

            let original = &links[&subtree_root];
            let name = self.free_name(target, &original.name, subtree_root)?;
            self.move_entry(subtree_root, target, &name)?;

            warn!(
                id = subtree_root,
                old_parent = original.parent,
                name = %name,
                "re-attached abandoned entry"
            );
            touched.insert(subtree_root);
            moved += 1;
        }

        Ok(moved)
    }

    /// `id` and its ancestors, root excluded
    fn ancestry(&self, id: EntryId) -> StoreResult<Vec<EntryId>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = id;

        while current != ROOT_ID {
            if !seen.insert(current) {
                return Err(StoreError::InvalidEntryLinking(format!("entry {} is part of a cycle", current)));
            }
            chain.push(current);

            let mut stmt = prepare(&self.conn, Query::GetEntryParent)?;
            current = stmt.query_row([current], |row| row.get(0))?;
        }

        chain.reverse();
        Ok(chain)
    }
}

fn reachable_from_root(links: &BTreeMap<EntryId, Link>) -> HashSet<EntryId> {
    let mut children: BTreeMap<EntryId, Vec<EntryId>> = BTreeMap::new();
    for (&id, link) in links {
        children.entry(link.parent).or_default().push(id);
    }

    let mut reachable = HashSet::new();
    let mut worklist = vec![ROOT_ID];
    while let Some(parent) = worklist.pop() {
        if let Some(kids) = children.get(&parent) {
            for &child in kids {
                if reachable.insert(child) {
                    worklist.push(child);
                }
            }
        }
    }
    reachable
}

/// Entry to move next: one with a dangling parent first, otherwise the
/// smallest id on a parent cycle.
fn pick_subtree_root(links: &BTreeMap<EntryId, Link>, abandoned: &BTreeSet<EntryId>) -> Option<EntryId> {
    let dangling = abandoned.iter().copied().find(|id| {
        let parent = links[id].parent;
        parent != ROOT_ID && !links.contains_key(&parent)
    });
    if dangling.is_some() {
        return dangling;
    }

    // walk up from any abandoned entry until a node repeats; that node is on a cycle
    let start = *abandoned.iter().next()?;
    let mut seen = HashSet::new();
    let mut current = start;
    while seen.insert(current) {
        current = links.get(&current)?.parent;
    }

    let mut smallest = current;
    let mut walker = links.get(&current)?.parent;
    while walker != current {
        smallest = smallest.min(walker);
        walker = links.get(&walker)?.parent;
    }
    Some(smallest)
}
