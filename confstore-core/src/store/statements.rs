//! Prepared statement cache
//!
//! Every query the store issues is one [`Query`] variant. Statements are
//! prepared on first use and served from rusqlite's per-connection cache
//! afterwards; the cache resets a statement before handing it out again.

use rusqlite::{CachedStatement, Connection};

use super::errors::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Query {
    SettingExists,
    GetSetting,
    SetSetting,
    GetRoot,
    CountEntries,
    InsertRoot,
    GetEntryId,
    GetEntryType,
    GetEntryValue,
    GetEntryParent,
    GetRevision,
    UpdateRevision,
    UpdateValue,
    InsertEntry,
    CountChildren,
    ChildIds,
    ChildNames,
    DeleteEntry,
    DistinctNames,
    IdsByName,
    NonRootIds,
    NamesContaining,
    AllLinks,
    MoveEntry,
}

impl Query {
    /// Number of distinct queries, used to size the statement cache
    pub(crate) const COUNT: usize = 24;

    pub(crate) fn sql(self) -> &'static str {
        match self {
            Query::SettingExists => "SELECT 1 FROM Settings WHERE Name = ?1",
            Query::GetSetting => "SELECT Value FROM Settings WHERE Name = ?1",
            Query::SetSetting => "INSERT OR REPLACE INTO Settings (Name, Value) VALUES (?1, ?2)",
            Query::GetRoot => "SELECT Id, Parent, Type, Name, Value FROM Entries WHERE Id = 0",
            Query::CountEntries => "SELECT COUNT(Id) FROM Entries",
            Query::InsertRoot => {
                "INSERT INTO Entries (Id, Parent, Revision, Type, Name, Value) VALUES (0, 0, 0, ?1, '', ?2)"
            }
            Query::GetEntryId => "SELECT Id FROM Entries WHERE Name = ?1 AND Parent = ?2 AND Id != 0",
            Query::GetEntryType => "SELECT Type FROM Entries WHERE Id = ?1",
            Query::GetEntryValue => "SELECT Type, Value FROM Entries WHERE Id = ?1",
            Query::GetEntryParent => "SELECT Parent FROM Entries WHERE Id = ?1",
            Query::GetRevision => "SELECT Revision FROM Entries WHERE Id = ?1",
            Query::UpdateRevision => "UPDATE Entries SET Revision = ?2 WHERE Id = ?1",
            Query::UpdateValue => "UPDATE Entries SET Type = ?1, Value = ?2 WHERE Id = ?3",
            Query::InsertEntry => {
                "INSERT INTO Entries (Name, Parent, Type, Revision, Value) VALUES (?1, ?2, ?3, ?4, ?5)"
            }
            Query::CountChildren => "SELECT COUNT(Id) FROM Entries WHERE Parent = ?1 AND Id != 0",
            Query::ChildIds => "SELECT Id FROM Entries WHERE Parent = ?1 AND Id != 0 ORDER BY Name",
            Query::ChildNames => {
                "SELECT Name FROM Entries WHERE Parent = ?1 AND Id != 0 ORDER BY Name"
            }
            Query::DeleteEntry => "DELETE FROM Entries WHERE Id = ?1",
            Query::DistinctNames => "SELECT DISTINCT Name FROM Entries WHERE Id != 0",
            Query::IdsByName => "SELECT Id FROM Entries WHERE Name = ?1 AND Id != 0 ORDER BY Id",
            Query::NonRootIds => "SELECT Id FROM Entries WHERE Id != 0",
            Query::NamesContaining => "SELECT COUNT(Id) FROM Entries WHERE instr(Name, ?1) > 0",
            Query::AllLinks => "SELECT Id, Parent, Name FROM Entries WHERE Id != 0 ORDER BY Id",
            Query::MoveEntry => "UPDATE Entries SET Parent = ?2, Name = ?3 WHERE Id = ?1",
        }
    }
}

/// Fetch the prepared statement for `query`, preparing it on first use.
pub(crate) fn prepare(conn: &Connection, query: Query) -> StoreResult<CachedStatement<'_>> {
    Ok(conn.prepare_cached(query.sql())?)
}
