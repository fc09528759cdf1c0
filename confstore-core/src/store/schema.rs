//! Database layout and connection setup
//!
//! The store uses two tables: `Settings` for store-wide key/value settings and
//! `Entries` for the tree itself. Both are created on open if missing; there is
//! no migration machinery beyond the major/minor version gate.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};
use std::time::Duration;

use super::errors::{StoreError, StoreResult};
use super::statements::{prepare, Query};
use super::types::{Value, ValueType};
use super::Store;

/// Major schema version written by this implementation
pub const CURRENT_MAJOR_VERSION: i64 = 1;

/// Minor schema version written by this implementation
pub const CURRENT_MINOR_VERSION: i64 = 0;

pub(crate) const SETTING_MAJOR_VERSION: &str = "MajorVersion";
pub(crate) const SETTING_MINOR_VERSION: &str = "MinorVersion";
pub(crate) const SETTING_NAME_DELIMITER: &str = "NameDelimiter";

pub(crate) const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS Settings (
        Name TEXT PRIMARY KEY,
        Value BLOB
    );

    CREATE TABLE IF NOT EXISTS Entries (
        Id INTEGER PRIMARY KEY,
        Parent INTEGER NOT NULL,
        Revision INTEGER NOT NULL,
        Name TEXT NOT NULL,
        Type INTEGER NOT NULL,
        Value BLOB                      -- NULL only for an empty binary value
    );

    CREATE INDEX IF NOT EXISTS Entries_Name ON Entries(Name);
    CREATE INDEX IF NOT EXISTS Entries_Parent ON Entries(Parent);
    CREATE UNIQUE INDEX IF NOT EXISTS Entries_Name_Parent ON Entries(Name, Parent);
"#;

/// Per-connection settings that cannot be changed inside a transaction
pub(crate) fn configure_connection(
    conn: &mut Connection,
    busy_timeout: Duration,
    secure_delete: bool,
    statement_cache_capacity: usize,
) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    conn.set_prepared_statement_cache_capacity(statement_cache_capacity);

    conn.execute_batch(
        "PRAGMA auto_vacuum = FULL;
         PRAGMA synchronous = FULL;
         PRAGMA foreign_keys = ON;
         PRAGMA recursive_triggers = ON;",
    )?;
    conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| row.get::<_, String>(0))?;
    conn.pragma_update_and_check(None, "secure_delete", secure_delete, |row| row.get::<_, i64>(0))?;

    Ok(())
}

/// Run SQLite's own structural check of the database file
pub(crate) fn check_integrity(conn: &Connection) -> StoreResult<()> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;

    if result != "ok" {
        return Err(StoreError::InvalidConfiguration(format!(
            "database integrity check failed: {}",
            result
        )));
    }

    Ok(())
}

impl Store {
    /// Create tables, then validate or initialize version, delimiter and root.
    ///
    /// Runs inside the writable transaction opened by `Store::initialize`.
    pub(crate) fn prepare_schema(&self, delimiter: char) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        check_integrity(&self.conn)?;

        let version = self.check_or_set_version()?;
        self.version.set(version);

        self.check_or_set_delimiter(delimiter)?;
        self.check_or_create_root()?;

        Ok(())
    }

    fn check_or_set_version(&self) -> StoreResult<(i64, i64)> {
        let major_exists = self.setting_exists_in_tx(SETTING_MAJOR_VERSION)?;
        let minor_exists = self.setting_exists_in_tx(SETTING_MINOR_VERSION)?;

        if !major_exists || !minor_exists {
            if major_exists || minor_exists {
                return Err(StoreError::InvalidConfiguration(
                    "partial version information found".to_string(),
                ));
            }

            self.write_setting_in_tx(SETTING_MAJOR_VERSION, &Value::Integer(CURRENT_MAJOR_VERSION))?;
            self.write_setting_in_tx(SETTING_MINOR_VERSION, &Value::Integer(CURRENT_MINOR_VERSION))?;
        }

        let major = self.typed_setting_in_tx(SETTING_MAJOR_VERSION, ValueType::Integer)?;
        let minor = self.typed_setting_in_tx(SETTING_MINOR_VERSION, ValueType::Integer)?;
        let (major, minor) = match (major, minor) {
            (Value::Integer(major), Value::Integer(minor)) => (major, minor),
            _ => {
                return Err(StoreError::DataTypeMismatch(
                    "version settings must be integers".to_string(),
                ))
            }
        };

        if major > CURRENT_MAJOR_VERSION {
            return Err(StoreError::VersionNotSupported(format!(
                "database version {}.{}, supported up to {}.x",
                major, minor, CURRENT_MAJOR_VERSION
            )));
        }

        Ok((major, minor))
    }

    fn check_or_set_delimiter(&self, requested: char) -> StoreResult<()> {
        if !self.setting_exists_in_tx(SETTING_NAME_DELIMITER)? {
            self.write_setting_in_tx(SETTING_NAME_DELIMITER, &Value::String(requested.to_string()))?;
            self.delimiter.set(requested);
            return Ok(());
        }

        let stored = match self.typed_setting_in_tx(SETTING_NAME_DELIMITER, ValueType::String)? {
            Value::String(s) => s,
            _ => {
                return Err(StoreError::DataTypeMismatch(
                    "name delimiter setting must be text".to_string(),
                ))
            }
        };

        let mut chars = stored.chars();
        let delimiter = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(StoreError::InvalidConfiguration(format!(
                    "invalid value for {} setting: {:?}",
                    SETTING_NAME_DELIMITER, stored
                )))
            }
        };

        if delimiter != requested {
            return Err(StoreError::InvalidDelimiterSetting(format!(
                "expected delimiter {:?} but found {:?} in the store",
                requested, delimiter
            )));
        }

        self.delimiter.set(delimiter);
        Ok(())
    }

    fn check_or_create_root(&self) -> StoreResult<()> {
        let mut stmt = prepare(&self.conn, Query::GetRoot)?;
        let root = stmt
            .query_row([], |row| {
                let id: i64 = row.get(0)?;
                let parent: i64 = row.get(1)?;
                let ty: i64 = row.get(2)?;
                let name: String = row.get(3)?;
                let value_is_zero = matches!(row.get_ref(4)?, ValueRef::Integer(0));
                Ok((id, parent, ty, name, value_is_zero))
            })
            .optional()?;

        match root {
            Some((id, parent, ty, name, value_is_zero)) => {
                if id != 0
                    || parent != 0
                    || ty != ValueType::Integer.as_i64()
                    || !name.is_empty()
                    || !value_is_zero
                {
                    return Err(StoreError::InvalidRootEntry(
                        "root entry contains invalid data".to_string(),
                    ));
                }
            }
            None => {
                let count: i64 =
                    prepare(&self.conn, Query::CountEntries)?.query_row([], |row| row.get(0))?;
                if count != 0 {
                    return Err(StoreError::RootEntryMissing(format!(
                        "missing root entry in a table with {} entries",
                        count
                    )));
                }

                let inserted = prepare(&self.conn, Query::InsertRoot)?
                    .execute(rusqlite::params![ValueType::Integer.as_i64(), 0i64])?;
                if inserted != 1 {
                    return Err(StoreError::InvalidInsert(
                        "failed to insert the root entry".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(tables, vec!["Entries".to_string(), "Settings".to_string()]);
    }

    #[test]
    fn test_name_parent_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        conn.execute(
            "INSERT INTO Entries (Id, Parent, Revision, Name, Type, Value) VALUES (1, 0, 1, 'a', 1, 0)",
            [],
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO Entries (Id, Parent, Revision, Name, Type, Value) VALUES (2, 0, 1, 'a', 1, 0)",
            [],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_configure_connection() {
        let mut conn = Connection::open_in_memory().unwrap();
        configure_connection(&mut conn, Duration::from_secs(1), true, 16).unwrap();

        let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(foreign_keys, 1);
        check_integrity(&conn).unwrap();
    }
}
