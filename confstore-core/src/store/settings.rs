//! Store-wide settings and the name delimiter
//!
//! Settings are untyped in the table; the column's storage class decides the
//! type a setting reads back as.

use rusqlite::types::ValueRef;
use rusqlite::OptionalExtension;
use tracing::info;

use super::errors::{StoreError, StoreResult};
use super::schema::{SETTING_MAJOR_VERSION, SETTING_MINOR_VERSION, SETTING_NAME_DELIMITER};
use super::statements::{prepare, Query};
use super::transaction::{ReadOnlyTransaction, WritableTransaction};
use super::types::{Value, ValueType};
use super::Store;

fn setting_from_column(name: &str, raw: ValueRef<'_>) -> StoreResult<Value> {
    match raw {
        ValueRef::Integer(v) => Ok(Value::Integer(v)),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec()).map(Value::String).map_err(|_| {
            StoreError::DataTypeMismatch(format!("setting {} holds invalid UTF-8", name))
        }),
        ValueRef::Blob(bytes) => Ok(Value::Binary(bytes.to_vec())),
        ValueRef::Null | ValueRef::Real(_) => Err(StoreError::UnknownDataType(format!(
            "setting {} has unsupported storage class {:?}",
            name,
            raw.data_type()
        ))),
    }
}

const RESERVED_SETTINGS: [&str; 3] = [SETTING_MAJOR_VERSION, SETTING_MINOR_VERSION, SETTING_NAME_DELIMITER];

impl Store {
    pub(crate) fn setting_exists_in_tx(&self, name: &str) -> StoreResult<bool> {
        let mut stmt = prepare(&self.conn, Query::SettingExists)?;
        Ok(stmt.exists([name])?)
    }

    fn setting_in_tx(&self, name: &str) -> StoreResult<Value> {
        let mut stmt = prepare(&self.conn, Query::GetSetting)?;
        let value = stmt
            .query_row([name], |row| {
                Ok(setting_from_column(name, row.get_ref(0)?))
            })
            .optional()?;

        match value {
            Some(value) => value,
            None => Err(StoreError::SettingNotFound(name.to_string())),
        }
    }

    pub(crate) fn typed_setting_in_tx(&self, name: &str, expected: ValueType) -> StoreResult<Value> {
        let value = self.setting_in_tx(name)?;
        if value.value_type() != expected {
            return Err(StoreError::DataTypeMismatch(format!(
                "setting {} is {}, expected {}",
                name,
                value.value_type(),
                expected
            )));
        }
        Ok(value)
    }

    /// True if a setting named `name` is stored
    pub fn setting_exists(&self, name: &str) -> StoreResult<bool> {
        let _tx = ReadOnlyTransaction::new(self)?;
        self.setting_exists_in_tx(name)
    }

    /// Type of the setting named `name`
    pub fn setting_type(&self, name: &str) -> StoreResult<ValueType> {
        let _tx = ReadOnlyTransaction::new(self)?;
        Ok(self.setting_in_tx(name)?.value_type())
    }

    pub fn setting_integer(&self, name: &str) -> StoreResult<i64> {
        let _tx = ReadOnlyTransaction::new(self)?;
        match self.typed_setting_in_tx(name, ValueType::Integer)? {
            Value::Integer(v) => Ok(v),
            other => Err(StoreError::DataTypeMismatch(format!("setting {} is {}", name, other.value_type()))),
        }
    }

    pub fn setting_string(&self, name: &str) -> StoreResult<String> {
        let _tx = ReadOnlyTransaction::new(self)?;
        match self.typed_setting_in_tx(name, ValueType::String)? {
            Value::String(v) => Ok(v),
            other => Err(StoreError::DataTypeMismatch(format!("setting {} is {}", name, other.value_type()))),
        }
    }

    pub fn setting_binary(&self, name: &str) -> StoreResult<Vec<u8>> {
        let _tx = ReadOnlyTransaction::new(self)?;
        match self.typed_setting_in_tx(name, ValueType::Binary)? {
            Value::Binary(v) => Ok(v),
            other => Err(StoreError::DataTypeMismatch(format!("setting {} is {}", name, other.value_type()))),
        }
    }

    pub(crate) fn write_setting_in_tx(&self, name: &str, value: &Value) -> StoreResult<()> {
        let changed = prepare(&self.conn, Query::SetSetting)?.execute(rusqlite::params![name, value])?;
        if changed != 1 {
            return Err(StoreError::InvalidInsert(format!("failed to write setting {}", name)));
        }
        Ok(())
    }

    /// Insert or overwrite a setting.
    ///
    /// The version and delimiter settings are owned by the store and fail with
    /// [`StoreError::InvalidConfiguration`]; use [`Store::set_new_delimiter`]
    /// to change the delimiter.
    pub fn set_setting(&self, name: &str, value: &Value) -> StoreResult<()> {
        if RESERVED_SETTINGS.contains(&name) {
            return Err(StoreError::InvalidConfiguration(format!(
                "setting {} is managed by the store",
                name
            )));
        }

        let tx = WritableTransaction::new(self)?;
        self.write_setting_in_tx(name, value)?;
        tx.commit()
    }

    /// True if no stored entry name contains `delimiter`
    pub fn is_valid_new_delimiter(&self, delimiter: char) -> StoreResult<bool> {
        let _tx = ReadOnlyTransaction::new(self)?;
        self.is_valid_new_delimiter_in_tx(delimiter)
    }

    fn is_valid_new_delimiter_in_tx(&self, delimiter: char) -> StoreResult<bool> {
        let mut stmt = prepare(&self.conn, Query::NamesContaining)?;
        let count: i64 = stmt.query_row([delimiter.to_string()], |row| row.get(0))?;
        Ok(count == 0)
    }

    /// Switch the store to a new name delimiter.
    ///
    /// Fails with [`StoreError::InvalidDelimiter`] if any existing entry name
    /// contains `delimiter`, since those names would change meaning.
    pub fn set_new_delimiter(&self, delimiter: char) -> StoreResult<()> {
        let tx = WritableTransaction::new(self)?;
        if !self.is_valid_new_delimiter_in_tx(delimiter)? {
            return Err(StoreError::InvalidDelimiter(format!(
                "{:?} is already used in entry names",
                delimiter
            )));
        }

        self.write_setting_in_tx(SETTING_NAME_DELIMITER, &Value::String(delimiter.to_string()))?;
        tx.commit()?;

        let previous = self.name_delimiter();
        self.set_delimiter(delimiter);
        info!(from = %previous, to = %delimiter, "changed name delimiter");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_settings_written_on_create() {
        let store = Store::memory('.').unwrap();

        assert_eq!(store.setting_type(SETTING_MAJOR_VERSION).unwrap(), ValueType::Integer);
        assert_eq!(store.setting_integer(SETTING_MINOR_VERSION).unwrap(), 0);
        assert_eq!(store.setting_string(SETTING_NAME_DELIMITER).unwrap(), ".");
    }

    #[test]
    fn test_typed_setting_access() {
        let store = Store::memory('.').unwrap();
        store.set_setting("Blob", &Value::Binary(vec![1, 2, 3])).unwrap();
        store.set_setting("Text", &Value::from("x")).unwrap();

        assert!(store.setting_exists("Blob").unwrap());
        assert_eq!(store.setting_binary("Blob").unwrap(), vec![1, 2, 3]);
        assert_eq!(store.setting_type("Text").unwrap(), ValueType::String);

        assert!(matches!(store.setting_integer("Text"), Err(StoreError::DataTypeMismatch(_))));
        assert!(matches!(store.setting_integer("Nope"), Err(StoreError::SettingNotFound(_))));
    }

    #[test]
    fn test_reserved_settings_are_read_only() {
        let store = Store::memory('.').unwrap();

        for name in RESERVED_SETTINGS {
            let err = store.set_setting(name, &Value::Integer(99)).unwrap_err();
            assert!(matches!(err, StoreError::InvalidConfiguration(_)));
        }
        let err = store.set_setting(SETTING_NAME_DELIMITER, &Value::from("/")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfiguration(_)));

        assert_eq!(store.setting_integer(SETTING_MAJOR_VERSION).unwrap(), 1);
        assert_eq!(store.setting_string(SETTING_NAME_DELIMITER).unwrap(), ".");
        assert_eq!(store.name_delimiter(), '.');
    }

    #[test]
    fn test_unsupported_storage_class() {
        let store = Store::memory('.').unwrap();
        store
            .conn
            .execute("INSERT INTO Settings (Name, Value) VALUES ('Ratio', 0.5)", [])
            .unwrap();

        assert!(matches!(store.setting_type("Ratio"), Err(StoreError::UnknownDataType(_))));
    }

    #[test]
    fn test_set_new_delimiter() {
        let store = Store::memory('.').unwrap();
        store.create("a/b.c", 1).unwrap();

        assert!(!store.is_valid_new_delimiter('/').unwrap());
        assert!(matches!(store.set_new_delimiter('/'), Err(StoreError::InvalidDelimiter(_))));
        assert_eq!(store.name_delimiter(), '.');

        store.set_new_delimiter(':').unwrap();
        assert_eq!(store.name_delimiter(), ':');
        assert_eq!(store.get_integer("a/b:c").unwrap(), 1);
        assert_eq!(store.setting_string(SETTING_NAME_DELIMITER).unwrap(), ":");
    }
}
