//! Value and revision types shared by the store API

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{StoreError, StoreResult};

/// Row id of an entry; `ROOT_ID` is reserved for the root
pub type EntryId = i64;

/// Id of the root entry
pub const ROOT_ID: EntryId = 0;

/// Type tag stored in the `Type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Integer = 1,
    String = 2,
    Binary = 3,
}

impl ValueType {
    /// Column representation
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Decode the `Type` column of entry `id`
    pub fn from_column(id: EntryId, raw: i64) -> StoreResult<Self> {
        match raw {
            1 => Ok(ValueType::Integer),
            2 => Ok(ValueType::String),
            3 => Ok(ValueType::Binary),
            other => Err(StoreError::UnknownEntryType(format!(
                "entry {} has unknown value type {}",
                id, other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Integer => "Integer",
            ValueType::String => "String",
            ValueType::Binary => "Binary",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed entry value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    String(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::String(_) => ValueType::String,
            Value::Binary(_) => ValueType::Binary,
        }
    }
}

impl Value {
    /// Column form of an entry value; an empty binary is stored as NULL
    pub(crate) fn to_entry_column(&self) -> ToSqlOutput<'_> {
        match self {
            Value::Binary(bytes) if bytes.is_empty() => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            other => ToSqlOutput::Borrowed(other.as_value_ref()),
        }
    }

    /// Decode the `Value` column of entry `id` tagged with `ty`
    pub(crate) fn from_entry_column(id: EntryId, ty: ValueType, raw: ValueRef<'_>) -> StoreResult<Self> {
        match (ty, raw) {
            (ValueType::Integer, ValueRef::Integer(v)) => Ok(Value::Integer(v)),
            (ValueType::String, ValueRef::Text(bytes)) => String::from_utf8(bytes.to_vec())
                .map(Value::String)
                .map_err(|_| StoreError::DataTypeMismatch(format!("entry {} holds invalid UTF-8", id))),
            (ValueType::Binary, ValueRef::Blob(bytes)) => Ok(Value::Binary(bytes.to_vec())),
            (ValueType::Binary, ValueRef::Null) => Ok(Value::Binary(Vec::new())),
            (ty, raw) => Err(StoreError::DataTypeMismatch(format!(
                "entry {} is tagged {} but holds {:?}",
                id,
                ty,
                raw.data_type()
            ))),
        }
    }

    fn as_value_ref(&self) -> ValueRef<'_> {
        match self {
            Value::Integer(v) => ValueRef::Integer(*v),
            Value::String(s) => ValueRef::Text(s.as_bytes()),
            Value::Binary(b) => ValueRef::Blob(b),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(self.as_value_ref()))
    }
}

/// Value given to intermediate entries created implicitly along a path
impl Default for Value {
    fn default() -> Self {
        Value::Integer(0)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Binary(v.to_vec())
    }
}

/// Change-detection token for an entry.
///
/// Two reads of the same name are "unchanged" iff the returned revisions are
/// equal. A change can go unnoticed only if the counter wrapped around exactly,
/// or the entry was deleted and re-created with the same id and, by chance,
/// the same random starting revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub id: EntryId,
    pub revision: i64,
}

impl Revision {
    pub fn new(id: EntryId, revision: i64) -> Self {
        Self { id, revision }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.revision)
    }
}
