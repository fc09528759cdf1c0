//! Error types for the configuration store
//!
//! Every failure a store operation can report is one variant of [`StoreError`].
//! Variants are grouped into four categories (see [`ErrorCategory`]): caller
//! misuse, backing-store failures, structural corruption and configuration
//! problems detected while opening a store.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Broad classification of a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caused by the caller (bad name, missing entry, wrong accessor, ...)
    Usage,
    /// Reported by SQLite or by a query that did not behave as expected
    Backend,
    /// The stored tree violates a structural invariant
    InconsistentData,
    /// The database file cannot be used with this store configuration
    Configuration,
}

/// Errors that can occur in the configuration store
#[derive(Debug, Error)]
pub enum StoreError {
    // ===== Usage errors =====
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Setting not found: {0}")]
    SettingNotFound(String),

    #[error("Name already exists: {0}")]
    NameAlreadyExists(String),

    #[error("Entry has child entries: {0}")]
    HasChildEntry(String),

    #[error("Wrong value type: {0}")]
    WrongValueType(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    // ===== Backing store errors =====
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid insert: {0}")]
    InvalidInsert(String),

    #[error("Invalid delimiter: {0}")]
    InvalidDelimiter(String),

    /// Raw SQLite failure (busy timeout, I/O, constraint violation, ...)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // ===== Inconsistent data =====
    #[error("Root entry missing: {0}")]
    RootEntryMissing(String),

    #[error("Invalid root entry: {0}")]
    InvalidRootEntry(String),

    #[error("Invalid entry name found: {0}")]
    InvalidEntryNameFound(String),

    #[error("Entry id not unique: {0}")]
    EntryIdNotUnique(String),

    #[error("Abandoned entry: {0}")]
    AbandonedEntry(String),

    #[error("Invalid entry linking: {0}")]
    InvalidEntryLinking(String),

    #[error("Unknown entry type: {0}")]
    UnknownEntryType(String),

    // ===== Configuration errors =====
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    #[error("Data type mismatch: {0}")]
    DataTypeMismatch(String),

    #[error("Version not supported: {0}")]
    VersionNotSupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid delimiter setting: {0}")]
    InvalidDelimiterSetting(String),
}

impl StoreError {
    /// Category this error belongs to
    pub fn category(&self) -> ErrorCategory {
        use StoreError::*;

        match self {
            InvalidName(_) | EntryNotFound(_) | SettingNotFound(_) | NameAlreadyExists(_)
            | HasChildEntry(_) | WrongValueType(_) | InvalidTransaction(_) => ErrorCategory::Usage,

            InvalidQuery(_) | InvalidInsert(_) | InvalidDelimiter(_) | Database(_) => {
                ErrorCategory::Backend
            }

            RootEntryMissing(_) | InvalidRootEntry(_) | InvalidEntryNameFound(_)
            | EntryIdNotUnique(_) | AbandonedEntry(_) | InvalidEntryLinking(_)
            | UnknownEntryType(_) => ErrorCategory::InconsistentData,

            UnknownDataType(_) | DataTypeMismatch(_) | VersionNotSupported(_)
            | InvalidConfiguration(_) | InvalidDelimiterSetting(_) => ErrorCategory::Configuration,
        }
    }

    /// True for the "not found" family (entries and settings)
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::EntryNotFound(_) | StoreError::SettingNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::EntryNotFound("a.b".to_string());
        assert_eq!(format!("{}", err), "Entry not found: a.b");

        let err = StoreError::InvalidName(String::new());
        assert_eq!(format!("{}", err), "Invalid name: ");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(StoreError::InvalidName("x".into()).category(), ErrorCategory::Usage);
        assert_eq!(
            StoreError::InvalidTransaction("x".into()).category(),
            ErrorCategory::Usage
        );
        assert_eq!(StoreError::InvalidInsert("x".into()).category(), ErrorCategory::Backend);
        assert_eq!(
            StoreError::Database(rusqlite::Error::InvalidQuery).category(),
            ErrorCategory::Backend
        );
        assert_eq!(
            StoreError::AbandonedEntry("x".into()).category(),
            ErrorCategory::InconsistentData
        );
        assert_eq!(
            StoreError::InvalidDelimiterSetting("x".into()).category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_not_found_family() {
        assert!(StoreError::EntryNotFound("a".into()).is_not_found());
        assert!(StoreError::SettingNotFound("a".into()).is_not_found());
        assert!(!StoreError::HasChildEntry("a".into()).is_not_found());
    }

    #[test]
    fn test_from_rusqlite() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
