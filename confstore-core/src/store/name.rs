//! Entry names and paths
//!
//! An entry is addressed by a name such as `server.http.port`: the segments of
//! its path joined with the store-wide delimiter. Names are validated before
//! they ever reach the database, so a stored name never contains the delimiter.

use super::errors::{StoreError, StoreResult};

/// Delimiter used when a store is created without an explicit one
pub const DEFAULT_NAME_DELIMITER: char = '.';

/// Ordered name segments from the root down to an entry (empty = root)
pub type EntryPath = Vec<String>;

/// Check whether `name` is a well-formed entry name for `delimiter`.
///
/// A valid name is non-empty, does not start or end with the delimiter and
/// never contains two consecutive delimiters. No Unicode normalization is
/// applied: names compare byte-wise.
pub fn is_valid_name(name: &str, delimiter: char) -> bool {
    if name.is_empty() || name.starts_with(delimiter) || name.ends_with(delimiter) {
        return false;
    }

    let mut previous_was_delimiter = false;
    for c in name.chars() {
        let is_delimiter = c == delimiter;
        if is_delimiter && previous_was_delimiter {
            return false;
        }
        previous_was_delimiter = is_delimiter;
    }

    true
}

/// Validate `name` and split it into its path segments.
pub fn split_name(name: &str, delimiter: char) -> StoreResult<EntryPath> {
    if !is_valid_name(name, delimiter) {
        return Err(StoreError::InvalidName(name.to_string()));
    }

    Ok(name.split(delimiter).map(str::to_string).collect())
}

/// Join path segments back into a name.
pub fn join_path<S: AsRef<str>>(path: &[S], delimiter: char) -> String {
    let mut name = String::new();

    for segment in path {
        if !name.is_empty() {
            name.push(delimiter);
        }
        name.push_str(segment.as_ref());
    }

    name
}

/// True if `segment` may be stored as the name of a single (non-root) entry.
pub(crate) fn is_valid_segment(segment: &str, delimiter: char) -> bool {
    !segment.is_empty() && !segment.contains(delimiter)
}
