//! Traits for source file readers.

use std::path::Path;

use super::table::RawTable;
use crate::error::ReadError;

/// Trait for readers that decode one file into a [`RawTable`].
///
/// Reading is synchronous; callers on the async runtime should run it on a
/// blocking thread.
pub trait TabularReader: Send + Sync {
    /// Decode the file at `path`.
    ///
    /// A file with a header but no data rows yields an empty table, not an error.
    fn read(&self, path: &Path) -> Result<RawTable, ReadError>;
}
