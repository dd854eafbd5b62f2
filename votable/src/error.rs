//! Error types for table readers.

use thiserror::Error;

/// Errors produced while reading or manipulating a [`Table`](crate::Table).
#[derive(Error, Debug)]
pub enum TableError {
    /// The document is not a valid instance of its format, or ends early.
    #[error("malformed {format} document: {message}")]
    Malformed {
        /// Short format name, e.g. `"VOTable"`
        format: &'static str,
        /// What was wrong with it
        message: String,
    },

    /// A row did not match the table's column count.
    #[error("row {row} has {found} values, expected {expected}")]
    RowWidth {
        row: usize,
        found: usize,
        expected: usize,
    },

    /// Lookup of a column by name failed.
    #[error("no column named '{0}'")]
    ColumnNotFound(String),

    /// Output format string not recognised.
    #[error("unknown output format '{0}'")]
    UnknownFormat(String),
}

impl TableError {
    pub(crate) fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        TableError::Malformed {
            format,
            message: message.into(),
        }
    }
}

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;
