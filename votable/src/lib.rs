//! Tabular results returned by Virtual Observatory services.
//!
//! Archive query services answer in one of a handful of tabular formats.
//! This crate turns each of them into the same in-memory [`Table`]:
//!
//! - [`votable`] - IVOA VOTable XML with TABLEDATA, BINARY or BINARY2 serialization
//! - [`fits`] - the first BINTABLE extension of a FITS file
//! - [`csv`] - comma separated text with lenient type inference
//! - [`json`] - the `{"metadata": [...], "data": [[...]]}` layout used by TAP+ servers
//!
//! Column units and masked values survive every reader: a masked cell is
//! always [`Value::Null`]. A malformed or truncated document is rejected as a
//! whole with [`TableError::Malformed`], never returned as a partial table.
//!
//! # Example
//!
//! ```
//! use votable::{read_table, OutputFormat};
//!
//! let csv = b"source_id,ra,dec\n1,10.5,-3.25\n2,11.0,\n";
//! let table = read_table(OutputFormat::Csv, csv)?;
//! assert_eq!(table.num_rows(), 2);
//! assert!(table.value(1, "dec").unwrap().is_null());
//! # Ok::<(), votable::TableError>(())
//! ```

pub mod csv;
pub mod error;
pub mod fits;
pub mod format;
pub mod json;
pub mod table;
pub mod votable;

pub use error::{TableError, TableResult};
pub use format::{read_table, OutputFormat};
pub use table::{ColumnMeta, DataType, Info, QueryStatus, Table, Value};
