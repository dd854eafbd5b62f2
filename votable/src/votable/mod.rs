//! IVOA VOTable reading and writing.
//!
//! Only the first `TABLE` of a document is materialised, which is all a TAP
//! result ever contains. `INFO` elements are collected from anywhere in the
//! document so that `QUERY_STATUS` survives, including the error documents
//! services return in place of a table.

mod binary;
mod reader;
mod writer;

pub use reader::read;
pub use writer::write;
