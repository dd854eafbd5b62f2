//! Output formats a TAP service can be asked for, and reader dispatch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TableError, TableResult};
use crate::table::Table;

/// Result serialization requested through the TAP `FORMAT` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// VOTable, binary serialization allowed
    #[default]
    Votable,
    /// VOTable forced to TABLEDATA
    VotablePlain,
    Fits,
    Csv,
    Json,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Votable,
        OutputFormat::VotablePlain,
        OutputFormat::Fits,
        OutputFormat::Csv,
        OutputFormat::Json,
    ];

    /// Value sent as the `FORMAT` request parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Votable => "votable",
            OutputFormat::VotablePlain => "votable_plain",
            OutputFormat::Fits => "fits",
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            OutputFormat::Votable | OutputFormat::VotablePlain => "vot",
            OutputFormat::Fits => "fits",
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| TableError::UnknownFormat(s.to_string()))
    }
}

/// Parse a downloaded result document.
pub fn read_table(format: OutputFormat, bytes: &[u8]) -> TableResult<Table> {
    match format {
        OutputFormat::Votable | OutputFormat::VotablePlain => crate::votable::read(bytes),
        OutputFormat::Fits => crate::fits::read(bytes),
        OutputFormat::Csv => crate::csv::read(bytes),
        OutputFormat::Json => crate::json::read(bytes),
    }
}
