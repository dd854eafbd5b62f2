//! Table names and VOSI table metadata.

use std::fmt;
use std::str::FromStr;

use crate::error::{TapError, TapResult};
use crate::request::is_identifier;
use crate::xml::{self, Element};

/// Prefix of the per-user schemas TAP+ services create for uploaded tables.
pub const USER_SCHEMA_PREFIX: &str = "user_";

/// A possibly schema-qualified table name (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, table: &str) -> TapResult<Self> {
        let name = Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        };
        name.validate()?;
        Ok(name)
    }

    /// A table in the private schema of `user`.
    pub fn user_table(user: &str, table: &str) -> TapResult<Self> {
        Self::new(Some(&format!("{USER_SCHEMA_PREFIX}{user}")), table)
    }

    fn validate(&self) -> TapResult<()> {
        let parts = self.schema.iter().chain(std::iter::once(&self.table));
        for part in parts {
            if !is_identifier(part) {
                return Err(TapError::InvalidInput(format!(
                    "'{part}' is not a valid table or schema name"
                )));
            }
        }
        Ok(())
    }

    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => self.table.clone(),
        }
    }

    /// Whether the table lives in a user schema rather than a public one.
    pub fn is_private(&self) -> bool {
        self.schema
            .as_deref()
            .is_some_and(|s| s.starts_with(USER_SCHEMA_PREFIX))
    }
}

impl FromStr for TableName {
    type Err = TapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((schema, table)) => TableName::new(Some(schema), table),
            None => TableName::new(None, s.trim()),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// Column of a published table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub datatype: Option<String>,
    pub arraysize: Option<String>,
    pub unit: Option<String>,
    pub ucd: Option<String>,
    pub utype: Option<String>,
    pub description: Option<String>,
    pub indexed: bool,
    pub principal: bool,
    /// Column defined by a standard data model
    pub std: bool,
}

/// Metadata of a published table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub name: String,
    pub schema: Option<String>,
    pub description: Option<String>,
    /// VOSI table type (`table`, `view`, `output`)
    pub table_type: Option<String>,
    pub columns: Vec<ColumnInfo>,
}

impl TableMeta {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether the table lives in a user schema.
    pub fn is_private(&self) -> bool {
        self.schema
            .as_deref()
            .or_else(|| self.name.split_once('.').map(|(schema, _)| schema))
            .is_some_and(|s| s.starts_with(USER_SCHEMA_PREFIX))
    }
}

/// Options for listing tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TablesQuery {
    /// Skip column metadata (TAP+ `only_tables`)
    pub only_names: bool,
    /// Include tables other users share with the session (TAP+ `share_accessible`)
    pub include_shared: bool,
    /// Restrict the listing to these qualified names
    pub tables: Vec<String>,
}

impl TablesQuery {
    pub fn names_only() -> Self {
        Self {
            only_names: true,
            ..Self::default()
        }
    }

    pub fn table(name: &str) -> Self {
        Self {
            tables: vec![name.to_string()],
            ..Self::default()
        }
    }

    pub(crate) fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if self.only_names {
            params.push(("only_tables".to_string(), "true".to_string()));
        }
        if self.include_shared {
            params.push(("share_accessible".to_string(), "true".to_string()));
        }
        if !self.tables.is_empty() {
            params.push(("tables".to_string(), self.tables.join(",")));
        }
        params
    }
}

/// Parse a VOSI `tableset` document.
///
/// Services that return a bare `<table>` for single-table requests are
/// accepted too.
pub fn parse_tableset(bytes: &[u8]) -> TapResult<Vec<TableMeta>> {
    let root = xml::parse(bytes, "VOSI tableset")?;
    match root.name.as_str() {
        "tableset" => Ok(root
            .children_named("schema")
            .flat_map(|schema| {
                let schema_name = schema.child_text("name");
                schema
                    .children_named("table")
                    .map(move |t| table_meta(t, schema_name.clone()))
            })
            .collect()),
        "table" => Ok(vec![table_meta(&root, None)]),
        other => Err(TapError::document(
            "VOSI tableset",
            format!("unexpected root element <{other}>"),
        )),
    }
}

fn table_meta(element: &Element, schema: Option<String>) -> TableMeta {
    let raw_name = element.child_text("name").unwrap_or_default();
    let name = match &schema {
        Some(schema) if !raw_name.contains('.') => format!("{schema}.{raw_name}"),
        _ => raw_name,
    };
    let schema = schema.or_else(|| name.split_once('.').map(|(s, _)| s.to_string()));

    TableMeta {
        name,
        schema,
        description: element.child_text("description"),
        table_type: element.attr("type").map(str::to_string),
        columns: element.children_named("column").map(column_info).collect(),
    }
}

fn column_info(element: &Element) -> ColumnInfo {
    let flags: Vec<String> = element
        .children_named("flag")
        .map(|f| f.text.trim().to_ascii_lowercase())
        .collect();
    let data_type = element.child("dataType");

    ColumnInfo {
        name: element.child_text("name").unwrap_or_default(),
        datatype: data_type
            .map(|d| d.text.trim().to_string())
            .filter(|d| !d.is_empty()),
        arraysize: data_type.and_then(|d| d.attr("arraysize")).map(str::to_string),
        unit: element.child_text("unit"),
        ucd: element.child_text("ucd"),
        utype: element.child_text("utype"),
        description: element.child_text("description"),
        indexed: flags.iter().any(|f| f == "indexed"),
        principal: flags.iter().any(|f| f == "principal"),
        std: element.attr("std") == Some("true") || flags.iter().any(|f| f == "std"),
    }
}
