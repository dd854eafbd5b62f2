//! In-memory result table.
//!
//! A [`Table`] is row-major: an ordered list of [`ColumnMeta`] and a list of
//! rows, each holding exactly one [`Value`] per column. The table is owned by
//! whoever parsed it; nothing here talks to the network.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TableError, TableResult};

/// VOTable primitive datatypes.
///
/// CSV and JSON readers map inferred types onto the same set so that every
/// table can be written back as a VOTable for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Boolean,
    UnsignedByte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    UnicodeChar,
}

impl DataType {
    /// Parse a VOTable `datatype` attribute value.
    pub fn from_votable(name: &str) -> Option<Self> {
        match name {
            "boolean" => Some(DataType::Boolean),
            "unsignedByte" => Some(DataType::UnsignedByte),
            "short" => Some(DataType::Short),
            "int" => Some(DataType::Int),
            "long" => Some(DataType::Long),
            "float" => Some(DataType::Float),
            "double" => Some(DataType::Double),
            "char" => Some(DataType::Char),
            "unicodeChar" => Some(DataType::UnicodeChar),
            _ => None,
        }
    }

    /// The VOTable `datatype` attribute value.
    pub fn as_votable(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::UnsignedByte => "unsignedByte",
            DataType::Short => "short",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Char => "char",
            DataType::UnicodeChar => "unicodeChar",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::UnsignedByte | DataType::Short | DataType::Int | DataType::Long
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, DataType::Char | DataType::UnicodeChar)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_votable())
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Masked or missing
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Fixed or variable length array cell
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as `f64`; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a text cell according to a column's declared type.
    ///
    /// Empty text, the column's null sentinel and `NaN` all become
    /// [`Value::Null`]. Non-text columns with an `arraysize` are split on
    /// whitespace into a [`Value::Array`].
    pub fn parse_typed(text: &str, column: &ColumnMeta) -> Result<Value, String> {
        let text = text.trim();
        if text.is_empty() || column.null_value.as_deref() == Some(text) {
            return Ok(Value::Null);
        }

        if column.datatype.is_text() {
            return Ok(Value::Text(text.to_string()));
        }

        if column.is_array() {
            let items = text
                .split_whitespace()
                .map(|item| parse_scalar(item, column.datatype))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Array(items));
        }

        parse_scalar(text, column.datatype)
    }
}

fn parse_scalar(text: &str, datatype: DataType) -> Result<Value, String> {
    match datatype {
        DataType::Boolean => match text {
            "T" | "t" | "true" | "TRUE" | "True" | "1" => Ok(Value::Bool(true)),
            "F" | "f" | "false" | "FALSE" | "False" | "0" => Ok(Value::Bool(false)),
            "?" => Ok(Value::Null),
            other => Err(format!("invalid boolean '{other}'")),
        },
        DataType::UnsignedByte | DataType::Short | DataType::Int | DataType::Long => {
            parse_integer(text)
                .map(Value::Int)
                .ok_or_else(|| format!("invalid {datatype} '{text}'"))
        }
        DataType::Float | DataType::Double => {
            let x: f64 = text
                .parse()
                .map_err(|_| format!("invalid {datatype} '{text}'"))?;
            Ok(if x.is_nan() {
                Value::Null
            } else {
                Value::Float(x)
            })
        }
        DataType::Char | DataType::UnicodeChar => Ok(Value::Text(text.to_string())),
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    text.parse().ok()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("--"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Column description carried alongside the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub datatype: DataType,
    /// VOTable `arraysize`, e.g. `"*"`, `"12"`, `"3x4"`
    pub arraysize: Option<String>,
    pub unit: Option<String>,
    pub ucd: Option<String>,
    pub utype: Option<String>,
    pub description: Option<String>,
    /// Sentinel text or integer that marks a masked value
    pub null_value: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            arraysize: None,
            unit: None,
            ucd: None,
            utype: None,
            description: None,
            null_value: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_ucd(mut self, ucd: impl Into<String>) -> Self {
        self.ucd = Some(ucd.into());
        self
    }

    pub fn with_utype(mut self, utype: impl Into<String>) -> Self {
        self.utype = Some(utype.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_arraysize(mut self, arraysize: impl Into<String>) -> Self {
        self.arraysize = Some(arraysize.into());
        self
    }

    /// Whether cells of this column hold more than one element.
    ///
    /// Text columns are never arrays: their `arraysize` is the string length.
    pub fn is_array(&self) -> bool {
        if self.datatype.is_text() {
            return false;
        }
        match self.arraysize.as_deref() {
            None | Some("1") => false,
            Some(_) => true,
        }
    }
}

/// A VOTable `INFO` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub name: String,
    pub value: String,
    pub content: Option<String>,
}

/// Outcome reported by a service through the `QUERY_STATUS` info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Ok,
    /// The service stopped writing rows at its limit
    Overflow,
    Error(String),
}

/// Result table with typed columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    name: Option<String>,
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Value>>,
    infos: Vec<Info>,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self {
            name: None,
            columns,
            rows: Vec::new(),
            infos: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn infos(&self) -> &[Info] {
        &self.infos
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row. The row must have one value per column.
    pub fn push_row(&mut self, row: Vec<Value>) -> TableResult<()> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                found: row.len(),
                expected: self.columns.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn add_info(&mut self, info: Info) {
        self.infos.push(info);
    }

    /// Index of a column, matching exactly first and then ignoring ASCII case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    pub fn column(&self, name: &str) -> TableResult<&ColumnMeta> {
        self.column_index(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }

    /// All values of one column, top to bottom.
    pub fn column_values(&self, name: &str) -> TableResult<impl Iterator<Item = &Value> + '_> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Single cell by row number and column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Keep at most `max_rows` rows. Returns `true` if rows were dropped.
    pub fn truncate(&mut self, max_rows: usize) -> bool {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            true
        } else {
            false
        }
    }

    /// Copy of the first `n` rows, for display.
    pub fn head(&self, n: usize) -> Table {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
            infos: self.infos.clone(),
        }
    }

    /// Status reported in the `QUERY_STATUS` info, `Ok` when absent.
    pub fn query_status(&self) -> QueryStatus {
        // Services may emit several; ERROR wins over OVERFLOW.
        let mut status = QueryStatus::Ok;
        for info in self.infos.iter().filter(|i| i.name == "QUERY_STATUS") {
            match info.value.to_ascii_uppercase().as_str() {
                "ERROR" => {
                    let message = info
                        .content
                        .clone()
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| "query failed".to_string());
                    return QueryStatus::Error(message);
                }
                "OVERFLOW" => status = QueryStatus::Overflow,
                _ => {}
            }
        }
        status
    }

    /// Serialize as a VOTable with TABLEDATA encoding.
    pub fn to_votable(&self) -> String {
        crate::votable::write(self)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        let units: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.unit.clone().unwrap_or_default())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|row| row[i].chars().count())
                    .chain([c.name.chars().count(), units[i].chars().count()])
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let write_line = |f: &mut fmt::Formatter<'_>, items: &[String]| -> fmt::Result {
            let line: Vec<String> = items
                .iter()
                .zip(&widths)
                .map(|(item, w)| format!("{item:>w$}"))
                .collect();
            writeln!(f, "{}", line.join(" "))
        };

        let names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        write_line(f, &names)?;
        if units.iter().any(|u| !u.is_empty()) {
            write_line(f, &units)?;
        }
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_line(f, &rule)?;
        for row in &cells {
            write_line(f, row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::new(vec![
            ColumnMeta::new("source_id", DataType::Long),
            ColumnMeta::new("ra", DataType::Double).with_unit("deg"),
            ColumnMeta::new("name", DataType::Char).with_arraysize("*"),
        ]);
        table
            .push_row(vec![
                Value::Int(1),
                Value::Float(10.5),
                Value::Text("a".into()),
            ])
            .unwrap();
        table
            .push_row(vec![Value::Int(2), Value::Null, Value::Text("b".into())])
            .unwrap();
        table
    }

    #[test]
    fn test_push_row_rejects_wrong_width() {
        let mut table = sample();
        let err = table.push_row(vec![Value::Int(3)]).unwrap_err();
        assert!(matches!(
            err,
            TableError::RowWidth {
                row: 2,
                found: 1,
                expected: 3
            }
        ));
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn test_column_lookup_is_case_insensitive_fallback() {
        let table = sample();
        assert_eq!(table.column_index("RA"), Some(1));
        assert_eq!(table.column("ra").unwrap().unit.as_deref(), Some("deg"));
        assert!(matches!(
            table.column("dec"),
            Err(TableError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_column_values_and_nulls() {
        let table = sample();
        let ras: Vec<Option<f64>> = table
            .column_values("ra")
            .unwrap()
            .map(|v| v.as_f64())
            .collect();
        assert_eq!(ras, vec![Some(10.5), None]);
        assert!(table.value(1, "ra").unwrap().is_null());
    }

    #[test]
    fn test_truncate_reports_dropped_rows() {
        let mut table = sample();
        assert!(!table.truncate(5));
        assert!(table.truncate(1));
        assert_eq!(table.num_rows(), 1);
    }

    #[test]
    fn test_query_status_error_wins() {
        let mut table = sample();
        assert_eq!(table.query_status(), QueryStatus::Ok);
        table.add_info(Info {
            name: "QUERY_STATUS".into(),
            value: "OVERFLOW".into(),
            content: None,
        });
        assert_eq!(table.query_status(), QueryStatus::Overflow);
        table.add_info(Info {
            name: "QUERY_STATUS".into(),
            value: "ERROR".into(),
            content: Some("syntax error near FROM".into()),
        });
        assert_eq!(
            table.query_status(),
            QueryStatus::Error("syntax error near FROM".into())
        );
    }

    #[test]
    fn test_parse_typed_handles_sentinels_and_arrays() {
        let mut col = ColumnMeta::new("flag", DataType::Int);
        col.null_value = Some("-999".into());
        assert_eq!(Value::parse_typed("-999", &col).unwrap(), Value::Null);
        assert_eq!(Value::parse_typed(" 42 ", &col).unwrap(), Value::Int(42));
        assert!(Value::parse_typed("abc", &col).is_err());

        let arr = ColumnMeta::new("pos", DataType::Double).with_arraysize("2");
        assert_eq!(
            Value::parse_typed("1.5 2.5", &arr).unwrap(),
            Value::Array(vec![Value::Float(1.5), Value::Float(2.5)])
        );

        let nan = ColumnMeta::new("mag", DataType::Float);
        assert_eq!(Value::parse_typed("NaN", &nan).unwrap(), Value::Null);
    }

    #[test]
    fn test_display_includes_units_row() {
        let text = sample().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("source_id"));
        assert!(lines[1].contains("deg"));
        assert!(lines[4].contains("--"));
    }
}
