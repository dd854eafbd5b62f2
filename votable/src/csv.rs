//! CSV results.
//!
//! CSV carries no type information, so each column is typed by what all of
//! its non-empty cells parse as: integer, then floating point, then boolean,
//! falling back to text. Empty cells are nulls.

use crate::error::{TableError, TableResult};
use crate::table::{ColumnMeta, DataType, Table, Value};

const FORMAT: &str = "CSV";

pub fn read(bytes: &[u8]) -> TableResult<Table> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(::csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| TableError::malformed(FORMAT, e.to_string()))?
        .clone();
    if headers.is_empty() || headers.iter().all(str::is_empty) {
        return Err(TableError::malformed(FORMAT, "missing header row"));
    }

    let mut raw: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        // Unequal record lengths (e.g. a cut-off last line) surface here.
        let record = record.map_err(|e| TableError::malformed(FORMAT, e.to_string()))?;
        raw.push(record.iter().map(str::to_string).collect());
    }

    let datatypes: Vec<DataType> = (0..headers.len())
        .map(|i| infer_type(raw.iter().map(|row| row[i].as_str())))
        .collect();

    let columns = headers
        .iter()
        .zip(&datatypes)
        .map(|(name, datatype)| {
            let column = ColumnMeta::new(name, *datatype);
            if datatype.is_text() {
                column.with_arraysize("*")
            } else {
                column
            }
        })
        .collect::<Vec<_>>();

    let mut table = Table::new(columns);
    for row in raw {
        let values = row
            .iter()
            .zip(&datatypes)
            .map(|(cell, datatype)| convert(cell, *datatype))
            .collect();
        table.push_row(values)?;
    }
    Ok(table)
}

/// Narrowest type every non-empty cell parses as.
pub(crate) fn infer_type<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> DataType {
    let mut non_empty = cells.filter(|c| !c.is_empty()).peekable();
    if non_empty.peek().is_none() {
        return DataType::Char;
    }
    let all = |pred: fn(&str) -> bool| non_empty.clone().all(pred);

    if all(|c| c.parse::<i64>().is_ok()) {
        DataType::Long
    } else if all(|c| c.parse::<f64>().is_ok()) {
        DataType::Double
    } else if all(|c| parse_bool(c).is_some()) {
        DataType::Boolean
    } else {
        DataType::Char
    }
}

fn parse_bool(cell: &str) -> Option<bool> {
    if cell.eq_ignore_ascii_case("true") {
        Some(true)
    } else if cell.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn convert(cell: &str, datatype: DataType) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match datatype {
        DataType::Long => cell.parse().map(Value::Int).unwrap_or(Value::Null),
        DataType::Double => match cell.parse::<f64>() {
            Ok(x) if !x.is_nan() => Value::Float(x),
            _ => Value::Null,
        },
        DataType::Boolean => parse_bool(cell).map(Value::Bool).unwrap_or(Value::Null),
        _ => Value::Text(cell.to_string()),
    }
}
