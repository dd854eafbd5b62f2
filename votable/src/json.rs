//! JSON results.
//!
//! TAP+ services answer `FORMAT=json` with
//!
//! ```text
//! {"metadata": [{"name": "ra", "datatype": "double", "unit": "deg", ...}, ...],
//!  "data": [[10.5, ...], ...]}
//! ```
//!
//! A bare array of objects is accepted too, with columns taken from the keys
//! of the first object. Types are inferred when the metadata has none.

use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::{TableError, TableResult};
use crate::table::{ColumnMeta, DataType, Table, Value};

const FORMAT: &str = "JSON";

#[derive(Debug, Deserialize)]
struct JsonField {
    name: String,
    datatype: Option<String>,
    arraysize: Option<String>,
    unit: Option<String>,
    ucd: Option<String>,
    utype: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonTable {
    metadata: Vec<JsonField>,
    data: Vec<Vec<Json>>,
}

pub fn read(bytes: &[u8]) -> TableResult<Table> {
    let doc: Json =
        serde_json::from_slice(bytes).map_err(|e| TableError::malformed(FORMAT, e.to_string()))?;

    match doc {
        Json::Object(_) => {
            let parsed: JsonTable = serde_json::from_value(doc)
                .map_err(|e| TableError::malformed(FORMAT, e.to_string()))?;
            from_metadata(parsed)
        }
        Json::Array(records) => from_records(records),
        _ => Err(TableError::malformed(
            FORMAT,
            "expected an object with metadata/data or an array of records",
        )),
    }
}

fn from_metadata(parsed: JsonTable) -> TableResult<Table> {
    let columns: Vec<ColumnMeta> = parsed
        .metadata
        .into_iter()
        .enumerate()
        .map(|(i, field)| {
            let datatype = field
                .datatype
                .as_deref()
                .and_then(DataType::from_votable)
                .unwrap_or_else(|| infer_type(parsed.data.iter().filter_map(|row| row.get(i))));
            ColumnMeta {
                name: field.name,
                datatype,
                arraysize: field.arraysize,
                unit: field.unit,
                ucd: field.ucd,
                utype: field.utype,
                description: field.description,
                null_value: None,
            }
        })
        .collect();

    let mut table = Table::new(columns);
    for (row_number, row) in parsed.data.into_iter().enumerate() {
        if row.len() != table.num_columns() {
            return Err(TableError::RowWidth {
                row: row_number,
                found: row.len(),
                expected: table.num_columns(),
            });
        }
        let values = row
            .into_iter()
            .zip(table.columns())
            .map(|(cell, column)| convert(cell, column, row_number))
            .collect::<TableResult<Vec<_>>>()?;
        table.push_row(values)?;
    }
    Ok(table)
}

fn from_records(records: Vec<Json>) -> TableResult<Table> {
    let names: Vec<String> = match records.first() {
        Some(Json::Object(first)) => first.keys().cloned().collect(),
        Some(_) => return Err(TableError::malformed(FORMAT, "records must be objects")),
        None => Vec::new(),
    };

    let columns = names
        .iter()
        .map(|name| {
            let datatype = infer_type(records.iter().filter_map(|r| r.get(name)));
            ColumnMeta::new(name.clone(), datatype)
        })
        .collect();

    let mut table = Table::new(columns);
    for (row_number, record) in records.into_iter().enumerate() {
        let Json::Object(mut object) = record else {
            return Err(TableError::malformed(FORMAT, "records must be objects"));
        };
        let values = names
            .iter()
            .zip(table.columns())
            .map(|(name, column)| {
                convert(object.remove(name).unwrap_or(Json::Null), column, row_number)
            })
            .collect::<TableResult<Vec<_>>>()?;
        table.push_row(values)?;
    }
    Ok(table)
}

fn infer_type<'a>(cells: impl Iterator<Item = &'a Json>) -> DataType {
    let mut datatype: Option<DataType> = None;
    for cell in cells {
        let this = match cell {
            Json::Null => continue,
            Json::Bool(_) => DataType::Boolean,
            Json::Number(n) if n.is_i64() || n.is_u64() => DataType::Long,
            Json::Number(_) => DataType::Double,
            _ => return DataType::Char,
        };
        datatype = Some(match (datatype, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Long), DataType::Double) | (Some(DataType::Double), DataType::Long) => {
                DataType::Double
            }
            _ => return DataType::Char,
        });
    }
    datatype.unwrap_or(DataType::Char)
}

fn convert(cell: Json, column: &ColumnMeta, row_number: usize) -> TableResult<Value> {
    Ok(match cell {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if column.datatype.is_floating() {
                n.as_f64().map(Value::Float).unwrap_or(Value::Null)
            } else if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                n.as_f64().map(Value::Float).unwrap_or(Value::Null)
            }
        }
        Json::String(s) if column.datatype.is_text() => {
            if s.is_empty() {
                Value::Null
            } else {
                Value::Text(s)
            }
        }
        // Numbers encoded as strings ("NaN", "1e400") are parsed by type.
        Json::String(s) => Value::parse_typed(&s, column).map_err(|e| {
            TableError::malformed(
                FORMAT,
                format!("row {row_number}, column '{}': {e}", column.name),
            )
        })?,
        Json::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| convert(item, column, row_number))
                .collect::<TableResult<Vec<_>>>()?,
        ),
        Json::Object(_) => Value::Text(cell.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_layout() {
        let doc = br#"{
            "metadata": [
                {"name": "source_id", "datatype": "long", "arraysize": null, "unit": null, "ucd": "meta.id"},
                {"name": "ra", "datatype": "double", "unit": "deg"},
                {"name": "designation", "datatype": "char", "arraysize": "*"}
            ],
            "data": [
                [4295806720, 44.99, "Gaia DR3 4295806720"],
                [34361129088, null, "Gaia DR3 34361129088"]
            ]
        }"#;
        let table = read(doc).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.column("ra").unwrap().unit.as_deref(), Some("deg"));
        assert_eq!(table.value(0, "source_id"), Some(&Value::Int(4295806720)));
        assert!(table.value(1, "ra").unwrap().is_null());
    }

    #[test]
    fn test_missing_datatype_is_inferred() {
        let doc = br#"{"metadata": [{"name": "x"}, {"name": "y"}], "data": [[1, 2.5], [2, 3]]}"#;
        let table = read(doc).unwrap();
        assert_eq!(table.column("x").unwrap().datatype, DataType::Long);
        assert_eq!(table.column("y").unwrap().datatype, DataType::Double);
        assert_eq!(table.value(1, "y"), Some(&Value::Float(3.0)));
    }

    #[test]
    fn test_array_of_records() {
        let doc = br#"[{"name": "Vega", "vmag": 0.03}, {"name": "Deneb", "vmag": null}]"#;
        let table = read(doc).unwrap();
        assert_eq!(table.num_columns(), 2);
        assert_eq!(table.value(0, "name"), Some(&Value::Text("Vega".into())));
        assert!(table.value(1, "vmag").unwrap().is_null());
    }

    #[test]
    fn test_row_width_mismatch_is_rejected() {
        let doc = br#"{"metadata": [{"name": "a"}, {"name": "b"}], "data": [[1]]}"#;
        assert!(matches!(read(doc), Err(TableError::RowWidth { .. })));
    }

    #[test]
    fn test_truncated_json_is_rejected() {
        let doc = br#"{"metadata": [{"name": "a"}], "data": [[1], [2"#;
        assert!(matches!(read(doc), Err(TableError::Malformed { .. })));
    }
}
