//! Decoding of BINARY and BINARY2 streams.
//!
//! Both are a sequence of rows, each row a sequence of big-endian fields in
//! column order. BINARY2 prefixes every row with a bitmask (one bit per
//! column, most significant bit first) marking null cells. Variable-length
//! fields (`arraysize` ending in `*`) carry a 4-byte element count.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{TableError, TableResult};
use crate::table::{ColumnMeta, DataType, Value};

const FORMAT: &str = "VOTable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Serialization {
    Binary,
    Binary2,
}

/// How many elements a field holds, as declared by `arraysize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementCount {
    Scalar,
    Fixed(usize),
    Variable,
}

fn element_count(column: &ColumnMeta) -> TableResult<ElementCount> {
    let Some(arraysize) = column.arraysize.as_deref() else {
        return Ok(ElementCount::Scalar);
    };
    if arraysize.ends_with('*') {
        return Ok(ElementCount::Variable);
    }
    arraysize
        .split('x')
        .map(|dim| dim.trim().parse::<usize>())
        .try_fold(1usize, |acc, dim| dim.ok().and_then(|d| acc.checked_mul(d)))
        .map(ElementCount::Fixed)
        .ok_or_else(|| {
            TableError::malformed(
                FORMAT,
                format!("column '{}' has invalid arraysize '{arraysize}'", column.name),
            )
        })
}

pub(crate) fn decode_stream(
    columns: &[ColumnMeta],
    data: &[u8],
    serialization: Serialization,
) -> TableResult<Vec<Vec<Value>>> {
    if columns.is_empty() {
        return Err(TableError::malformed(FORMAT, "binary stream without fields"));
    }

    let counts = columns
        .iter()
        .map(element_count)
        .collect::<TableResult<Vec<_>>>()?;
    let mask_len = columns.len().div_ceil(8);

    let mut cursor = Cursor::new(data);
    let mut rows = Vec::new();

    while (cursor.position() as usize) < data.len() {
        let row_number = rows.len();
        let truncated = |_| {
            TableError::malformed(FORMAT, format!("binary stream truncated in row {row_number}"))
        };

        let mut mask = vec![0u8; mask_len];
        if serialization == Serialization::Binary2 {
            cursor.read_exact(&mut mask).map_err(truncated)?;
        }

        let mut row = Vec::with_capacity(columns.len());
        for (i, (column, count)) in columns.iter().zip(&counts).enumerate() {
            let value = read_field(&mut cursor, column, *count).map_err(truncated)?;
            let masked = mask[i / 8] & (0x80 >> (i % 8)) != 0;
            row.push(if masked { Value::Null } else { value });
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Encoded size of one element of `datatype`.
fn byte_width(datatype: DataType) -> usize {
    match datatype {
        DataType::Boolean | DataType::UnsignedByte | DataType::Char => 1,
        DataType::Short | DataType::UnicodeChar => 2,
        DataType::Int | DataType::Float => 4,
        DataType::Long | DataType::Double => 8,
    }
}

fn read_field(
    cursor: &mut Cursor<&[u8]>,
    column: &ColumnMeta,
    count: ElementCount,
) -> io::Result<Value> {
    let n = match count {
        ElementCount::Scalar => 1,
        ElementCount::Fixed(n) => n,
        ElementCount::Variable => cursor.read_u32::<BigEndian>()? as usize,
    };
    // Element counts come from the document; never allocate past the stream.
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    let fits = n
        .checked_mul(byte_width(column.datatype))
        .is_some_and(|bytes| bytes as u64 <= remaining);
    if !fits {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("field '{}' needs {n} elements past the end of the stream", column.name),
        ));
    }

    match column.datatype {
        DataType::Char => {
            let mut bytes = vec![0u8; n];
            cursor.read_exact(&mut bytes)?;
            // Latin-1: every byte maps to the code point of the same value.
            let text: String = bytes.iter().map(|&b| b as char).collect();
            Ok(text_value(text))
        }
        DataType::UnicodeChar => {
            let mut units = Vec::with_capacity(n);
            for _ in 0..n {
                units.push(cursor.read_u16::<BigEndian>()?);
            }
            Ok(text_value(String::from_utf16_lossy(&units)))
        }
        _ if count == ElementCount::Scalar => read_scalar(cursor, column),
        _ => {
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(read_scalar(cursor, column)?);
            }
            Ok(Value::Array(items))
        }
    }
}

fn text_value(raw: String) -> Value {
    let trimmed = raw.trim_end_matches(['\0', ' ']);
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::Text(trimmed.to_string())
    }
}

fn read_scalar(cursor: &mut Cursor<&[u8]>, column: &ColumnMeta) -> io::Result<Value> {
    let int_value = |raw: i64| {
        let is_sentinel = column
            .null_value
            .as_deref()
            .and_then(|s| s.trim().parse::<i64>().ok())
            == Some(raw);
        if is_sentinel {
            Value::Null
        } else {
            Value::Int(raw)
        }
    };
    let float_value = |raw: f64| {
        if raw.is_nan() {
            Value::Null
        } else {
            Value::Float(raw)
        }
    };

    Ok(match column.datatype {
        DataType::Boolean => match cursor.read_u8()? {
            b'T' | b't' | b'1' => Value::Bool(true),
            b'F' | b'f' | b'0' => Value::Bool(false),
            _ => Value::Null,
        },
        DataType::UnsignedByte => int_value(cursor.read_u8()? as i64),
        DataType::Short => int_value(cursor.read_i16::<BigEndian>()? as i64),
        DataType::Int => int_value(cursor.read_i32::<BigEndian>()? as i64),
        DataType::Long => int_value(cursor.read_i64::<BigEndian>()?),
        DataType::Float => float_value(cursor.read_f32::<BigEndian>()? as f64),
        DataType::Double => float_value(cursor.read_f64::<BigEndian>()?),
        DataType::Char | DataType::UnicodeChar => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "text fields have no scalar encoding",
            ))
        }
    })
}
