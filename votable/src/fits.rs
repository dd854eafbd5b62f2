//! FITS binary table results.
//!
//! Reads the first `BINTABLE` extension of a FITS file. Supported `TFORM`
//! codes are `L`, `B`, `I`, `J`, `K`, `E`, `D` and `A`, with repeat counts;
//! variable-length (`P`/`Q`), bit and complex columns are rejected.
//!
//! Integer nulls are declared per column with `TNULLn`; floating point nulls
//! are NaN. `TSCALn`/`TZEROn` are applied to integer columns.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{TableError, TableResult};
use crate::table::{ColumnMeta, DataType, Table, Value};

const FORMAT: &str = "FITS";

/// FITS files are made of 2880-byte blocks.
pub const BLOCK_SIZE: usize = 2880;

/// Header cards are 80 ASCII characters.
pub const CARD_SIZE: usize = 80;

/// Largest `TFIELDS` the FITS standard allows.
const MAX_FIELDS: usize = 999;

struct Header {
    cards: Vec<(String, String)>,
}

impl Header {
    fn get(&self, key: &str) -> Option<&str> {
        self.cards
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn get_int(&self, key: &str) -> TableResult<Option<i64>> {
        self.get(key)
            .map(|v| {
                v.parse::<i64>().map_err(|_| {
                    TableError::malformed(FORMAT, format!("{key} is not an integer: '{v}'"))
                })
            })
            .transpose()
    }

    fn require_int(&self, key: &str) -> TableResult<i64> {
        self.get_int(key)?
            .ok_or_else(|| TableError::malformed(FORMAT, format!("missing {key} keyword")))
    }

    fn get_float(&self, key: &str) -> TableResult<Option<f64>> {
        self.get(key)
            .map(|v| {
                // Fortran-style exponents are legal in FITS headers.
                v.replace(['D', 'd'], "E").parse::<f64>().map_err(|_| {
                    TableError::malformed(FORMAT, format!("{key} is not a number: '{v}'"))
                })
            })
            .transpose()
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    }
}

/// Parse a header starting at `offset`; returns it with the offset of its data.
fn parse_header(data: &[u8], offset: usize) -> TableResult<(Header, usize)> {
    let mut cards = Vec::new();
    let mut pos = offset;

    loop {
        let block = data
            .get(pos..pos + BLOCK_SIZE)
            .ok_or_else(|| TableError::malformed(FORMAT, "header truncated before END"))?;

        for raw in block.chunks(CARD_SIZE) {
            if !raw.is_ascii() {
                return Err(TableError::malformed(FORMAT, "non-ASCII header card"));
            }
            let card = std::str::from_utf8(raw)
                .map_err(|_| TableError::malformed(FORMAT, "non-ASCII header card"))?;
            let key = card[..8].trim_end();
            if key == "END" {
                return Ok((Header { cards }, pos + BLOCK_SIZE));
            }
            if &card[8..10] == "= " {
                cards.push((key.to_string(), parse_card_value(&card[10..])));
            }
        }
        pos += BLOCK_SIZE;
    }
}

fn parse_card_value(field: &str) -> String {
    let field = field.trim_start();
    if let Some(rest) = field.strip_prefix('\'') {
        // Quoted string; '' is an escaped quote and trailing blanks are padding.
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return out.trim_end().to_string();
    }
    field
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn data_size(header: &Header) -> TableResult<usize> {
    let bitpix = header.require_int("BITPIX")?;
    let naxis = header.require_int("NAXIS")?;
    if naxis == 0 {
        return Ok(0);
    }
    let too_large = || TableError::malformed(FORMAT, "data size out of range");
    let mut elements: i64 = 1;
    for i in 1..=naxis {
        elements = elements
            .checked_mul(header.require_int(&format!("NAXIS{i}"))?)
            .ok_or_else(too_large)?;
    }
    let pcount = header.get_int("PCOUNT")?.unwrap_or(0);
    let gcount = header.get_int("GCOUNT")?.unwrap_or(1);
    let size = pcount
        .checked_add(elements)
        .and_then(|n| n.checked_mul(gcount))
        .and_then(|n| n.checked_mul(bitpix.abs() / 8))
        .ok_or_else(too_large)?;
    usize::try_from(size).map_err(|_| TableError::malformed(FORMAT, "negative data size"))
}

/// Read the first BINTABLE extension.
pub fn read(bytes: &[u8]) -> TableResult<Table> {
    if !bytes.starts_with(b"SIMPLE  =") {
        return Err(TableError::malformed(FORMAT, "missing SIMPLE keyword"));
    }

    let mut offset = 0;
    while offset < bytes.len() {
        let (header, data_start) = parse_header(bytes, offset)?;
        if header.get_str("XTENSION").as_deref() == Some("BINTABLE") {
            return read_bintable(&header, &bytes[data_start..]);
        }
        let size = data_size(&header)?;
        offset = size
            .div_ceil(BLOCK_SIZE)
            .checked_mul(BLOCK_SIZE)
            .and_then(|padded| padded.checked_add(data_start))
            .ok_or_else(|| TableError::malformed(FORMAT, "data size out of range"))?;
    }
    Err(TableError::malformed(FORMAT, "no BINTABLE extension"))
}

struct Field {
    repeat: usize,
    code: char,
    tnull: Option<i64>,
    scale: f64,
    zero: f64,
}

impl Field {
    fn element_size(&self) -> usize {
        match self.code {
            'L' | 'B' | 'A' => 1,
            'I' => 2,
            'J' | 'E' => 4,
            _ => 8,
        }
    }

    fn is_scaled(&self) -> bool {
        self.scale != 1.0 || self.zero != 0.0
    }
}

fn parse_tform(tform: &str) -> TableResult<(usize, char)> {
    let tform = tform.trim();
    let digits: String = tform.chars().take_while(|c| c.is_ascii_digit()).collect();
    let code = tform[digits.len()..]
        .chars()
        .next()
        .ok_or_else(|| TableError::malformed(FORMAT, format!("invalid TFORM '{tform}'")))?;
    let repeat = if digits.is_empty() {
        1
    } else {
        digits
            .parse()
            .map_err(|_| TableError::malformed(FORMAT, format!("invalid TFORM '{tform}'")))?
    };
    if !matches!(code, 'L' | 'B' | 'I' | 'J' | 'K' | 'E' | 'D' | 'A') {
        return Err(TableError::malformed(
            FORMAT,
            format!("unsupported TFORM '{tform}'"),
        ));
    }
    Ok((repeat, code))
}

fn read_bintable(header: &Header, data: &[u8]) -> TableResult<Table> {
    let to_usize = |key: &str| -> TableResult<usize> {
        usize::try_from(header.require_int(key)?)
            .map_err(|_| TableError::malformed(FORMAT, format!("{key} is negative")))
    };
    let row_bytes = to_usize("NAXIS1")?;
    let num_rows = to_usize("NAXIS2")?;
    let num_fields = to_usize("TFIELDS")?;
    if num_fields > MAX_FIELDS {
        return Err(TableError::malformed(
            FORMAT,
            format!("TFIELDS is {num_fields}, at most {MAX_FIELDS} are allowed"),
        ));
    }

    let mut fields = Vec::with_capacity(num_fields);
    let mut columns = Vec::with_capacity(num_fields);
    for i in 1..=num_fields {
        let tform = header
            .get_str(&format!("TFORM{i}"))
            .ok_or_else(|| TableError::malformed(FORMAT, format!("missing TFORM{i}")))?;
        let (repeat, code) = parse_tform(&tform)?;
        let field = Field {
            repeat,
            code,
            tnull: header.get_int(&format!("TNULL{i}"))?,
            scale: header.get_float(&format!("TSCAL{i}"))?.unwrap_or(1.0),
            zero: header.get_float(&format!("TZERO{i}"))?.unwrap_or(0.0),
        };

        let datatype = match code {
            'L' => DataType::Boolean,
            'B' => DataType::UnsignedByte,
            'I' => DataType::Short,
            'J' => DataType::Int,
            'K' => DataType::Long,
            'E' => DataType::Float,
            'D' => DataType::Double,
            _ => DataType::Char,
        };
        let datatype = if field.is_scaled() && field.scale.fract() != 0.0 {
            DataType::Double
        } else {
            datatype
        };

        let name = header
            .get_str(&format!("TTYPE{i}"))
            .unwrap_or_else(|| format!("col{i}"));
        let mut column = ColumnMeta::new(name, datatype);
        column.unit = header.get_str(&format!("TUNIT{i}"));
        if code == 'A' || repeat != 1 {
            column.arraysize = Some(repeat.to_string());
        }
        column.null_value = field.tnull.map(|n| n.to_string());

        fields.push(field);
        columns.push(column);
    }

    let declared = fields
        .iter()
        .try_fold(0usize, |acc, f| {
            f.repeat
                .checked_mul(f.element_size())
                .and_then(|width| acc.checked_add(width))
        })
        .ok_or_else(|| TableError::malformed(FORMAT, "TFORM widths out of range"))?;
    if declared != row_bytes {
        return Err(TableError::malformed(
            FORMAT,
            format!("TFORM widths sum to {declared} bytes but NAXIS1 is {row_bytes}"),
        ));
    }
    let table_bytes = row_bytes
        .checked_mul(num_rows)
        .ok_or_else(|| TableError::malformed(FORMAT, "NAXIS1 x NAXIS2 out of range"))?;
    if data.len() < table_bytes {
        return Err(TableError::malformed(
            FORMAT,
            format!("table data truncated: {} of {table_bytes} bytes", data.len()),
        ));
    }

    let mut table = Table::new(columns);
    for r in 0..num_rows {
        let mut cursor = Cursor::new(&data[r * row_bytes..(r + 1) * row_bytes]);
        let row = fields
            .iter()
            .map(|field| read_cell(&mut cursor, field))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| TableError::malformed(FORMAT, format!("row {r}: {e}")))?;
        table.push_row(row)?;
    }
    Ok(table)
}

fn read_cell(cursor: &mut Cursor<&[u8]>, field: &Field) -> std::io::Result<Value> {
    if field.code == 'A' {
        let mut text = String::with_capacity(field.repeat);
        for _ in 0..field.repeat {
            text.push(cursor.read_u8()? as char);
        }
        let text = text.trim_end_matches(['\0', ' ']);
        return Ok(if text.is_empty() {
            Value::Null
        } else {
            Value::Text(text.to_string())
        });
    }

    let mut items = Vec::with_capacity(field.repeat);
    for _ in 0..field.repeat {
        items.push(read_element(cursor, field)?);
    }
    Ok(match field.repeat {
        0 => Value::Null,
        1 => items.remove(0),
        _ => Value::Array(items),
    })
}

fn read_element(cursor: &mut Cursor<&[u8]>, field: &Field) -> std::io::Result<Value> {
    let float = |x: f64| {
        if x.is_nan() {
            Value::Null
        } else {
            Value::Float(x)
        }
    };

    let raw: i64 = match field.code {
        'L' => {
            return Ok(match cursor.read_u8()? {
                b'T' => Value::Bool(true),
                b'F' => Value::Bool(false),
                _ => Value::Null,
            })
        }
        'E' => return Ok(float(cursor.read_f32::<BigEndian>()? as f64)),
        'D' => return Ok(float(cursor.read_f64::<BigEndian>()?)),
        'B' => cursor.read_u8()? as i64,
        'I' => cursor.read_i16::<BigEndian>()? as i64,
        'J' => cursor.read_i32::<BigEndian>()? as i64,
        _ => cursor.read_i64::<BigEndian>()?,
    };

    if field.tnull == Some(raw) {
        return Ok(Value::Null);
    }
    if !field.is_scaled() {
        return Ok(Value::Int(raw));
    }
    if field.scale == 1.0 && field.zero.fract() == 0.0 {
        let shifted = raw as i128 + field.zero as i128;
        if let Ok(v) = i64::try_from(shifted) {
            return Ok(Value::Int(v));
        }
    }
    Ok(Value::Float(raw as f64 * field.scale + field.zero))
}
