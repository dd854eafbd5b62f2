use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::trace;

use super::binary::{decode_stream, Serialization};
use crate::error::{TableError, TableResult};
use crate::table::{ColumnMeta, DataType, Info, Table, Value};

const FORMAT: &str = "VOTable";

/// Element whose text content is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Cell,
    FieldDescription,
    Info,
    Stream,
}

#[derive(Default)]
struct ReaderState {
    saw_root: bool,
    /// 0 = before the first TABLE, 1 = inside it, 2 = past it
    table_stage: u8,
    table_name: Option<String>,
    columns: Vec<ColumnMeta>,
    in_field: bool,
    infos: Vec<Info>,
    pending_info: Option<Info>,
    rows: Vec<Vec<Value>>,
    row: Option<Vec<Value>>,
    serialization: Option<Serialization>,
    capture: Option<Capture>,
    text: String,
}

/// Parse a VOTable document into a [`Table`].
///
/// Documents without a `TABLE` (typical of service error responses) yield an
/// empty table that still carries the document's `INFO` elements.
pub fn read(bytes: &[u8]) -> TableResult<Table> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut state = ReaderState::default();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            TableError::malformed(
                FORMAT,
                format!("{e} at byte {}", reader.buffer_position()),
            )
        })?;

        match event {
            Event::Start(e) => state.start(&e, false)?,
            Event::Empty(e) => state.start(&e, true)?,
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                state.end(&name)?;
            }
            Event::Text(t) => {
                if state.capture.is_some() {
                    let text = t
                        .unescape()
                        .map_err(|e| TableError::malformed(FORMAT, e.to_string()))?;
                    state.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if state.capture.is_some() {
                    state.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    state.finish()
}

impl ReaderState {
    fn start(&mut self, e: &BytesStart<'_>, empty: bool) -> TableResult<()> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

        if !self.saw_root {
            if name != "VOTABLE" {
                return Err(TableError::malformed(
                    FORMAT,
                    format!("root element is <{name}>, expected <VOTABLE>"),
                ));
            }
            self.saw_root = true;
            return Ok(());
        }

        match name.as_str() {
            "INFO" => {
                let attrs = attributes(e)?;
                let info = Info {
                    name: attrs.get("name").cloned().unwrap_or_default(),
                    value: attrs.get("value").cloned().unwrap_or_default(),
                    content: None,
                };
                if empty {
                    self.infos.push(info);
                } else {
                    self.pending_info = Some(info);
                    self.begin_capture(Capture::Info);
                }
            }
            _ if self.table_stage == 2 => {}
            "TABLE" => {
                self.table_stage = 1;
                self.table_name = attributes(e)?.get("name").cloned();
                if empty {
                    self.table_stage = 2;
                }
            }
            _ if self.table_stage != 1 => {}
            "FIELD" => {
                let column = field_from_attributes(&attributes(e)?)?;
                trace!("VOTable field {:?}", column.name);
                self.columns.push(column);
                self.in_field = !empty;
            }
            "DESCRIPTION" if self.in_field && !empty => {
                self.begin_capture(Capture::FieldDescription);
            }
            "VALUES" if self.in_field => {
                if let Some(null) = attributes(e)?.get("null") {
                    if let Some(column) = self.columns.last_mut() {
                        column.null_value = Some(null.clone());
                    }
                }
            }
            "BINARY" => self.serialization = Some(Serialization::Binary),
            "BINARY2" => self.serialization = Some(Serialization::Binary2),
            "STREAM" => {
                if let Some(encoding) = attributes(e)?.get("encoding") {
                    if encoding != "base64" {
                        return Err(TableError::malformed(
                            FORMAT,
                            format!("unsupported stream encoding '{encoding}'"),
                        ));
                    }
                } else if !empty {
                    return Err(TableError::malformed(
                        FORMAT,
                        "remote STREAM references are not supported",
                    ));
                }
                if !empty {
                    self.begin_capture(Capture::Stream);
                }
            }
            "TR" => {
                if empty {
                    self.push_row(Vec::new())?;
                } else {
                    self.row = Some(Vec::with_capacity(self.columns.len()));
                }
            }
            "TD" => {
                if empty {
                    self.push_cell(String::new())?;
                } else {
                    self.begin_capture(Capture::Cell);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, name: &str) -> TableResult<()> {
        match name {
            "INFO" if self.capture == Some(Capture::Info) => {
                let text = self.take_text();
                if let Some(mut info) = self.pending_info.take() {
                    if !text.is_empty() {
                        info.content = Some(text);
                    }
                    self.infos.push(info);
                }
            }
            "DESCRIPTION" if self.capture == Some(Capture::FieldDescription) => {
                let text = self.take_text();
                if let Some(column) = self.columns.last_mut() {
                    column.description = Some(text);
                }
            }
            "FIELD" => self.in_field = false,
            "TD" if self.capture == Some(Capture::Cell) => {
                let text = self.take_text();
                self.push_cell(text)?;
            }
            "TR" => {
                if let Some(row) = self.row.take() {
                    self.push_row(row)?;
                }
            }
            "STREAM" if self.capture == Some(Capture::Stream) => {
                let text = self.take_text();
                self.decode_stream(&text)?;
            }
            "TABLE" if self.table_stage == 1 => self.table_stage = 2,
            _ => {}
        }
        Ok(())
    }

    fn begin_capture(&mut self, capture: Capture) {
        self.capture = Some(capture);
        self.text.clear();
    }

    fn take_text(&mut self) -> String {
        self.capture = None;
        std::mem::take(&mut self.text).trim().to_string()
    }

    fn push_cell(&mut self, text: String) -> TableResult<()> {
        let row_number = self.rows.len();
        let row = self
            .row
            .as_mut()
            .ok_or_else(|| TableError::malformed(FORMAT, "<TD> outside of <TR>"))?;
        let column = self.columns.get(row.len()).ok_or_else(|| {
            TableError::malformed(
                FORMAT,
                format!("row {row_number} has more cells than the {} fields", self.columns.len()),
            )
        })?;
        let value = Value::parse_typed(&text, column).map_err(|e| {
            TableError::malformed(
                FORMAT,
                format!("row {row_number}, column '{}': {e}", column.name),
            )
        })?;
        row.push(value);
        Ok(())
    }

    fn push_row(&mut self, row: Vec<Value>) -> TableResult<()> {
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

    fn decode_stream(&mut self, text: &str) -> TableResult<()> {
        let serialization = self
            .serialization
            .ok_or_else(|| TableError::malformed(FORMAT, "<STREAM> outside of BINARY/BINARY2"))?;
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let data = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| TableError::malformed(FORMAT, format!("invalid base64 stream: {e}")))?;
        let mut rows = decode_stream(&self.columns, &data, serialization)?;
        self.rows.append(&mut rows);
        Ok(())
    }

    fn finish(self) -> TableResult<Table> {
        if !self.saw_root {
            return Err(TableError::malformed(FORMAT, "no <VOTABLE> element"));
        }
        if self.table_stage == 1 || self.row.is_some() || self.capture.is_some() {
            return Err(TableError::malformed(FORMAT, "document ends inside <TABLE>"));
        }

        let mut table = Table::new(self.columns);
        if let Some(name) = self.table_name {
            table = table.with_name(name);
        }
        for row in self.rows {
            table.push_row(row)?;
        }
        for info in self.infos {
            table.add_info(info);
        }
        Ok(table)
    }
}

fn attributes(e: &BytesStart<'_>) -> TableResult<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| TableError::malformed(FORMAT, err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| TableError::malformed(FORMAT, err.to_string()))?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn field_from_attributes(attrs: &HashMap<String, String>) -> TableResult<ColumnMeta> {
    let name = attrs
        .get("name")
        .or_else(|| attrs.get("ID"))
        .cloned()
        .ok_or_else(|| TableError::malformed(FORMAT, "<FIELD> without a name"))?;
    let datatype_name = attrs
        .get("datatype")
        .ok_or_else(|| TableError::malformed(FORMAT, format!("field '{name}' has no datatype")))?;
    // Bit and complex types are rare in TAP results; they are carried as text.
    let datatype = DataType::from_votable(datatype_name).unwrap_or(DataType::Char);

    let mut column = ColumnMeta::new(name, datatype);
    column.arraysize = attrs.get("arraysize").cloned();
    column.unit = attrs.get("unit").cloned();
    column.ucd = attrs.get("ucd").cloned();
    column.utype = attrs.get("utype").cloned();
    Ok(column)
}
