use std::fmt::Write as _;

use quick_xml::escape::escape;

use crate::table::{Table, Value};

/// Serialize a table as a VOTable 1.4 document with TABLEDATA encoding.
///
/// This is the representation uploaded to TAP services, so every column
/// keeps its datatype, arraysize, unit, UCD, utype and description.
pub fn write(table: &Table) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<VOTABLE version=\"1.4\" xmlns=\"http://www.ivoa.net/xml/VOTable/v1.3\">\n<RESOURCE type=\"results\">\n",
    );
    for info in table.infos() {
        let _ = write!(
            out,
            "<INFO name=\"{}\" value=\"{}\"",
            escape(info.name.as_str()),
            escape(info.value.as_str())
        );
        match &info.content {
            Some(content) => {
                let _ = writeln!(out, ">{}</INFO>", escape(content.as_str()));
            }
            None => out.push_str("/>\n"),
        }
    }

    match table.name() {
        Some(name) => {
            let _ = writeln!(out, "<TABLE name=\"{}\">", escape(name));
        }
        None => out.push_str("<TABLE>\n"),
    }

    for column in table.columns() {
        let _ = write!(
            out,
            "<FIELD name=\"{}\" datatype=\"{}\"",
            escape(column.name.as_str()),
            column.datatype.as_votable()
        );
        let arraysize = column
            .arraysize
            .clone()
            .or_else(|| column.datatype.is_text().then(|| "*".to_string()));
        for (key, value) in [
            ("arraysize", &arraysize),
            ("unit", &column.unit),
            ("ucd", &column.ucd),
            ("utype", &column.utype),
        ] {
            if let Some(value) = value {
                let _ = write!(out, " {key}=\"{}\"", escape(value.as_str()));
            }
        }
        if column.description.is_none() && column.null_value.is_none() {
            out.push_str("/>\n");
            continue;
        }
        out.push_str(">\n");
        if let Some(description) = &column.description {
            let _ = writeln!(
                out,
                "<DESCRIPTION>{}</DESCRIPTION>",
                escape(description.as_str())
            );
        }
        if let Some(null) = &column.null_value {
            let _ = writeln!(out, "<VALUES null=\"{}\"/>", escape(null.as_str()));
        }
        out.push_str("</FIELD>\n");
    }

    out.push_str("<DATA><TABLEDATA>\n");
    for row in table.rows() {
        out.push_str("<TR>");
        for value in row {
            let _ = write!(out, "<TD>{}</TD>", escape(cell_text(value).as_str()));
        }
        out.push_str("</TR>\n");
    }
    out.push_str("</TABLEDATA></DATA>\n</TABLE>\n</RESOURCE>\n</VOTABLE>\n");
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "T".to_string(),
        Value::Bool(false) => "F".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Text(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(cell_text)
            .collect::<Vec<_>>()
            .join(" "),
    }
}
