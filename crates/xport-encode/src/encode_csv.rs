//! Delimited-text encoder.

use xport_core::{ColumnMapping, ExportError, RowEncoder, Value};

use crate::{compact_json, scalar_text};

/// Emits a header line of target names, then one comma-joined line per row.
///
/// Fields are quoted only when they contain `,`, `"`, or `\n`; interior
/// quotes are doubled. Nested documents collapse to one compact-JSON field.
pub struct CsvEncoder {
    targets: Vec<String>,
}

impl CsvEncoder {
    pub fn new(columns: &[ColumnMapping]) -> Self {
        Self {
            targets: columns.iter().map(|c| c.target.clone()).collect(),
        }
    }
}

impl RowEncoder for CsvEncoder {
    fn start(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError> {
        for (idx, target) in self.targets.iter().enumerate() {
            if idx > 0 {
                out.push(b',');
            }
            push_field(out, target);
        }
        out.push(b'\n');
        Ok(())
    }

    fn encode_row(&mut self, row: &[Value], out: &mut Vec<u8>) -> Result<(), ExportError> {
        for (idx, value) in row.iter().enumerate() {
            if idx > 0 {
                out.push(b',');
            }
            let field = match scalar_text(value) {
                Some(text) => text,
                None => compact_json(value)?,
            };
            push_field(out, &field);
        }
        out.push(b'\n');
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<u8>) -> Result<(), ExportError> {
        Ok(())
    }
}

fn push_field(out: &mut Vec<u8>, field: &str) {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        out.push(b'"');
        for byte in field.bytes() {
            if byte == b'"' {
                out.push(b'"');
            }
            out.push(byte);
        }
        out.push(b'"');
    } else {
        out.extend_from_slice(field.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(columns: &[(&str, &str)], rows: &[Vec<Value>]) -> String {
        let mapping: Vec<ColumnMapping> = columns
            .iter()
            .map(|(s, t)| ColumnMapping {
                source: s.to_string(),
                target: t.to_string(),
            })
            .collect();
        let mut encoder = CsvEncoder::new(&mapping);
        let mut out = Vec::new();
        encoder.start(&mut out).unwrap();
        for row in rows {
            encoder.encode_row(row, &mut out).unwrap();
        }
        encoder.finish(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn smoke_two_columns() {
        let body = encode(
            &[("id", "ID"), ("name", "Name")],
            &[vec![Value::Int(1), Value::Text("Record_1".into())]],
        );
        assert_eq!(body, "ID,Name\n1,Record_1\n");
    }

    #[test]
    fn field_with_comma_and_quote_is_escaped() {
        let body = encode(
            &[("id", "id"), ("name", "name")],
            &[vec![Value::Int(1), Value::Text("a,b\"c".into())]],
        );
        assert_eq!(body.lines().nth(1).unwrap(), "1,\"a,b\"\"c\"");
    }

    #[test]
    fn field_with_newline_is_quoted() {
        let body = encode(
            &[("name", "name")],
            &[vec![Value::Text("line1\nline2".into())]],
        );
        assert_eq!(body, "name\n\"line1\nline2\"\n");
    }

    #[test]
    fn empty_table_is_header_only() {
        assert_eq!(encode(&[("id", "ID"), ("name", "Name")], &[]), "ID,Name\n");
    }

    #[test]
    fn null_renders_as_empty_field() {
        let body = encode(
            &[("id", "id"), ("name", "name")],
            &[vec![Value::Null, Value::Text("x".into())]],
        );
        assert_eq!(body.lines().nth(1).unwrap(), ",x");
    }

    #[test]
    fn nested_document_collapses_to_json_field() {
        let metadata = Value::from_json(serde_json::json!({"category": "A", "tags": ["x", "y"]}));
        let body = encode(&[("metadata", "metadata")], &[vec![metadata]]);
        assert_eq!(
            body.lines().nth(1).unwrap(),
            "\"{\"\"category\"\":\"\"A\"\",\"\"tags\"\":[\"\"x\"\",\"\"y\"\"]}\""
        );
    }

    #[test]
    fn header_targets_are_escaped_too() {
        let body = encode(&[("name", "first,last")], &[]);
        assert_eq!(body, "\"first,last\"\n");
    }
}
