//! Hierarchical XML encoder.

use xport_core::{ColumnMapping, ExportError, RowEncoder, Value};

use crate::scalar_text;

/// Emits an XML 1.0 document: declaration, `<records>`, one `<record>` per
/// row, `</records>`. Column tags are the sanitized target names; nested
/// documents recurse into child elements and lists expand to `item_<index>`
/// elements.
pub struct XmlEncoder {
    tags: Vec<String>,
}

impl XmlEncoder {
    pub fn new(columns: &[ColumnMapping]) -> Self {
        Self {
            tags: columns.iter().map(|c| sanitize_tag(&c.target)).collect(),
        }
    }
}

impl RowEncoder for XmlEncoder {
    fn start(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError> {
        out.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<records>\n");
        Ok(())
    }

    fn encode_row(&mut self, row: &[Value], out: &mut Vec<u8>) -> Result<(), ExportError> {
        out.extend_from_slice(b"<record>");
        for (tag, value) in self.tags.iter().zip(row) {
            write_element(out, tag, value);
        }
        out.extend_from_slice(b"</record>\n");
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError> {
        out.extend_from_slice(b"</records>\n");
        Ok(())
    }
}

fn write_element(out: &mut Vec<u8>, tag: &str, value: &Value) {
    out.push(b'<');
    out.extend_from_slice(tag.as_bytes());
    out.push(b'>');
    match value {
        Value::Document(entries) => {
            for (key, child) in entries {
                write_element(out, &sanitize_tag(key), child);
            }
        }
        Value::List(items) => {
            for (idx, item) in items.iter().enumerate() {
                write_element(out, &format!("item_{idx}"), item);
            }
        }
        scalar => {
            // Scalars only past the two container arms.
            if let Some(text) = scalar_text(scalar) {
                escape_into(out, &text);
            }
        }
    }
    out.extend_from_slice(b"</");
    out.extend_from_slice(tag.as_bytes());
    out.push(b'>');
}

/// Rewrite an arbitrary string into a valid XML name: every character
/// outside `[A-Za-z0-9_-]` becomes `_`, and a leading digit gets a `_`
/// prefix.
pub fn sanitize_tag(raw: &str) -> String {
    let mut tag: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if tag.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        tag.insert(0, '_');
    }
    tag
}

fn escape_into(out: &mut Vec<u8>, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            '"' => out.extend_from_slice(b"&quot;"),
            '\'' => out.extend_from_slice(b"&apos;"),
            other => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(targets: &[&str], rows: &[Vec<Value>]) -> String {
        let mapping: Vec<ColumnMapping> = targets
            .iter()
            .map(|t| ColumnMapping {
                source: "metadata".to_string(),
                target: t.to_string(),
            })
            .collect();
        let mut encoder = XmlEncoder::new(&mapping);
        let mut out = Vec::new();
        encoder.start(&mut out).unwrap();
        for row in rows {
            encoder.encode_row(row, &mut out).unwrap();
        }
        encoder.finish(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn nested_document_and_list_expand_to_elements() {
        let metadata = Value::from_json(serde_json::json!({"category": "A", "tags": ["x", "y"]}));
        let body = encode(&["metadata"], &[vec![metadata]]);
        assert!(body.contains(
            "<metadata><category>A</category>\
             <tags><item_0>x</item_0><item_1>y</item_1></tags></metadata>"
        ));
    }

    #[test]
    fn metadata_key_with_space_and_leading_digit_is_sanitized() {
        let metadata = Value::from_json(serde_json::json!({"1st value": "v"}));
        let body = encode(&["metadata"], &[vec![metadata]]);
        assert!(body.contains("<_1st_value>v</_1st_value>"));
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_tag("1st value"), "_1st_value");
        assert_eq!(sanitize_tag("a.b/c"), "a_b_c");
        assert_eq!(sanitize_tag("Snake_case-ok"), "Snake_case-ok");
        assert_eq!(sanitize_tag(""), "_");
    }

    #[test]
    fn scalar_content_is_entity_escaped() {
        let body = encode(
            &["name"],
            &[vec![Value::Text("a<b&c\"d'e>".into())]],
        );
        assert!(body.contains("<name>a&lt;b&amp;c&quot;d&apos;e&gt;</name>"));
    }

    #[test]
    fn empty_table_is_declaration_and_root_only() {
        assert_eq!(
            encode(&["metadata"], &[]),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<records>\n</records>\n"
        );
    }

    #[test]
    fn well_formed_record_frame() {
        let body = encode(&["id"], &[vec![Value::Int(1)], vec![Value::Int(2)]]);
        assert_eq!(body.matches("<record>").count(), 2);
        assert_eq!(body.matches("</record>").count(), 2);
        assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(body.trim_end().ends_with("</records>"));
    }
}
