//! Object-array JSON encoder.

use xport_core::{ColumnMapping, ExportError, RowEncoder, Value};

/// Streams `[`, one compact object per row with exactly one comma between
/// consecutive objects, then `]`. Object keys follow mapping order; nested
/// documents are native JSON, decimals and timestamps are strings.
pub struct JsonEncoder {
    targets: Vec<String>,
    first: bool,
}

impl JsonEncoder {
    pub fn new(columns: &[ColumnMapping]) -> Self {
        Self {
            targets: columns.iter().map(|c| c.target.clone()).collect(),
            first: true,
        }
    }
}

impl RowEncoder for JsonEncoder {
    fn start(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError> {
        out.extend_from_slice(b"[\n");
        Ok(())
    }

    fn encode_row(&mut self, row: &[Value], out: &mut Vec<u8>) -> Result<(), ExportError> {
        if !self.first {
            out.extend_from_slice(b",\n");
        }
        self.first = false;

        out.push(b'{');
        for (idx, (target, value)) in self.targets.iter().zip(row).enumerate() {
            if idx > 0 {
                out.push(b',');
            }
            let key =
                serde_json::to_string(target).map_err(|e| ExportError::Encoder(e.into()))?;
            out.extend_from_slice(key.as_bytes());
            out.push(b':');
            let rendered = serde_json::to_string(&value.to_json())
                .map_err(|e| ExportError::Encoder(e.into()))?;
            out.extend_from_slice(rendered.as_bytes());
        }
        out.push(b'}');
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError> {
        out.extend_from_slice(b"\n]");
        Ok(())
    }
}
