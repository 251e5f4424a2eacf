//! # Xport Encode - Format Encoder Implementations
//!
//! This crate provides the four format encoders of the export pipeline, each
//! one implementation of the core `RowEncoder` capability:
//!
//! - **CSV**: header line plus one escaped record line per row
//! - **JSON**: a streamed array of compact objects
//! - **XML**: `<records>`/`<record>` tree with sanitized tags
//! - **Parquet**: genuine columnar output, one row group flushed at a time
//!
//! Encoders never see the database; they pattern-match on the tagged value
//! model and append bytes to the caller's buffer.

use xport_core::{ExportError, ExportFormat, ExportRequest, RowEncoder, Value};

/// CSV encoder implementation
pub mod encode_csv;

/// JSON array encoder implementation
pub mod encode_json;

/// Parquet columnar encoder implementation
pub mod encode_parquet;

/// XML encoder implementation
pub mod encode_xml;

pub use encode_csv::CsvEncoder;
pub use encode_json::JsonEncoder;
pub use encode_parquet::ParquetEncoder;
pub use encode_xml::XmlEncoder;

/// Rows per Parquet row group; also the columnar cursor fetch size, so one
/// fetch fills exactly one row group.
pub const PARQUET_ROW_GROUP_ROWS: usize = 50_000;

/// The single format dispatch in the workspace.
pub fn encoder_for(request: &ExportRequest) -> Result<Box<dyn RowEncoder>, ExportError> {
    Ok(match request.format {
        ExportFormat::Csv => Box::new(CsvEncoder::new(&request.columns)),
        ExportFormat::Json => Box::new(JsonEncoder::new(&request.columns)),
        ExportFormat::Xml => Box::new(XmlEncoder::new(&request.columns)),
        ExportFormat::Parquet => {
            Box::new(ParquetEncoder::new(&request.columns, PARQUET_ROW_GROUP_ROWS)?)
        }
    })
}

/// Canonical text of a scalar value; `None` for lists and documents.
/// Nulls render as the empty string.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::Decimal(d) => Some(d.to_string()),
        Value::Timestamp(ts) => Some(xport_core::value::format_timestamp(ts)),
        Value::Text(s) => Some(s.clone()),
        Value::List(_) | Value::Document(_) => None,
    }
}

/// Compact JSON text of any value, used where a nested document must fit in
/// a single textual field.
pub(crate) fn compact_json(value: &Value) -> Result<String, ExportError> {
    serde_json::to_string(&value.to_json()).map_err(|e| ExportError::Encoder(e.into()))
}
