//! Columnar Parquet encoder.
//!
//! Produces genuine Apache Parquet: `PAR1` magic, dictionary-encoded column
//! chunks, Thrift footer. Rows accumulate in Arrow column builders until one
//! row group is full, then the group is written and its bytes handed to the
//! sink immediately, so at most one row group is ever resident.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use arrow_array::builder::{
    Decimal128Builder, Int64Builder, StringBuilder, TimestampMicrosecondBuilder,
};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;

use xport_core::{ColumnMapping, ExportError, RowEncoder, Value};

use crate::{compact_json, scalar_text};

/// Precision/scale of the `value` column, mirroring `DECIMAL(18,4)`.
const DECIMAL_PRECISION: u8 = 18;
const DECIMAL_SCALE: i8 = 4;

enum ColumnBuilder {
    Int(Int64Builder),
    Timestamp(TimestampMicrosecondBuilder),
    Decimal(Decimal128Builder),
    Utf8(StringBuilder),
}

pub struct ParquetEncoder {
    schema: Arc<Schema>,
    builders: Vec<ColumnBuilder>,
    writer: Option<ArrowWriter<SharedBuffer>>,
    buffer: SharedBuffer,
    group_rows: usize,
    pending_rows: usize,
}

impl ParquetEncoder {
    /// Build the Arrow schema and column builders for a mapping. The source
    /// attribute decides the physical type: INT64 for `id`, TIMESTAMP(UTC)
    /// for `created_at`, DECIMAL128(18,4) for `value`, UTF8 for `name` and
    /// for `metadata` (serialized compact JSON).
    pub fn new(columns: &[ColumnMapping], group_rows: usize) -> Result<Self, ExportError> {
        let mut fields = Vec::with_capacity(columns.len());
        let mut builders = Vec::with_capacity(columns.len());
        for mapping in columns {
            let (data_type, builder) = match mapping.source.as_str() {
                "id" => (DataType::Int64, ColumnBuilder::Int(Int64Builder::new())),
                "created_at" => (
                    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                    ColumnBuilder::Timestamp(TimestampMicrosecondBuilder::new()),
                ),
                "value" => (
                    DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE),
                    ColumnBuilder::Decimal(
                        Decimal128Builder::new()
                            .with_precision_and_scale(DECIMAL_PRECISION, DECIMAL_SCALE)
                            .map_err(|e| ExportError::Encoder(e.into()))?,
                    ),
                ),
                _ => (DataType::Utf8, ColumnBuilder::Utf8(StringBuilder::new())),
            };
            fields.push(Field::new(&mapping.target, data_type, true));
            builders.push(builder);
        }
        Ok(Self {
            schema: Arc::new(Schema::new(fields)),
            builders,
            writer: None,
            buffer: SharedBuffer::default(),
            group_rows,
            pending_rows: 0,
        })
    }

    fn writer_mut(&mut self) -> Result<&mut ArrowWriter<SharedBuffer>, ExportError> {
        self.writer
            .as_mut()
            .ok_or_else(|| ExportError::Encoder(anyhow::anyhow!("parquet writer not started")))
    }

    /// Close out the pending row group and hand its bytes to the caller.
    fn flush_group(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.builders.len());
        for builder in &mut self.builders {
            arrays.push(match builder {
                ColumnBuilder::Int(b) => Arc::new(b.finish()),
                ColumnBuilder::Timestamp(b) => Arc::new(b.finish().with_timezone("UTC")),
                ColumnBuilder::Decimal(b) => Arc::new(b.finish()),
                ColumnBuilder::Utf8(b) => Arc::new(b.finish()),
            });
        }
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)
            .map_err(|e| ExportError::Encoder(e.into()))?;
        let writer = self.writer_mut()?;
        writer
            .write(&batch)
            .map_err(|e| ExportError::Encoder(e.into()))?;
        writer
            .flush()
            .map_err(|e| ExportError::Encoder(e.into()))?;
        tracing::debug!(rows = batch.num_rows(), "parquet row group flushed");
        self.pending_rows = 0;
        out.extend_from_slice(&self.buffer.drain()?);
        Ok(())
    }
}

impl RowEncoder for ParquetEncoder {
    fn start(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError> {
        let props = WriterProperties::builder()
            .set_max_row_group_size(self.group_rows)
            .build();
        let writer = ArrowWriter::try_new(self.buffer.clone(), self.schema.clone(), Some(props))
            .map_err(|e| ExportError::Encoder(e.into()))?;
        self.writer = Some(writer);
        out.extend_from_slice(&self.buffer.drain()?);
        Ok(())
    }

    fn encode_row(&mut self, row: &[Value], out: &mut Vec<u8>) -> Result<(), ExportError> {
        if row.len() != self.builders.len() {
            return Err(ExportError::Encoder(anyhow::anyhow!(
                "row width {} does not match schema width {}",
                row.len(),
                self.builders.len()
            )));
        }
        for (builder, value) in self.builders.iter_mut().zip(row) {
            append(builder, value)?;
        }
        self.pending_rows += 1;
        if self.pending_rows >= self.group_rows {
            self.flush_group(out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError> {
        self.flush_group(out)?;
        let writer = self
            .writer
            .take()
            .ok_or_else(|| ExportError::Encoder(anyhow::anyhow!("parquet writer not started")))?;
        writer
            .close()
            .map_err(|e| ExportError::Encoder(e.into()))?;
        out.extend_from_slice(&self.buffer.drain()?);
        Ok(())
    }
}

fn append(builder: &mut ColumnBuilder, value: &Value) -> Result<(), ExportError> {
    match builder {
        ColumnBuilder::Int(b) => match value {
            Value::Null => b.append_null(),
            Value::Int(i) => b.append_value(*i),
            other => return Err(type_mismatch("INT64", other)),
        },
        ColumnBuilder::Timestamp(b) => match value {
            Value::Null => b.append_null(),
            Value::Timestamp(ts) => b.append_value(ts.timestamp_micros()),
            other => return Err(type_mismatch("TIMESTAMP", other)),
        },
        ColumnBuilder::Decimal(b) => match value {
            Value::Null => b.append_null(),
            Value::Decimal(d) => {
                let mut scaled = *d;
                scaled.rescale(DECIMAL_SCALE as u32);
                b.append_value(scaled.mantissa());
            }
            other => return Err(type_mismatch("DECIMAL", other)),
        },
        ColumnBuilder::Utf8(b) => match value {
            Value::Null => b.append_null(),
            scalar if scalar.is_scalar() => {
                // scalar_text covers every scalar variant
                b.append_value(scalar_text(scalar).unwrap_or_default());
            }
            nested => b.append_value(compact_json(nested)?),
        },
    }
    Ok(())
}

fn type_mismatch(expected: &str, got: &Value) -> ExportError {
    ExportError::Encoder(anyhow::anyhow!(
        "value {got:?} does not fit {expected} column"
    ))
}

/// `io::Write` target shared between the Arrow writer and the encoder, so
/// row-group bytes can be drained out as soon as the writer flushes them.
#[derive(Clone, Default)]
struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    fn drain(&self) -> Result<Vec<u8>, ExportError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ExportError::Encoder(anyhow::anyhow!("parquet buffer poisoned")))?;
        Ok(std::mem::take(&mut *inner))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "parquet buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
