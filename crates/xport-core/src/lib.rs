//! # Xport Core - Export Engine Core Library
//!
//! This crate provides the foundational types, traits, and abstractions for the
//! xport streaming export engine. It defines the tagged value model carried
//! through the pipeline, the export job domain types and registry, the operator
//! interfaces, and the error taxonomy used throughout the workspace.
//!
//! ## Key Components
//!
//! - **Message System**: Batched row passing between pipeline stages
//! - **Operator Traits**: `RowSource`, `RowEncoder`, and `ByteSink` abstractions
//! - **Value Model**: A small tagged sum over the database value space
//! - **Job Model**: Export requests, job descriptors, and the in-process registry
//! - **Error Handling**: One error enum per failure kind in the pipeline
//!
//! ## Pipeline Shape
//!
//! A single export is strictly linear and pull-driven:
//!
//! ```text
//! cursor source ──(bounded channel)──▶ encoder ──▶ byte sink ──▶ HTTP writer
//! ```
//!
//! The channel between the source and the encoder holds at most one batch, so
//! the HTTP writer's demand is the only thing that advances the cursor.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod job;
pub mod value;

pub use job::{
    ColumnMapping, Compression, ExportFormat, ExportJob, ExportRequest, JobRegistry, JobStatus,
    RECORD_SOURCES,
};
pub use value::Value;

/// One projected row: coerced values in column-mapping order.
pub type ProjectedRow = Vec<Value>;

/// One cursor fetch worth of projected rows.
pub type RowBatch = Vec<ProjectedRow>;

/// Sender side of the batch channel between source and encoder.
pub type BatchTx = mpsc::Sender<Message>;

/// Receiver side of the batch channel between source and encoder.
pub type BatchRx = mpsc::Receiver<Message>;

/// Failure cause recorded when the client goes away mid-stream.
pub const CLIENT_DISCONNECTED: &str = "client_disconnected";

/// Messages passed from the row source to the encoder loop.
#[derive(Debug, Clone)]
pub enum Message {
    /// A batch of projected rows.
    Batch(RowBatch),

    /// End-of-stream marker
    ///
    /// Sent after the cursor is exhausted and its transaction released,
    /// allowing the encoder to finalize its output.
    Eos,
}

/// Error kinds of the export pipeline
///
/// Each variant corresponds to one failure surface; the pipeline driver is the
/// single place that translates these into HTTP statuses and job updates.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Malformed export request: unknown format, empty columns, unknown
    /// column source, unknown compression.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Download of an identifier the registry has never seen.
    #[error("export job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Database connect, declare, or fetch failure. No retry at this layer.
    #[error("cursor failed: {0}")]
    Cursor(#[source] anyhow::Error),

    /// Structural failure inside a format encoder.
    #[error("encoder failed: {0}")]
    Encoder(#[source] anyhow::Error),

    /// Write to the compressor or the HTTP socket failed, typically a client
    /// disconnect.
    #[error("sink failed: {cause}")]
    Sink { cause: String },

    /// Startup configuration problem.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ExportError {
    /// True when the failure was the downstream consumer going away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ExportError::Sink { cause } if cause == CLIENT_DISCONNECTED)
    }

    /// Short cause string recorded on the failed job descriptor.
    pub fn job_cause(&self) -> String {
        match self {
            ExportError::Sink { cause } => cause.clone(),
            other => other.to_string(),
        }
    }
}

/// Trait for row-producing operators
///
/// Sources own their backing resources (connection, transaction, cursor) for
/// the duration of `run` and must release them on every exit path, including
/// cancellation and channel abandonment, before emitting [`Message::Eos`].
#[async_trait]
pub trait RowSource: Send {
    /// Name used for logging.
    fn name(&self) -> &str;

    /// Produce batches until exhaustion, cancellation, or failure.
    async fn run(&mut self, tx: BatchTx, cancel: CancellationToken) -> Result<(), ExportError>;
}

/// Trait for format encoders
///
/// An encoder turns projected rows into format-specific bytes appended to
/// `out`. Implementations hold whatever per-stream state the grammar needs
/// (separators, column builders, a pending row group) but never more than one
/// row group's worth of data.
pub trait RowEncoder: Send {
    /// Append stream preamble bytes (header line, opening bracket, magic).
    fn start(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError>;

    /// Append one row.
    fn encode_row(&mut self, row: &[Value], out: &mut Vec<u8>) -> Result<(), ExportError>;

    /// Append stream trailer bytes and flush any pending state.
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), ExportError>;
}

/// Trait for byte-consuming sinks at the end of the pipeline
///
/// Sinks suspend in `write` when the consumer is not ready; that suspension is
/// the backpressure signal that stalls the whole pipeline.
#[async_trait]
pub trait ByteSink: Send {
    /// Deliver one chunk downstream.
    async fn write(&mut self, chunk: Bytes) -> Result<(), ExportError>;

    /// Flush remaining state and close the sink.
    async fn finish(&mut self) -> Result<(), ExportError>;
}
