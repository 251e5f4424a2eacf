//! Gzip compression adapter over any byte sink.

use std::io::Write;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;

use xport_core::{ByteSink, ExportError};

/// Pipes every chunk through a gzip encoder at the default level before it
/// reaches the wrapped sink.
///
/// The encoder's internal buffer is drained after each write, so only the
/// gzip window is ever resident.
pub struct GzipSink<S: ByteSink> {
    inner: S,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl<S: ByteSink> GzipSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
        }
    }
}

#[async_trait]
impl<S: ByteSink> ByteSink for GzipSink<S> {
    async fn write(&mut self, chunk: Bytes) -> Result<(), ExportError> {
        let encoder = self.encoder.as_mut().ok_or_else(|| ExportError::Sink {
            cause: "gzip encoder already finished".to_string(),
        })?;
        encoder.write_all(&chunk).map_err(|e| ExportError::Sink {
            cause: e.to_string(),
        })?;
        let pending = std::mem::take(encoder.get_mut());
        if !pending.is_empty() {
            self.inner.write(Bytes::from(pending)).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), ExportError> {
        if let Some(encoder) = self.encoder.take() {
            let trailer = encoder.finish().map_err(|e| ExportError::Sink {
                cause: e.to_string(),
            })?;
            if !trailer.is_empty() {
                self.inner.write(Bytes::from(trailer)).await?;
            }
        }
        self.inner.finish().await
    }
}
