//! Byte sinks: the HTTP response channel and the benchmark file sink.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use xport_core::{ByteSink, ExportError, CLIENT_DISCONNECTED};

/// Sink feeding the HTTP response body through a bounded channel.
///
/// The channel capacity is the only buffering between the encoder and the
/// socket; a slow or gone client stalls `write`, which stalls the pipeline.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Result<Bytes, io::Error>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Push a terminal error frame so the body stream fails; harmless if the
    /// consumer is already gone.
    pub async fn abort(&self, message: String) {
        let _ = self
            .tx
            .send(Err(io::Error::new(io::ErrorKind::Other, message)))
            .await;
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), ExportError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(Ok(chunk)).await.map_err(|_| ExportError::Sink {
            cause: CLIENT_DISCONNECTED.to_string(),
        })
    }

    async fn finish(&mut self) -> Result<(), ExportError> {
        // Dropping the sender closes the stream; nothing to flush.
        Ok(())
    }
}

/// Sink writing to a local file, used by the benchmark harness.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn new(file: std::fs::File) -> Self {
        Self {
            file: File::from_std(file),
        }
    }
}

#[async_trait]
impl ByteSink for FileSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), ExportError> {
        self.file
            .write_all(&chunk)
            .await
            .map_err(|e| ExportError::Sink {
                cause: e.to_string(),
            })
    }

    async fn finish(&mut self) -> Result<(), ExportError> {
        self.file.flush().await.map_err(|e| ExportError::Sink {
            cause: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_chunks_in_order() {
        let (mut sink, mut rx) = ChannelSink::new(4);
        sink.write(Bytes::from_static(b"ab")).await.unwrap();
        sink.write(Bytes::from_static(b"")).await.unwrap();
        sink.write(Bytes::from_static(b"cd")).await.unwrap();
        sink.finish().await.unwrap();
        drop(sink);

        let mut got = Vec::new();
        while let Some(chunk) = rx.recv().await {
            got.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(got, b"abcd");
    }

    #[tokio::test]
    async fn dropped_receiver_reads_as_client_disconnect() {
        let (mut sink, rx) = ChannelSink::new(1);
        drop(rx);
        let err = sink.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
