//! Export pipeline driver: wires source → encoder → sink and owns the
//! error-to-status translation for one export.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use sqlx::postgres::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use xport_core::{
    BatchRx, ByteSink, Compression, ExportError, ExportJob, JobRegistry, JobStatus, Message,
    RowEncoder, RowSource,
};
use xport_encode::encoder_for;
use xport_io::coerce::ProjectionPlan;
use xport_io::sink::ChannelSink;
use xport_io::sink_gzip::GzipSink;
use xport_io::source_cursor::RecordCursorSource;

/// Encoded bytes are flushed downstream in chunks of roughly this size.
const CHUNK_BYTES: usize = 32 * 1024;

/// Byte chunks in flight between the encoder and the HTTP writer.
const BYTE_CHANNEL_CAPACITY: usize = 8;

/// Launch the full pipeline for a job and return the byte channel feeding
/// the response body. The spawned supervisor applies the terminal job status
/// and, on failure, pushes an error frame so the body stream aborts.
pub fn start_export(
    pool: PgPool,
    registry: Arc<JobRegistry>,
    job: &ExportJob,
    row_cap: Option<u64>,
) -> Result<mpsc::Receiver<Result<Bytes, io::Error>>, ExportError> {
    let request = &job.request;
    let plan = ProjectionPlan::new(&request.columns)?;
    let encoder = encoder_for(request)?;
    let source = RecordCursorSource::new(
        pool,
        plan,
        request.format.fetch_batch_size(),
        row_cap,
    );

    let (channel, rx) = ChannelSink::new(BYTE_CHANNEL_CAPACITY);
    let reporter = channel.clone();
    let sink: Box<dyn ByteSink> = match request.compression {
        Some(Compression::Gzip) => Box::new(GzipSink::new(channel)),
        None => Box::new(channel),
    };

    let job_id = job.id;
    info!(job = %job_id, source = source.name(), format = ?request.format, "export stream starting");
    tokio::spawn(async move {
        match run_export(Box::new(source), encoder, sink).await {
            Ok(rows) => {
                info!(job = %job_id, rows, "export completed");
                registry.update_status(&job_id, JobStatus::Completed, None);
            }
            Err(e) => {
                if e.is_disconnect() {
                    info!(job = %job_id, "client disconnected mid-stream");
                } else {
                    warn!(job = %job_id, error = %e, "export failed");
                }
                reporter.abort(e.to_string()).await;
                registry.update_status(&job_id, JobStatus::Failed, Some(e.job_cause()));
            }
        }
    });

    Ok(rx)
}

/// Run one export to completion. Returns the number of rows emitted.
///
/// The source runs as its own task behind a one-batch channel; everything
/// else happens inline so sink backpressure reaches the cursor untouched.
pub async fn run_export(
    mut source: Box<dyn RowSource>,
    mut encoder: Box<dyn RowEncoder>,
    mut sink: Box<dyn ByteSink>,
) -> Result<u64, ExportError> {
    let cancel = CancellationToken::new();
    let (batch_tx, mut batch_rx) = mpsc::channel(1);
    let source_cancel = cancel.child_token();
    let source_task = tokio::spawn(async move { source.run(batch_tx, source_cancel).await });

    let pump_result = pump(encoder.as_mut(), &mut batch_rx, sink.as_mut()).await;

    // Whatever happened downstream, the source must wind down and release
    // its cursor before this export is accounted for.
    cancel.cancel();
    batch_rx.close();
    drop(batch_rx);
    let source_result = match source_task.await {
        Ok(result) => result,
        Err(e) => Err(ExportError::Cursor(anyhow::anyhow!("source task panicked: {e}"))),
    };

    match (pump_result, source_result) {
        (Ok(rows), Ok(())) => Ok(rows),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        // Keep the disconnect cause when the sink died; otherwise the
        // upstream failure is the root cause.
        (Err(pump_err), Err(source_err)) => {
            if matches!(pump_err, ExportError::Sink { .. }) {
                Err(pump_err)
            } else {
                Err(source_err)
            }
        }
    }
}

async fn pump(
    encoder: &mut dyn RowEncoder,
    rx: &mut BatchRx,
    sink: &mut dyn ByteSink,
) -> Result<u64, ExportError> {
    // Nothing is emitted until the source proves it can deliver, so setup
    // failures surface while the response can still be a clean 500.
    let mut msg = next_message(rx).await?;

    let mut buf = Vec::with_capacity(CHUNK_BYTES * 2);
    encoder.start(&mut buf)?;
    let mut rows: u64 = 0;
    loop {
        match msg {
            Message::Batch(batch) => {
                for row in &batch {
                    encoder.encode_row(row, &mut buf)?;
                    if buf.len() >= CHUNK_BYTES {
                        flush(sink, &mut buf).await?;
                    }
                }
                rows += batch.len() as u64;
                flush(sink, &mut buf).await?;
                // Let sibling exports and the health probe run between batches.
                tokio::task::yield_now().await;
            }
            Message::Eos => break,
        }
        msg = next_message(rx).await?;
    }
    encoder.finish(&mut buf)?;
    flush(sink, &mut buf).await?;
    sink.finish().await?;
    Ok(rows)
}

async fn next_message(rx: &mut BatchRx) -> Result<Message, ExportError> {
    rx.recv().await.ok_or_else(|| {
        ExportError::Cursor(anyhow::anyhow!("row source ended before end-of-stream"))
    })
}

async fn flush(sink: &mut dyn ByteSink, buf: &mut Vec<u8>) -> Result<(), ExportError> {
    if buf.is_empty() {
        return Ok(());
    }
    sink.write(Bytes::from(std::mem::take(buf))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use xport_core::{BatchTx, ColumnMapping, RowBatch, Value};
    use xport_encode::{CsvEncoder, JsonEncoder};

    struct StubSource {
        batches: Vec<RowBatch>,
    }

    #[async_trait]
    impl RowSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn run(
            &mut self,
            tx: BatchTx,
            _cancel: CancellationToken,
        ) -> Result<(), ExportError> {
            for batch in self.batches.drain(..) {
                if tx.send(Message::Batch(batch)).await.is_err() {
                    return Ok(());
                }
            }
            let _ = tx.send(Message::Eos).await;
            Ok(())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RowSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run(
            &mut self,
            _tx: BatchTx,
            _cancel: CancellationToken,
        ) -> Result<(), ExportError> {
            Err(ExportError::Cursor(anyhow::anyhow!("connection refused")))
        }
    }

    /// Stub with the cursor source's row-cap discipline: the batch that
    /// reaches the limit is truncated and nothing more is produced.
    struct CappedSource {
        batches: Vec<RowBatch>,
        limit: u64,
    }

    #[async_trait]
    impl RowSource for CappedSource {
        fn name(&self) -> &str {
            "capped"
        }

        async fn run(
            &mut self,
            tx: BatchTx,
            _cancel: CancellationToken,
        ) -> Result<(), ExportError> {
            let mut sent: u64 = 0;
            for mut batch in self.batches.drain(..) {
                let remaining = self.limit.saturating_sub(sent);
                let at_cap = batch.len() as u64 >= remaining;
                if at_cap {
                    batch.truncate(remaining as usize);
                }
                sent += batch.len() as u64;
                if !batch.is_empty() && tx.send(Message::Batch(batch)).await.is_err() {
                    return Ok(());
                }
                if at_cap {
                    break;
                }
            }
            let _ = tx.send(Message::Eos).await;
            Ok(())
        }
    }

    /// Produces batches until the downstream hangs up or it is cancelled.
    struct EndlessSource;

    #[async_trait]
    impl RowSource for EndlessSource {
        fn name(&self) -> &str {
            "endless"
        }

        async fn run(
            &mut self,
            tx: BatchTx,
            cancel: CancellationToken,
        ) -> Result<(), ExportError> {
            let mut next = 0i64;
            loop {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let batch: RowBatch = (0..100).map(|i| vec![Value::Int(next + i)]).collect();
                next += 100;
                if tx.send(Message::Batch(batch)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    fn csv_columns(pairs: &[(&str, &str)]) -> Vec<ColumnMapping> {
        pairs
            .iter()
            .map(|(s, t)| ColumnMapping {
                source: s.to_string(),
                target: t.to_string(),
            })
            .collect()
    }

    async fn drain(mut rx: mpsc::Receiver<Result<Bytes, io::Error>>) -> Vec<u8> {
        let mut collected = Vec::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Ok(bytes) => collected.extend_from_slice(&bytes),
                Err(_) => break,
            }
        }
        collected
    }

    #[tokio::test]
    async fn csv_flows_end_to_end() {
        let source = StubSource {
            batches: vec![vec![vec![Value::Int(1), Value::Text("Record_1".into())]]],
        };
        let encoder = CsvEncoder::new(&csv_columns(&[("id", "ID"), ("name", "Name")]));
        let (sink, rx) = ChannelSink::new(8);

        let rows = run_export(Box::new(source), Box::new(encoder), Box::new(sink))
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(drain(rx).await, b"ID,Name\n1,Record_1\n");
    }

    #[tokio::test]
    async fn rows_keep_source_order_across_batches() {
        let batches: Vec<RowBatch> = (0..4)
            .map(|b| (0..10).map(|i| vec![Value::Int(b * 10 + i)]).collect())
            .collect();
        let source = StubSource { batches };
        let encoder = JsonEncoder::new(&csv_columns(&[("id", "id")]));
        let (sink, rx) = ChannelSink::new(8);

        let rows = run_export(Box::new(source), Box::new(encoder), Box::new(sink))
            .await
            .unwrap();
        assert_eq!(rows, 40);

        let body = String::from_utf8(drain(rx).await).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        let ids: Vec<i64> = parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn row_cap_truncates_the_stream_mid_batch() {
        let batches: Vec<RowBatch> = (0..4)
            .map(|b| (0..10).map(|i| vec![Value::Int(b * 10 + i)]).collect())
            .collect();
        let source = CappedSource { batches, limit: 25 };
        let encoder = JsonEncoder::new(&csv_columns(&[("id", "id")]));
        let (sink, rx) = ChannelSink::new(8);

        let rows = run_export(Box::new(source), Box::new(encoder), Box::new(sink))
            .await
            .unwrap();
        assert_eq!(rows, 25);

        let body = String::from_utf8(drain(rx).await).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        let ids: Vec<i64> = parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, (0..25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_stream_still_frames_the_output() {
        let source = StubSource { batches: vec![] };
        let encoder = JsonEncoder::new(&csv_columns(&[("id", "id")]));
        let (sink, rx) = ChannelSink::new(8);

        let rows = run_export(Box::new(source), Box::new(encoder), Box::new(sink))
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert_eq!(drain(rx).await, b"[\n\n]");
    }

    #[tokio::test]
    async fn setup_failure_emits_no_bytes() {
        let encoder = CsvEncoder::new(&csv_columns(&[("id", "ID")]));
        let (sink, rx) = ChannelSink::new(8);

        let err = run_export(Box::new(FailingSource), Box::new(encoder), Box::new(sink))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Cursor(_)));
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn client_disconnect_fails_the_export_and_stops_the_source() {
        let encoder = CsvEncoder::new(&csv_columns(&[("id", "id")]));
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);

        let err = run_export(Box::new(EndlessSource), Box::new(encoder), Box::new(sink))
            .await
            .unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(err.job_cause(), xport_core::CLIENT_DISCONNECTED);
    }
}
