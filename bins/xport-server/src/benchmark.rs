//! Benchmark harness: one full-table export per format to a scratch file,
//! timed and memory-sampled.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::postgres::PgPool;
use tracing::{info, warn};

use xport_core::{ColumnMapping, ExportError, ExportFormat, ExportRequest, RECORD_SOURCES};
use xport_encode::encoder_for;
use xport_io::coerce::ProjectionPlan;
use xport_io::sink::FileSink;
use xport_io::source_cursor::RecordCursorSource;

use crate::driver;
use crate::mem::PeakSampler;

const FORMATS: [ExportFormat; 4] = [
    ExportFormat::Csv,
    ExportFormat::Json,
    ExportFormat::Xml,
    ExportFormat::Parquet,
];

/// Pause before each run so OS memory counters settle between formats.
const SETTLE: Duration = Duration::from_millis(150);
const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReport {
    pub dataset_row_count: i64,
    pub results: BTreeMap<&'static str, FormatResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatResult {
    pub duration_seconds: f64,
    pub file_size_bytes: u64,
    pub peak_memory_mb: f64,
    pub rows: u64,
}

/// Run every format sequentially. A single format's failure is logged and
/// its entry omitted from the results; the whole benchmark fails only when
/// all four do.
pub async fn run(pool: &PgPool, row_cap: Option<u64>) -> Result<BenchmarkReport, ExportError> {
    let dataset_row_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(pool)
        .await
        .map_err(|e| ExportError::Cursor(e.into()))?;

    let mut results = BTreeMap::new();
    let mut failures = 0;
    for format in FORMATS {
        match run_format(pool, format, row_cap).await {
            Ok(result) => {
                info!(format = format.extension(), seconds = result.duration_seconds, "benchmark format done");
                results.insert(format.extension(), result);
            }
            Err(e) => {
                warn!(format = format.extension(), error = %e, "benchmark format failed");
                failures += 1;
            }
        }
    }

    if failures == FORMATS.len() {
        return Err(ExportError::Encoder(anyhow::anyhow!(
            "all benchmark formats failed"
        )));
    }
    Ok(BenchmarkReport {
        dataset_row_count,
        results,
    })
}

async fn run_format(
    pool: &PgPool,
    format: ExportFormat,
    row_cap: Option<u64>,
) -> Result<FormatResult, ExportError> {
    let request = ExportRequest {
        format,
        columns: RECORD_SOURCES
            .iter()
            .map(|source| ColumnMapping {
                source: source.to_string(),
                target: source.to_string(),
            })
            .collect(),
        compression: None,
    };
    let plan = ProjectionPlan::new(&request.columns)?;
    let encoder = encoder_for(&request)?;
    let source = RecordCursorSource::new(
        pool.clone(),
        plan,
        format.fetch_batch_size(),
        row_cap,
    );

    // The guard removes the scratch file on every exit path.
    let scratch = tempfile::NamedTempFile::new().map_err(|e| ExportError::Sink {
        cause: e.to_string(),
    })?;
    let file = scratch.reopen().map_err(|e| ExportError::Sink {
        cause: e.to_string(),
    })?;

    tokio::time::sleep(SETTLE).await;
    let sampler = PeakSampler::start(SAMPLE_INTERVAL);
    let started = Instant::now();

    let run = driver::run_export(
        Box::new(source),
        encoder,
        Box::new(FileSink::new(file)),
    )
    .await;

    let elapsed = started.elapsed();
    let peak_bytes = sampler.stop().await;
    let rows = run?;

    let file_size_bytes = scratch
        .as_file()
        .metadata()
        .map_err(|e| ExportError::Sink {
            cause: e.to_string(),
        })?
        .len();

    Ok(FormatResult {
        duration_seconds: round2(elapsed.as_secs_f64()),
        file_size_bytes,
        peak_memory_mb: round2(peak_bytes as f64 / (1024.0 * 1024.0)),
        rows,
    })
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
