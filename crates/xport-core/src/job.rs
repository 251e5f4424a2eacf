//! Export requests, job descriptors, and the in-process job registry.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::ExportError;

/// Attributes of the `records` table; the allow-list every column `source`
/// is validated against before it reaches SQL.
pub const RECORD_SOURCES: [&str; 5] = ["id", "created_at", "name", "value", "metadata"];

/// One `(source, target)` column renaming. Order across a request fixes
/// emission order in every format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source: String,
    pub target: String,
}

/// The four supported serialization formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Xml,
    Parquet,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Xml => "xml",
            ExportFormat::Parquet => "parquet",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Xml => "application/xml",
            ExportFormat::Parquet => "application/octet-stream",
        }
    }

    /// Cursor fetch size: text formats pull smaller batches than columnar,
    /// which fetches one row group at a time.
    pub fn fetch_batch_size(self) -> usize {
        match self {
            ExportFormat::Parquet => 50_000,
            _ => 10_000,
        }
    }
}

/// Optional stream compression. `gzip` is the only recognized scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
}

/// A validated export request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub columns: Vec<ColumnMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
}

impl ExportRequest {
    /// Check the invariants serde cannot: non-empty columns, non-empty
    /// source/target, sources drawn from the record attribute allow-list.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.columns.is_empty() {
            return Err(ExportError::InvalidRequest(
                "columns must not be empty".to_string(),
            ));
        }
        for mapping in &self.columns {
            if mapping.target.is_empty() {
                return Err(ExportError::InvalidRequest(format!(
                    "empty target for source '{}'",
                    mapping.source
                )));
            }
            if !RECORD_SOURCES.contains(&mapping.source.as_str()) {
                return Err(ExportError::InvalidRequest(format!(
                    "unknown column source '{}'",
                    mapping.source
                )));
            }
        }
        Ok(())
    }
}

/// Lifecycle of one export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Legal transitions only: pending→in_progress, in_progress→completed,
    /// in_progress→failed. Terminal states never move.
    pub fn can_transition(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }
}

/// Descriptor of one export job, owned by the registry for process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    pub id: Uuid,
    #[serde(skip)]
    pub request: ExportRequest,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// In-process mapping from job identifier to descriptor.
///
/// A mutex-protected map is all the serialization the registry needs; there
/// is no eviction policy in the core.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, ExportJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated request under a fresh identifier.
    pub fn create(&self, request: ExportRequest) -> ExportJob {
        let job = ExportJob {
            id: Uuid::new_v4(),
            request,
            status: JobStatus::Pending,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs
            .lock()
            .expect("job registry lock")
            .insert(job.id, job.clone());
        job
    }

    pub fn get(&self, id: &Uuid) -> Option<ExportJob> {
        self.jobs.lock().expect("job registry lock").get(id).cloned()
    }

    /// Number of jobs registered over the process lifetime.
    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a status transition, recording the error message and completion
    /// time where applicable. Illegal transitions are warned and ignored;
    /// returns whether the update was applied.
    pub fn update_status(&self, id: &Uuid, next: JobStatus, error: Option<String>) -> bool {
        let mut jobs = self.jobs.lock().expect("job registry lock");
        let Some(job) = jobs.get_mut(id) else {
            warn!(job = %id, "status update for unknown job");
            return false;
        };
        if !job.status.can_transition(next) {
            warn!(job = %id, from = ?job.status, to = ?next, "illegal job status transition ignored");
            return false;
        }
        job.status = next;
        job.error = error;
        if matches!(next, JobStatus::Completed | JobStatus::Failed) {
            job.completed_at = Some(Utc::now());
        }
        true
    }
}
