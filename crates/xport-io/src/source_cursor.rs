//! Server-side cursor row source over the `records` table.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use xport_core::{BatchTx, ExportError, Message, RowBatch, RowSource};

use crate::coerce::{self, ProjectionPlan};

/// Streams projected rows out of Postgres through a uniquely named
/// `NO SCROLL` cursor, one `FETCH` batch at a time.
///
/// The transaction lives exactly as long as `run`: on every exit path the
/// cursor is closed and the transaction committed before `Eos` is emitted,
/// and an abandoned transaction rolls back on drop, which also returns the
/// connection to the pool.
pub struct RecordCursorSource {
    pool: PgPool,
    plan: ProjectionPlan,
    batch_size: usize,
    row_limit: Option<u64>,
}

impl RecordCursorSource {
    pub fn new(
        pool: PgPool,
        plan: ProjectionPlan,
        batch_size: usize,
        row_limit: Option<u64>,
    ) -> Self {
        Self {
            pool,
            plan,
            batch_size,
            row_limit,
        }
    }

    async fn pump(
        &self,
        dbtx: &mut Transaction<'static, Postgres>,
        cursor: &str,
        tx: &BatchTx,
        cancel: &CancellationToken,
    ) -> Result<(), ExportError> {
        let declare = format!(
            "DECLARE {} NO SCROLL CURSOR FOR {}",
            cursor,
            self.plan.select_sql()
        );
        sqlx::query(&declare)
            .execute(&mut **dbtx)
            .await
            .map_err(|e| ExportError::Cursor(e.into()))?;

        let fetch = format!("FETCH {} FROM {}", self.batch_size, cursor);
        let mut sent: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                info!("cursor source cancelled");
                break;
            }
            let rows = sqlx::query(&fetch)
                .fetch_all(&mut **dbtx)
                .await
                .map_err(|e| ExportError::Cursor(e.into()))?;
            if rows.is_empty() {
                break;
            }

            let mut batch: RowBatch = Vec::with_capacity(rows.len());
            for row in &rows {
                let decoded = coerce::decode_row(row, self.plan.select_columns())?;
                batch.push(self.plan.project(&decoded));
            }

            let at_cap = cap_batch(&mut batch, sent, self.row_limit);
            sent += batch.len() as u64;
            debug!(rows = batch.len(), total = sent, "fetched batch");

            if !batch.is_empty() && tx.send(Message::Batch(batch)).await.is_err() {
                // Downstream hung up; stop fetching and release.
                break;
            }
            if at_cap {
                info!(rows = sent, "row cap reached");
                break;
            }
        }
        Ok(())
    }
}

/// Truncate `batch` so `sent + batch.len()` never exceeds `limit`.
/// Returns true once the cap is reached.
fn cap_batch(batch: &mut RowBatch, sent: u64, limit: Option<u64>) -> bool {
    let Some(limit) = limit else {
        return false;
    };
    let remaining = limit.saturating_sub(sent);
    if (batch.len() as u64) < remaining {
        return false;
    }
    batch.truncate(remaining as usize);
    true
}

#[async_trait]
impl RowSource for RecordCursorSource {
    fn name(&self) -> &str {
        "record-cursor"
    }

    async fn run(&mut self, tx: BatchTx, cancel: CancellationToken) -> Result<(), ExportError> {
        let mut dbtx = self
            .pool
            .begin()
            .await
            .map_err(|e| ExportError::Cursor(e.into()))?;
        let cursor = format!("xport_cur_{}", Uuid::new_v4().simple());
        info!(cursor = %cursor, batch = self.batch_size, "cursor opened");

        let result = self.pump(&mut dbtx, &cursor, &tx, &cancel).await;

        // Guaranteed release, in order, no matter how the pump ended: close
        // the cursor, commit, hand the connection back to the pool.
        if let Err(e) = sqlx::query(&format!("CLOSE {cursor}"))
            .execute(&mut *dbtx)
            .await
        {
            debug!(error = %e, "cursor close skipped");
        }
        if let Err(e) = dbtx.commit().await {
            warn!(error = %e, "cursor transaction commit failed");
        }

        result?;
        // Resources are released before the encoder is allowed to finalize.
        let _ = tx.send(Message::Eos).await;
        Ok(())
    }
}
