//! Projection planning and database value coercion.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::Row;

use xport_core::{ColumnMapping, ExportError, ProjectedRow, Value, RECORD_SOURCES};

/// Scale of the `value` column, `DECIMAL(18,4)` in the records schema.
const VALUE_SCALE: u32 = 4;

/// Precomputed projection: which source columns to select and, per mapping
/// entry, which selected column feeds it.
///
/// Duplicate sources are selected once; the slot table fans them back out so
/// projection stays one clone per output column.
#[derive(Debug, Clone)]
pub struct ProjectionPlan {
    select_columns: Vec<String>,
    slots: Vec<usize>,
}

impl ProjectionPlan {
    /// Build a plan from a column mapping, re-checking the source allow-list
    /// so nothing unvalidated can reach SQL text.
    pub fn new(columns: &[ColumnMapping]) -> Result<Self, ExportError> {
        if columns.is_empty() {
            return Err(ExportError::InvalidRequest(
                "columns must not be empty".to_string(),
            ));
        }
        let mut select_columns: Vec<String> = Vec::new();
        let mut slots = Vec::with_capacity(columns.len());
        for mapping in columns {
            if !RECORD_SOURCES.contains(&mapping.source.as_str()) {
                return Err(ExportError::InvalidRequest(format!(
                    "unknown column source '{}'",
                    mapping.source
                )));
            }
            let idx = match select_columns.iter().position(|c| c == &mapping.source) {
                Some(idx) => idx,
                None => {
                    select_columns.push(mapping.source.clone());
                    select_columns.len() - 1
                }
            };
            slots.push(idx);
        }
        Ok(Self {
            select_columns,
            slots,
        })
    }

    /// The projected scan. Only allow-listed identifiers are interpolated.
    pub fn select_sql(&self) -> String {
        format!("SELECT {} FROM records", self.select_columns.join(", "))
    }

    pub fn select_columns(&self) -> &[String] {
        &self.select_columns
    }

    /// Fan decoded columns out into mapping order.
    pub fn project(&self, decoded: &[Value]) -> ProjectedRow {
        self.slots.iter().map(|&idx| decoded[idx].clone()).collect()
    }
}

/// Decode one fetched row into the value model, one entry per selected
/// source column. SQL NULL coerces to [`Value::Null`].
pub fn decode_row(row: &PgRow, sources: &[String]) -> Result<Vec<Value>, ExportError> {
    let mut decoded = Vec::with_capacity(sources.len());
    for (idx, source) in sources.iter().enumerate() {
        let value = match source.as_str() {
            "id" => row
                .try_get::<Option<i64>, _>(idx)
                .map(|v| v.map_or(Value::Null, Value::Int)),
            "created_at" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .map(|v| v.map_or(Value::Null, Value::Timestamp)),
            "name" => row
                .try_get::<Option<String>, _>(idx)
                .map(|v| v.map_or(Value::Null, Value::Text)),
            "value" => row.try_get::<Option<Decimal>, _>(idx).map(|v| {
                v.map_or(Value::Null, |mut d| {
                    d.rescale(VALUE_SCALE);
                    Value::Decimal(d)
                })
            }),
            "metadata" => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .map(|v| v.map_or(Value::Null, Value::from_json)),
            other => {
                return Err(ExportError::Cursor(anyhow::anyhow!(
                    "unprojectable source column '{other}'"
                )))
            }
        };
        decoded.push(value.map_err(|e| ExportError::Cursor(e.into()))?);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, &str)]) -> Vec<ColumnMapping> {
        pairs
            .iter()
            .map(|(s, t)| ColumnMapping {
                source: s.to_string(),
                target: t.to_string(),
            })
            .collect()
    }

    #[test]
    fn plan_keeps_mapping_order_and_dedupes_sources() {
        let plan =
            ProjectionPlan::new(&mapping(&[("name", "N1"), ("id", "ID"), ("name", "N2")])).unwrap();
        assert_eq!(plan.select_sql(), "SELECT name, id FROM records");

        let projected = plan.project(&[Value::Text("n".into()), Value::Int(7)]);
        assert_eq!(
            projected,
            vec![Value::Text("n".into()), Value::Int(7), Value::Text("n".into())]
        );
    }

    #[test]
    fn plan_rejects_unvalidated_source() {
        let err = ProjectionPlan::new(&mapping(&[("id; DROP TABLE records", "x")])).unwrap_err();
        assert!(matches!(err, ExportError::InvalidRequest(_)));
    }

    #[test]
    fn plan_rejects_empty_mapping() {
        assert!(ProjectionPlan::new(&[]).is_err());
    }
}
