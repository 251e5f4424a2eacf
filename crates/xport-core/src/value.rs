//! Tagged value model carried through the export pipeline.
//!
//! The coercer in `xport-io` is the only place that interprets database driver
//! types; everything downstream pattern-matches on [`Value`].

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// One coerced database value.
///
/// Fixed-point numbers keep their [`Decimal`] representation so canonical
/// text (trailing zeros included) is produced at encode time. Nested JSONB
/// documents are re-expressed recursively over the same variant set.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Text(String),
    List(Vec<Value>),
    Document(Vec<(String, Value)>),
}

impl Value {
    /// Coerce a parsed JSONB document into the value model.
    ///
    /// Integral numbers become `Int`; every other number becomes `Decimal`,
    /// matching the model's deliberate exclusion of floats. A number that
    /// fits neither (non-finite) degrades to its textual form.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(d) = n.as_f64().and_then(Decimal::from_f64) {
                    Value::Decimal(d)
                } else {
                    Value::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Document(
                map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect(),
            ),
        }
    }

    /// Re-express the value as JSON.
    ///
    /// Decimals and timestamps serialize as strings so their canonical text
    /// survives parsers that would otherwise round them.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::Timestamp(ts) => serde_json::Value::String(format_timestamp(ts)),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Document(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// True for the scalar variants (everything but `List` and `Document`).
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Document(_))
    }
}

/// Canonical timestamp text: ISO-8601 extended, microseconds, zone offset.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}
