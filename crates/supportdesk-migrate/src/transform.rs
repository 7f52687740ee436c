//! Record transformation.
//!
//! Turns a raw document into a flat, type-normalized row following the
//! column declarations of its [`EntityTypeSpec`]:
//!
//! - objects and arrays become JSON strings, `null`/absent stays NULL
//! - booleans become `1` / `0`
//! - timestamps (native dates or ISO-8601 strings) become
//!   `YYYY-MM-DD HH:MM:SS` in UTC
//! - enum values outside their domain fall back to a documented default,
//!   and every fallback is reported
//! - keys that are not declared columns are dropped
//!
//! Transformation is pure: the same record always yields the same row.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::registry::{ColumnKind, ColumnSpec, EntityTypeSpec};

/// An untyped document as returned by the source store.
pub type RawRecord = Map<String, Value>;

/// Canonical timestamp format written to the target.
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Epoch values above this are treated as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// A scalar accepted by the target store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CanonicalValue {
    /// SQL NULL.
    Null,
    /// Plain text.
    Text(String),
    /// Integer (booleans are stored as `1`/`0`).
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Canonical `YYYY-MM-DD HH:MM:SS` timestamp.
    Timestamp(String),
    /// JSON-encoded nested structure.
    Json(String),
}

impl CanonicalValue {
    /// Returns true for NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for NULL or an empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) | Self::Timestamp(s) | Self::Json(s) => s.is_empty(),
            Self::Integer(_) | Self::Float(_) => false,
        }
    }

    /// Text form used when binding parameters, `None` for NULL.
    #[must_use]
    pub fn as_sql_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) | Self::Timestamp(s) | Self::Json(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
        }
    }
}

impl fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_sql_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

/// A flat row ready for insertion, columns in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalRow {
    columns: Vec<(String, CanonicalValue)>,
}

impl CanonicalRow {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column value.
    pub fn push(&mut self, column: impl Into<String>, value: CanonicalValue) {
        self.columns.push((column.into(), value));
    }

    /// Value of a column.
    pub fn get(&self, column: &str) -> Option<&CanonicalValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CanonicalValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Keeps only the columns accepted by `keep`, returning the dropped names.
    pub fn retain_columns(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let mut dropped = Vec::new();
        self.columns.retain(|(name, _)| {
            let retained = keep(name);
            if !retained {
                dropped.push(name.clone());
            }
            retained
        });
        dropped
    }

    /// JSON object view used in logs.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .columns
            .iter()
            .map(|(name, value)| {
                let json = serde_json::to_value(value).unwrap_or(Value::Null);
                (name.clone(), json)
            })
            .collect();
        Value::Object(map)
    }
}

/// An enum value replaced by its fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackApplied {
    /// Target column.
    pub column: String,
    /// Value found in the source.
    pub original: String,
    /// Value written instead.
    pub fallback: String,
}

/// Result of transforming one record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    /// The canonical row.
    pub row: CanonicalRow,
    /// Enum fallbacks applied while building the row.
    pub fallbacks: Vec<FallbackApplied>,
}

/// Transforms records for a set of entity types.
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    specs: HashMap<String, EntityTypeSpec>,
}

impl TransformRegistry {
    /// Creates a registry over the given entity types.
    pub fn new(specs: &[EntityTypeSpec]) -> Self {
        Self {
            specs: specs
                .iter()
                .map(|spec| (spec.name.clone(), spec.clone()))
                .collect(),
        }
    }

    /// Transforms a record of the named entity type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown entity type and
    /// [`Error::RowTransform`] when the record cannot be coerced.
    pub fn transform(&self, entity: &str, record: &RawRecord) -> Result<TransformOutcome> {
        let spec = self
            .specs
            .get(entity)
            .ok_or_else(|| Error::Config(format!("unknown entity type '{}'", entity)))?;
        transform_record(spec, record)
    }
}

/// Transforms one record according to `spec`.
///
/// # Errors
///
/// Returns [`Error::RowTransform`] when the primary key is missing or a value
/// cannot be coerced to its column kind.
pub fn transform_record(spec: &EntityTypeSpec, record: &RawRecord) -> Result<TransformOutcome> {
    let key = record_key(spec, record);
    let mut row = CanonicalRow::new();
    let mut fallbacks = Vec::new();

    for column in &spec.columns {
        let raw = lookup(record, &column.source).unwrap_or(&Value::Null);
        let value = coerce_column(column, raw, &mut fallbacks)
            .map_err(|reason| Error::row_transform(&spec.name, &key, &column.source, reason))?;
        row.push(column.column_name(), value);
    }

    match row.get(&spec.primary_key) {
        Some(value) if !value.is_empty() => {}
        _ => {
            let field = spec
                .primary_key_column()
                .map_or(spec.primary_key.as_str(), |c| c.source.as_str());
            return Err(Error::row_transform(
                &spec.name,
                &key,
                field,
                "primary key is missing",
            ));
        }
    }

    Ok(TransformOutcome { row, fallbacks })
}

/// Best-effort display of a record's primary key for error messages.
pub fn record_key(spec: &EntityTypeSpec, record: &RawRecord) -> String {
    spec.primary_key_column()
        .and_then(|c| lookup(record, &c.source))
        .and_then(|v| coerce_generic(v).ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| "<unknown>".to_string(), |v| v.to_string())
}

/// Finds a field by exact key, then by dotted path.
pub fn lookup<'a>(record: &'a RawRecord, path: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }

    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Formats a UTC instant in the canonical timestamp form.
pub fn canonical_timestamp(instant: &DateTime<Utc>) -> String {
    instant.format(CANONICAL_TIMESTAMP_FORMAT).to_string()
}

/// Parses an ISO-8601 date-time string.
///
/// Accepts RFC 3339 (any offset, converted to UTC) and naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` / `YYYY-MM-DD HH:MM:SS[.fff]`, which are
/// taken as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_date_only(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD.unsigned_abs() {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// Scalars that document stores wrap in objects.
#[derive(Debug, PartialEq)]
enum NativeScalar {
    Timestamp(DateTime<Utc>),
    Text(String),
    Integer(i64),
    Float(f64),
}

fn native_scalar(map: &Map<String, Value>) -> Option<std::result::Result<NativeScalar, String>> {
    if map.len() == 1 {
        let (key, value) = map.iter().next()?;
        return match key.as_str() {
            "$oid" => Some(
                value
                    .as_str()
                    .map(|s| NativeScalar::Text(s.to_string()))
                    .ok_or_else(|| "has a non-string $oid".to_string()),
            ),
            "$date" => Some(native_date(value)),
            "$numberLong" | "$numberInt" => Some(
                value
                    .as_str()
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(NativeScalar::Integer)
                    .ok_or_else(|| format!("has an invalid {}", key)),
            ),
            "$numberDouble" => Some(
                value
                    .as_str()
                    .and_then(|s| s.parse::<f64>().ok())
                    .filter(|f| f.is_finite())
                    .map(NativeScalar::Float)
                    .ok_or_else(|| "has a non-finite $numberDouble".to_string()),
            ),
            "$numberDecimal" => Some(
                value
                    .as_str()
                    .map(|s| NativeScalar::Text(s.to_string()))
                    .ok_or_else(|| "has a non-string $numberDecimal".to_string()),
            ),
            _ => None,
        };
    }

    if map.len() == 2 {
        for (secs_key, nanos_key) in [("_seconds", "_nanoseconds"), ("seconds", "nanoseconds")] {
            if let (Some(secs), Some(nanos)) = (map.get(secs_key), map.get(nanos_key)) {
                let parsed = secs
                    .as_i64()
                    .zip(nanos.as_u64())
                    .and_then(|(s, n)| DateTime::from_timestamp(s, u32::try_from(n).ok()?))
                    .map(NativeScalar::Timestamp)
                    .ok_or_else(|| "has an invalid native timestamp".to_string());
                return Some(parsed);
            }
        }
    }

    None
}

fn native_date(value: &Value) -> std::result::Result<NativeScalar, String> {
    let parsed = match value {
        Value::String(s) => parse_datetime(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::Object(inner) => inner
            .get("$numberLong")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    parsed
        .map(NativeScalar::Timestamp)
        .ok_or_else(|| "has an invalid $date".to_string())
}

fn native_to_canonical(native: NativeScalar) -> CanonicalValue {
    match native {
        NativeScalar::Timestamp(dt) => CanonicalValue::Timestamp(canonical_timestamp(&dt)),
        NativeScalar::Text(s) => CanonicalValue::Text(s),
        NativeScalar::Integer(i) => CanonicalValue::Integer(i),
        NativeScalar::Float(f) => CanonicalValue::Float(f),
    }
}

fn number_value(n: &serde_json::Number) -> CanonicalValue {
    if let Some(i) = n.as_i64() {
        CanonicalValue::Integer(i)
    } else if n.is_u64() {
        // Beyond i64: keep every digit.
        CanonicalValue::Text(n.to_string())
    } else {
        n.as_f64()
            .map_or(CanonicalValue::Null, CanonicalValue::Float)
    }
}

fn encode_json(value: &Value) -> std::result::Result<CanonicalValue, String> {
    serde_json::to_string(value)
        .map(CanonicalValue::Json)
        .map_err(|e| format!("cannot be serialized to JSON: {}", e))
}

/// Type-agnostic coercion shared by every column kind.
fn coerce_generic(value: &Value) -> std::result::Result<CanonicalValue, String> {
    match value {
        Value::Null => Ok(CanonicalValue::Null),
        Value::Bool(b) => Ok(CanonicalValue::Integer(i64::from(*b))),
        Value::Number(n) => Ok(number_value(n)),
        Value::String(s) => Ok(parse_datetime(s).map_or_else(
            || CanonicalValue::Text(s.clone()),
            |dt| CanonicalValue::Timestamp(canonical_timestamp(&dt)),
        )),
        Value::Object(map) => match native_scalar(map) {
            Some(native) => native.map(native_to_canonical),
            None => encode_json(value),
        },
        Value::Array(_) => encode_json(value),
    }
}

fn coerce_column(
    column: &ColumnSpec,
    value: &Value,
    fallbacks: &mut Vec<FallbackApplied>,
) -> std::result::Result<CanonicalValue, String> {
    match &column.kind {
        ColumnKind::Text => coerce_generic(value),
        ColumnKind::Integer => coerce_integer(value),
        ColumnKind::Float => coerce_float(value),
        ColumnKind::Boolean => coerce_boolean(value),
        ColumnKind::Timestamp => coerce_timestamp(value),
        ColumnKind::Json => coerce_json(value),
        ColumnKind::Enum { values, fallback } => {
            coerce_enum(column.column_name(), values, fallback, value, fallbacks)
        }
    }
}

fn coerce_integer(value: &Value) -> std::result::Result<CanonicalValue, String> {
    let from_float = |f: f64| {
        integral(f)
            .map(CanonicalValue::Integer)
            .ok_or_else(|| format!("'{}' is not an integer", f))
    };

    match coerce_generic(value)? {
        CanonicalValue::Float(f) => from_float(f),
        CanonicalValue::Text(s) if s.trim().is_empty() => Ok(CanonicalValue::Null),
        CanonicalValue::Text(s) => match s.trim().parse::<i64>() {
            Ok(i) => Ok(CanonicalValue::Integer(i)),
            Err(_) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("'{}' is not an integer", s))
                .and_then(from_float),
        },
        CanonicalValue::Json(_) | CanonicalValue::Timestamp(_) => {
            Err(format!("{} is not an integer", value))
        }
        other => Ok(other),
    }
}

fn coerce_float(value: &Value) -> std::result::Result<CanonicalValue, String> {
    match coerce_generic(value)? {
        CanonicalValue::Integer(i) => Ok(CanonicalValue::Float(i as f64)),
        CanonicalValue::Text(s) if s.trim().is_empty() => Ok(CanonicalValue::Null),
        CanonicalValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(CanonicalValue::Float)
            .ok_or_else(|| format!("'{}' is not a number", s)),
        CanonicalValue::Json(_) | CanonicalValue::Timestamp(_) => {
            Err(format!("{} is not a number", value))
        }
        other => Ok(other),
    }
}

/// The integer value of a float with no fractional part.
fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f.abs() < 9.0e18).then_some(f as i64)
}

fn coerce_boolean(value: &Value) -> std::result::Result<CanonicalValue, String> {
    match value {
        Value::Null => Ok(CanonicalValue::Null),
        Value::Bool(b) => Ok(CanonicalValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64().or_else(|| integral(n.as_f64()?)) {
            Some(0) => Ok(CanonicalValue::Integer(0)),
            Some(1) => Ok(CanonicalValue::Integer(1)),
            _ => Err(format!("{} is not a boolean", n)),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(CanonicalValue::Null),
            "true" | "1" | "yes" => Ok(CanonicalValue::Integer(1)),
            "false" | "0" | "no" => Ok(CanonicalValue::Integer(0)),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        _ => Err(format!("{} is not a boolean", value)),
    }
}

fn coerce_timestamp(value: &Value) -> std::result::Result<CanonicalValue, String> {
    let instant = match value {
        Value::Null => return Ok(CanonicalValue::Null),
        Value::String(s) if s.trim().is_empty() => return Ok(CanonicalValue::Null),
        Value::String(s) => parse_datetime(s)
            .or_else(|| parse_date_only(s))
            .ok_or_else(|| format!("'{}' is not a timestamp", s))?,
        Value::Number(n) => n
            .as_i64()
            .and_then(from_epoch)
            .ok_or_else(|| format!("{} is not an epoch timestamp", n))?,
        Value::Object(map) => match native_scalar(map) {
            Some(Ok(NativeScalar::Timestamp(dt))) => dt,
            Some(Ok(NativeScalar::Integer(i))) => {
                from_epoch(i).ok_or_else(|| format!("{} is not an epoch timestamp", i))?
            }
            Some(Err(reason)) => return Err(reason),
            _ => return Err(format!("{} is not a timestamp", value)),
        },
        _ => return Err(format!("{} is not a timestamp", value)),
    };
    Ok(CanonicalValue::Timestamp(canonical_timestamp(&instant)))
}

fn coerce_json(value: &Value) -> std::result::Result<CanonicalValue, String> {
    match value {
        Value::Object(_) | Value::Array(_) => encode_json(value),
        // Nested fields that arrive pre-encoded must still be valid JSON.
        Value::String(s) => serde_json::from_str::<Value>(s)
            .map_err(|e| format!("is not valid JSON: {}", e))
            .and_then(|parsed| encode_json(&parsed)),
        other => coerce_generic(other),
    }
}

fn coerce_enum(
    column: &str,
    values: &[String],
    fallback: &str,
    value: &Value,
    fallbacks: &mut Vec<FallbackApplied>,
) -> std::result::Result<CanonicalValue, String> {
    let original = match value {
        Value::Null => return Ok(CanonicalValue::Null),
        Value::String(s) => s.clone(),
        Value::Number(_) | Value::Bool(_) => value.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    };

    if let Some(known) = values.iter().find(|v| v.as_str() == original) {
        return Ok(CanonicalValue::Text(known.clone()));
    }
    let normalized = original.trim();
    if let Some(known) = values.iter().find(|v| v.eq_ignore_ascii_case(normalized)) {
        return Ok(CanonicalValue::Text(known.clone()));
    }

    fallbacks.push(FallbackApplied {
        column: column.to_string(),
        original,
        fallback: fallback.to_string(),
    });
    Ok(CanonicalValue::Text(fallback.to_string()))
}
