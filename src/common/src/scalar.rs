use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Scalar kinds a JSON leaf can be stored as. The declaration order is the
/// widening order: `Boolean < Integer < Number < Datetime < Text`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarType {
    Boolean,
    Integer,
    Number,
    Datetime,
    #[default]
    Text,
}

impl ScalarType {
    pub const ALL: [ScalarType; 5] = [
        ScalarType::Boolean,
        ScalarType::Integer,
        ScalarType::Number,
        ScalarType::Datetime,
        ScalarType::Text,
    ];

    /// Least upper bound of two observations. Widens, never narrows.
    pub fn merge(self, other: ScalarType) -> ScalarType {
        self.max(other)
    }

    /// Type evidence carried by a single JSON value.
    ///
    /// Strings count as datetimes only when they hold a full ISO-8601
    /// date-time (a `T` separated date and time); objects, arrays and `null`
    /// carry no narrower evidence than text.
    pub fn infer(value: &Value) -> ScalarType {
        match value {
            Value::Bool(_) => ScalarType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ScalarType::Integer,
            Value::Number(_) => ScalarType::Number,
            Value::String(s) if is_iso_datetime(s) => ScalarType::Datetime,
            _ => ScalarType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Boolean => "boolean",
            ScalarType::Integer => "integer",
            ScalarType::Number => "number",
            ScalarType::Datetime => "datetime",
            ScalarType::Text => "text",
        }
    }

    /// Column type used in generated SQLite DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ScalarType::Boolean => "BOOLEAN",
            ScalarType::Integer => "BIGINT",
            ScalarType::Number => "REAL",
            ScalarType::Datetime => "TIMESTAMP",
            ScalarType::Text => "TEXT",
        }
    }

    /// Best-effort conversion of a raw JSON value into a column value.
    /// Anything that cannot be represented becomes `NULL` instead of failing.
    pub fn convert(&self, value: &Value) -> SqlValue {
        if value.is_null() {
            return SqlValue::Null;
        }
        let converted = match self {
            ScalarType::Boolean => parse_bool(value).map(|b| SqlValue::Integer(b as i64)),
            ScalarType::Integer => parse_i64(value).map(SqlValue::Integer),
            ScalarType::Number => parse_f64(value).map(SqlValue::Real),
            ScalarType::Datetime => value
                .as_str()
                .and_then(parse_datetime)
                .map(|dt| SqlValue::Text(dt.to_rfc3339())),
            ScalarType::Text => Some(SqlValue::Text(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
        };
        converted.unwrap_or(SqlValue::Null)
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScalarType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown scalar type '{s}'"))
    }
}

/// Parses ISO-8601 timestamps. Accepts RFC 3339 (including a trailing `Z`),
/// offset-less date-times (taken as UTC) and plain dates (midnight UTC).
pub fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// True for full date-time strings; bare dates stay text during inference.
pub fn is_iso_datetime(text: &str) -> bool {
    text.contains('T') && parse_datetime(text).is_some()
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(f64_to_i64)),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn f64_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}
