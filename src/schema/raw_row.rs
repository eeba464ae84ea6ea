//! Raw survey rows
//!
//! A survey export is a loosely typed table. Each row arrives as a JSON object
//! mapping column name to value; numbers may be encoded as strings and any
//! cell may be blank.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// One row of the raw event table
pub type RawRow = serde_json::Map<String, Value>;

/// Current input contract identifier
pub const SCHEMA_VERSION: &str = "nest.scan_table.v1";

/// Naive date-time layouts accepted for the timestamp column
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Parse a timestamp cell into local field time
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    let text = value.as_str()?.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }

    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }

    // A bare date is taken as midnight
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Coerce a cell to a finite number; blanks and text become `None`
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Coerce a cell to text; numbers are rendered, blanks become `None`
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a JSON array of row objects
pub fn parse_array(json: &str) -> Result<Vec<RawRow>, crate::error::ComputeError> {
    let rows: Vec<RawRow> = serde_json::from_str(json)?;
    Ok(rows)
}

/// Parse NDJSON (one row object per line)
pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawRow>, crate::error::ComputeError> {
    let mut rows = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRow>(trimmed) {
            Ok(row) => rows.push(row),
            Err(e) => {
                return Err(crate::error::ComputeError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(rows)
}
