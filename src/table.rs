//! Flat table rendering
//!
//! Every output table is a list of JSON records whose keys follow the column
//! contract of the field reports. Key order is preserved, and NaN values are
//! rendered as `null`.

use crate::error::ComputeError;
use crate::types::{
    BiweekWindow, ConfidenceInterval, PeriodBin, RoleInterval, RoleSet, RoleStats, SessionSummary,
    StatsSummary,
};
use chrono::NaiveDateTime;
use serde_json::Value;

/// One output row
pub type Record = serde_json::Map<String, Value>;

pub const SESSION_MINUTES_COLUMN: &str = "session_minutes";
pub const ALL_ROLES_D_COLUMN: &str = "all_roles_D";
pub const ALL_ROLES_7D_COLUMN: &str = "all_roles_7D";

/// Fixed leading columns of a period row; indicators may not reuse these names
pub const PERIOD_BIN_COLUMNS: [&str; 4] =
    ["Period_bin", "period_start", "period_end", "num_observations"];

/// Rendering of a list of records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    #[default]
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON array
    JsonPretty,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Ndjson => "ndjson",
            OutputFormat::Json | OutputFormat::JsonPretty => "json",
        }
    }
}

/// Render records in the requested format
pub fn format_records(records: &[Record], format: OutputFormat) -> Result<String, ComputeError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines = Vec::with_capacity(records.len());
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

fn timestamp(value: &NaiveDateTime) -> Value {
    Value::String(value.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn put(record: &mut Record, key: impl Into<String>, value: impl Into<Value>) {
    record.insert(key.into(), value.into());
}

fn put_interval(record: &mut Record, prefix: &str, ci: &ConfidenceInterval) {
    put(record, format!("{}_CI_low", prefix), ci.low);
    put(record, format!("{}_CI_high", prefix), ci.high);
}

/// Session table row
pub fn session_record(session: &SessionSummary, roles: &RoleSet) -> Record {
    let mut r = Record::new();
    put(&mut r, "session_id", session.session_id);
    if let Some(entity) = &session.entity {
        put(&mut r, "entity", entity.as_str());
    }
    put(&mut r, "date", session.date.to_string());
    r.insert("session_start".into(), timestamp(&session.session_start));
    r.insert("session_end".into(), timestamp(&session.session_end));
    put(&mut r, SESSION_MINUTES_COLUMN, session.session_minutes);
    put(&mut r, "singleton_session", session.singleton_session);
    put(&mut r, "start_minutes", session.start_minutes);
    put(&mut r, "suspect_start_minutes", session.suspect_start_minutes);
    put(&mut r, "minutes_corrupt_flag", session.minutes_corrupt_flag);
    put(&mut r, "minutes_repaired_min", session.minutes_repaired_min);
    put(&mut r, "minutes_repaired_max", session.minutes_repaired_max);
    put(&mut r, "minutes_repaired_range", session.minutes_repaired_range);
    put(&mut r, "n_rows", session.n_rows);
    put(&mut r, ALL_ROLES_D_COLUMN, session.all_roles_d);
    put(&mut r, ALL_ROLES_7D_COLUMN, session.all_roles_7d);

    for role in roles.iter() {
        let counts = session.role_counts.get(&role).copied().unwrap_or_default();
        put(&mut r, role.d_column(), counts.d);
        put(&mut r, role.d7_column(), counts.d7);
    }
    r
}

/// Biweekly table row
pub fn biweek_record(window: &BiweekWindow, roles: &RoleSet) -> Record {
    let mut r = Record::new();
    put(&mut r, "biweek_id", window.biweek_id);
    put(&mut r, "biweek_start", window.biweek_start.to_string());
    put(&mut r, "biweek_end", window.biweek_end.to_string());
    put(&mut r, "total_minutes", window.total_minutes);
    put(&mut r, "survey_hours", window.survey_hours);
    put(&mut r, "n_sessions", window.n_sessions);
    put(&mut r, "n_singletons", window.n_singletons);
    put(&mut r, ALL_ROLES_D_COLUMN, window.all_roles_d);
    put(&mut r, ALL_ROLES_7D_COLUMN, window.all_roles_7d);
    put(&mut r, "all_roles_D_per_100hr", window.all_roles_d_per_100hr);
    put(&mut r, "all_roles_7D_per_100hr", window.all_roles_7d_per_100hr);

    for role in roles.iter() {
        let Some(rates) = window.roles.get(&role) else {
            continue;
        };
        put(&mut r, role.d_column(), rates.d);
        put(&mut r, role.d7_column(), rates.d7);
        put(&mut r, format!("{}_per_100hr", role.d_column()), rates.d_per_100hr);
        put(&mut r, format!("{}_per_100hr", role.d7_column()), rates.d7_per_100hr);
    }
    r
}

/// Aggregate statistics row
pub fn stats_summary_record(summary: &StatsSummary) -> Record {
    let mut r = Record::new();
    put(&mut r, "total_minutes", summary.total_minutes);
    put(&mut r, "survey_hours", summary.survey_hours);
    put(&mut r, "all_roles_D_total", summary.all_roles_d_total);
    put(&mut r, "all_roles_7D_total", summary.all_roles_7d_total);
    put(&mut r, "all_roles_D_per_100hr", summary.all_roles_d_per_100hr);
    put(&mut r, "all_roles_7D_per_100hr", summary.all_roles_7d_per_100hr);
    put_interval(&mut r, "D", &summary.d_ci);
    put_interval(&mut r, "7D", &summary.d7_ci);
    r
}

/// Per-role totals row
pub fn role_stats_record(stats: &RoleStats) -> Record {
    let mut r = Record::new();
    put(&mut r, "role", stats.role.as_str());
    put(&mut r, "role_D_total", stats.role_d_total);
    put(&mut r, "role_7D_total", stats.role_7d_total);
    put(&mut r, "role_D_per_100hr", stats.role_d_per_100hr);
    put(&mut r, "role_7D_per_100hr", stats.role_7d_per_100hr);
    r
}

/// Per-role interval row
pub fn role_interval_record(interval: &RoleInterval) -> Record {
    let mut r = Record::new();
    put(&mut r, "role", interval.role.as_str());
    put_interval(&mut r, "D", &interval.d_ci);
    put_interval(&mut r, "7D", &interval.d7_ci);
    r
}

/// Period table row: label, scan count, sums, then percent columns
pub fn period_record(bin: &PeriodBin) -> Record {
    let mut r = Record::new();
    let [label, start, end, count] = PERIOD_BIN_COLUMNS;
    put(&mut r, label, bin.label());
    put(&mut r, start, bin.period_start.to_string());
    put(&mut r, end, bin.period_end.to_string());
    put(&mut r, count, bin.num_observations);
    for metric in &bin.metrics {
        put(&mut r, metric.metric.as_str(), metric.total);
    }
    for metric in &bin.metrics {
        if let Some(percent) = metric.percent {
            put(&mut r, format!("{}_percent", metric.metric), percent);
        }
    }
    r
}
