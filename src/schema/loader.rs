//! Loader: raw rows to chronologically ordered scans
//!
//! Validates that the required columns exist, coerces cells to their semantic
//! types, drops rows whose timestamp or counter cannot be parsed and sorts the
//! remainder by (entity, timestamp).

use crate::config::SurveyConfig;
use crate::error::ComputeError;
use crate::schema::raw_row::{coerce_number, coerce_text, parse_timestamp, RawRow};
use crate::types::{Role, RoleObservation, Scan};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Row accounting for one load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub total_rows: usize,
    /// Rows whose timestamp or counter failed to parse
    pub dropped_rows: usize,
    /// Rows removed by the date range or entity filters
    pub filtered_rows: usize,
    pub loaded_rows: usize,
    /// Role columns absent from the table
    pub missing_role_columns: Vec<String>,
}

/// Result of loading a raw table
#[derive(Debug, Clone)]
pub struct LoadedScans {
    pub scans: Vec<Scan>,
    pub report: LoadReport,
}

/// Loader for the raw scan table
pub struct ScanLoader;

impl ScanLoader {
    /// Check the required columns without converting anything
    pub fn check_schema(rows: &[RawRow], config: &SurveyConfig) -> Result<(), ComputeError> {
        let columns = &config.columns;
        let missing: Vec<&String> = [&columns.timestamp, &columns.counter]
            .into_iter()
            .filter(|name| !rows.iter().any(|row| row.contains_key(name.as_str())))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ComputeError::missing_columns(missing.into_iter().cloned()))
        }
    }

    /// Load and normalize the raw table
    pub fn load(rows: &[RawRow], config: &SurveyConfig) -> Result<LoadedScans, ComputeError> {
        Self::check_schema(rows, config)?;

        let columns = &config.columns;
        let mut report = LoadReport {
            total_rows: rows.len(),
            missing_role_columns: missing_role_columns(rows, config),
            ..LoadReport::default()
        };

        let mut scans = Vec::with_capacity(rows.len());

        for row in rows {
            let timestamp = row.get(&columns.timestamp).and_then(parse_timestamp);
            let counter = row.get(&columns.counter).and_then(coerce_number);

            let (timestamp, counter) = match (timestamp, counter) {
                (Some(t), Some(c)) => (t, c),
                _ => {
                    report.dropped_rows += 1;
                    continue;
                }
            };

            let entity = row.get(&columns.entity).and_then(coerce_text);

            if !config.keeps_entity(entity.as_deref()) {
                report.filtered_rows += 1;
                continue;
            }
            if let Some(range) = &config.date_range {
                if !range.contains(timestamp.date()) {
                    report.filtered_rows += 1;
                    continue;
                }
            }

            scans.push(Scan {
                entity,
                timestamp,
                raw_counter: Some(counter),
                roles: role_observations(row, config),
                indicators: indicator_columns(row, config),
            });
        }

        // Stable: ties keep their input order
        scans.sort_by(|a, b| {
            a.entity
                .cmp(&b.entity)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        report.loaded_rows = scans.len();

        if report.dropped_rows > 0 {
            warn!(
                dropped = report.dropped_rows,
                total = report.total_rows,
                "dropped rows with unparseable timestamp or counter"
            );
        }
        debug!(
            loaded = report.loaded_rows,
            filtered = report.filtered_rows,
            "scan table loaded"
        );

        Ok(LoadedScans { scans, report })
    }
}

fn missing_role_columns(rows: &[RawRow], config: &SurveyConfig) -> Vec<String> {
    config
        .roles
        .iter()
        .flat_map(|role| [config.columns.location(role), config.columns.behavior(role)])
        .filter(|name| !rows.iter().any(|row| row.contains_key(name.as_str())))
        .collect()
}

fn role_observations(row: &RawRow, config: &SurveyConfig) -> BTreeMap<Role, RoleObservation> {
    let columns = &config.columns;
    let mut roles = BTreeMap::new();

    for role in Role::ALL {
        let location = row.get(&columns.location(role)).and_then(coerce_number);
        let behavior = row.get(&columns.behavior(role)).and_then(coerce_text);
        if location.is_none() && behavior.is_none() {
            continue;
        }
        roles.insert(role, RoleObservation::new(location, behavior.as_deref()));
    }

    roles
}

fn indicator_columns(row: &RawRow, config: &SurveyConfig) -> BTreeMap<String, f64> {
    let columns = &config.columns;
    row.iter()
        .filter(|(name, _)| !columns.is_reserved(name) && !columns.is_excluded(name))
        .filter_map(|(name, value)| coerce_number(value).map(|v| (name.clone(), v)))
        .collect()
}
