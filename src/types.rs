//! Core types for the nestflux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: loaded scans, repaired scans, session summaries, biweek windows,
//! statistics rows and period bins.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tracked individual in a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Female,
    Male,
    Undiff1,
    Undiff2,
}

impl Role {
    /// Every role, in reporting order
    pub const ALL: [Role; 4] = [Role::Female, Role::Male, Role::Undiff1, Role::Undiff2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Female => "female",
            Role::Male => "male",
            Role::Undiff1 => "undiff1",
            Role::Undiff2 => "undiff2",
        }
    }

    /// Roles whose sex was confidently assigned in the field
    pub fn is_sexed(&self) -> bool {
        matches!(self, Role::Female | Role::Male)
    }

    /// Column holding this role's nest-building count in a session table
    pub fn d_column(&self) -> String {
        format!("{}_D", self.as_str())
    }

    /// Column holding this role's in-nest-tree nest-building count
    pub fn d7_column(&self) -> String {
        format!("{}_7D", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "female" => Ok(Role::Female),
            "male" => Ok(Role::Male),
            "undiff1" => Ok(Role::Undiff1),
            "undiff2" => Ok(Role::Undiff2),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Ordered set of roles a run reports on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Role>", into = "Vec<Role>")]
pub struct RoleSet(Vec<Role>);

impl From<Vec<Role>> for RoleSet {
    fn from(roles: Vec<Role>) -> Self {
        RoleSet::new(roles)
    }
}

impl From<RoleSet> for Vec<Role> {
    fn from(set: RoleSet) -> Self {
        set.0
    }
}

impl Default for RoleSet {
    fn default() -> Self {
        Self(Role::ALL.to_vec())
    }
}

impl RoleSet {
    /// Build a role set, dropping duplicates while keeping first-seen order
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut unique = Vec::new();
        for role in roles {
            if !unique.contains(&role) {
                unique.push(role);
            }
        }
        Self(unique)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Location and behavior codes recorded for one role in one scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleObservation {
    /// Numeric location code (1-7 are inside the nest area, 7 is the nest tree)
    pub location: Option<f64>,
    /// Single-letter behavior code, trimmed and upper-cased
    pub behavior: Option<String>,
}

impl RoleObservation {
    pub fn new(location: Option<f64>, behavior: Option<&str>) -> Self {
        Self {
            location,
            behavior: behavior
                .map(|b| b.trim().to_ascii_uppercase())
                .filter(|b| !b.is_empty()),
        }
    }

    pub fn behavior_is(&self, code: &str) -> bool {
        self.behavior.as_deref() == Some(code)
    }
}

/// One fixed-interval field observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// Entity (nest) identifier; `None` means the single implicit group
    pub entity: Option<String>,
    /// Observation time (local field time)
    pub timestamp: NaiveDateTime,
    /// Manual minutes counter as entered, possibly missing or corrupt
    pub raw_counter: Option<f64>,
    /// Per-role codes
    #[serde(default)]
    pub roles: BTreeMap<Role, RoleObservation>,
    /// Materialized indicator columns (metric name -> value)
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

impl Scan {
    pub fn new(entity: Option<&str>, timestamp: NaiveDateTime, raw_counter: Option<f64>) -> Self {
        Self {
            entity: entity.map(str::to_string),
            timestamp,
            raw_counter,
            roles: BTreeMap::new(),
            indicators: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: Role, location: Option<f64>, behavior: Option<&str>) -> Self {
        self.roles.insert(role, RoleObservation::new(location, behavior));
        self
    }

    pub fn with_indicator(mut self, name: impl Into<String>, value: f64) -> Self {
        self.indicators.insert(name.into(), value);
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn observation(&self, role: Role) -> Option<&RoleObservation> {
        self.roles.get(&role)
    }
}

/// A scan annotated by the sessionizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairedScan {
    pub scan: Scan,
    /// Global session counter value (1-based)
    pub session_id: u64,
    /// Counter value after gap-anchored repair
    pub repaired_counter: f64,
}

impl RepairedScan {
    /// Whether the repair changed (or filled in) the raw counter
    pub fn counter_was_repaired(&self) -> bool {
        match self.scan.raw_counter {
            Some(raw) => raw != self.repaired_counter,
            None => true,
        }
    }
}

/// Nest-building counts for one role
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleCounts {
    /// Rows with behavior `D` at a location inside 1..=7
    pub d: u32,
    /// Rows with behavior `D` at location 7
    pub d7: u32,
}

/// One row per (entity, session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: u64,
    pub entity: Option<String>,
    pub date: NaiveDate,
    pub session_start: NaiveDateTime,
    pub session_end: NaiveDateTime,
    /// Duration in minutes between first and last scan
    pub session_minutes: f64,
    pub singleton_session: bool,
    pub start_minutes: f64,
    pub suspect_start_minutes: bool,
    pub minutes_corrupt_flag: bool,
    pub minutes_repaired_min: f64,
    pub minutes_repaired_max: f64,
    pub minutes_repaired_range: f64,
    pub n_rows: usize,
    pub all_roles_d: u32,
    pub all_roles_7d: u32,
    pub role_counts: BTreeMap<Role, RoleCounts>,
}

/// Totals and rates for one role inside a biweek window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoleRates {
    pub d: u32,
    pub d7: u32,
    pub d_per_100hr: f64,
    pub d7_per_100hr: f64,
}

/// Fixed 14-day aggregation bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiweekWindow {
    /// 1-based position counted from the first observed session date
    pub biweek_id: u32,
    pub biweek_start: NaiveDate,
    /// Inclusive last day
    pub biweek_end: NaiveDate,
    pub total_minutes: f64,
    pub survey_hours: f64,
    pub n_sessions: usize,
    pub n_singletons: usize,
    pub all_roles_d: u32,
    pub all_roles_7d: u32,
    pub all_roles_d_per_100hr: f64,
    pub all_roles_7d_per_100hr: f64,
    pub roles: BTreeMap<Role, RoleRates>,
}

impl BiweekWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.biweek_start <= date && date <= self.biweek_end
    }
}

/// Aggregate statistics across the whole session table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_minutes: f64,
    pub survey_hours: f64,
    pub all_roles_d_total: f64,
    pub all_roles_7d_total: f64,
    pub all_roles_d_per_100hr: f64,
    pub all_roles_7d_per_100hr: f64,
    pub d_ci: ConfidenceInterval,
    pub d7_ci: ConfidenceInterval,
}

/// Totals and rates for one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleStats {
    pub role: Role,
    pub role_d_total: f64,
    pub role_7d_total: f64,
    pub role_d_per_100hr: f64,
    pub role_7d_per_100hr: f64,
}

/// Confidence bounds for one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleInterval {
    pub role: Role,
    pub d_ci: ConfidenceInterval,
    pub d7_ci: ConfidenceInterval,
}

/// 95% interval expressed per 100 survey hours; NaN bounds when exposure is undefined
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
}

/// The three statistics tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub summary: StatsSummary,
    pub by_role: Vec<RoleStats>,
    pub intervals: Vec<RoleInterval>,
}

/// Summed value of one indicator inside a period bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTotal {
    pub metric: String,
    pub total: f64,
    /// Percent of available survey time, when normalization was requested
    pub percent: Option<f64>,
}

/// Configurable-width time bucket over raw scans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodBin {
    pub period_start: NaiveDate,
    /// Inclusive last day
    pub period_end: NaiveDate,
    pub num_observations: usize,
    pub metrics: Vec<MetricTotal>,
}

impl PeriodBin {
    pub fn label(&self) -> String {
        format!("{} to {}", self.period_start, self.period_end)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricTotal> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}
