//! Run configuration
//!
//! A `SurveyConfig` is built once per run and passed by reference to every
//! stage. Nothing in the pipeline reads global mutable state.

use crate::error::ComputeError;
use crate::table::PERIOD_BIN_COLUMNS;
use crate::types::{Role, RoleSet};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default maximum gap between scans of one session (8 minutes)
pub const DEFAULT_SESSION_GAP_SECONDS: i64 = 480;

/// Default scan cadence in minutes
pub const DEFAULT_SCAN_INTERVAL_MINUTES: f64 = 3.0;

/// Default allowed deviation between raw and expected counter
pub const DEFAULT_COUNTER_TOLERANCE: f64 = 3.0;

/// Sessions shorter than this many minutes are singletons
pub const DEFAULT_SINGLETON_THRESHOLD_MINUTES: f64 = 9.0;

/// Default biweek window length in days
pub const DEFAULT_BIWEEK_DAYS: i64 = 14;

/// Default minimum (female + male) / (all roles) ratio
pub const DEFAULT_MIN_VALID_SEX_RATIO: f64 = 0.9;

/// Bins with this many scans or fewer are discarded
pub const DEFAULT_MIN_SCANS: usize = 3;

/// Input column names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub timestamp: String,
    pub counter: String,
    /// Optional grouping key; rows without it fall into one implicit group
    pub entity: String,
    /// Suffix appended to a role name for its location column
    pub location_suffix: String,
    /// Suffix appended to a role name for its behavior column
    pub behavior_suffix: String,
    /// Numeric columns never treated as indicators
    pub excluded_columns: Vec<String>,
    /// Numeric columns containing any of these fragments are never indicators
    pub excluded_substrings: Vec<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        let excluded_columns = [
            "date", "time", "time.s", "time.e", "observer", "notes", "weather", "temp_f",
            "windSp_avg", "p1", "p2", "p3", "p4", "p5", "juv1.loc", "juv2.loc", "juv3.loc",
            "FEHA_1.loc", "FEHA_2.loc", "OBE.loc", "GOEA_1.loc", "GOEA_2.loc", "GOEA_3.loc",
        ];
        Self {
            timestamp: "date_time".to_string(),
            counter: "minutes".to_string(),
            entity: "nest.name".to_string(),
            location_suffix: ".loc".to_string(),
            behavior_suffix: ".be".to_string(),
            excluded_columns: excluded_columns.iter().map(|c| c.to_string()).collect(),
            excluded_substrings: vec![
                "longitude".to_string(),
                "latitude".to_string(),
                "dist_from_nest".to_string(),
            ],
        }
    }
}

impl ColumnNames {
    pub fn location(&self, role: Role) -> String {
        format!("{}{}", role.as_str(), self.location_suffix)
    }

    pub fn behavior(&self, role: Role) -> String {
        format!("{}{}", role.as_str(), self.behavior_suffix)
    }

    /// Columns that the loader interprets itself or that name period-table fields
    pub fn is_reserved(&self, column: &str) -> bool {
        column == self.timestamp
            || column == self.counter
            || column == self.entity
            || PERIOD_BIN_COLUMNS.contains(&column)
            || Role::ALL
                .iter()
                .any(|r| column == self.location(*r) || column == self.behavior(*r))
    }

    pub fn is_excluded(&self, column: &str) -> bool {
        self.excluded_columns.iter().any(|c| c == column)
            || self
                .excluded_substrings
                .iter()
                .any(|fragment| column.contains(fragment.as_str()))
    }
}

/// Inclusive calendar date filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ComputeError> {
        if end < start {
            return Err(ComputeError::InvalidConfig(format!(
                "date range end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl FromStr for DateRange {
    type Err = ComputeError;

    /// Parses `YYYY-MM-DD to YYYY-MM-DD`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s.split_once("to").ok_or_else(|| {
            ComputeError::InvalidConfig(format!("expected 'START to END', got '{}'", s))
        })?;
        let parse = |v: &str| {
            NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
                .map_err(|e| ComputeError::InvalidConfig(format!("bad date '{}': {}", v.trim(), e)))
        };
        DateRange::new(parse(start)?, parse(end)?)
    }
}

/// Configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub columns: ColumnNames,
    pub roles: RoleSet,
    pub session_gap_seconds: i64,
    pub scan_interval_minutes: f64,
    pub counter_tolerance: f64,
    pub singleton_threshold_minutes: f64,
    pub biweek_days: i64,
    /// Emit biweek windows that contain no session
    pub include_empty_windows: bool,
    pub date_range: Option<DateRange>,
    /// Entity allow-list; empty keeps every entity
    pub entities: Vec<String>,
    pub config_release_id: String,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            columns: ColumnNames::default(),
            roles: RoleSet::default(),
            session_gap_seconds: DEFAULT_SESSION_GAP_SECONDS,
            scan_interval_minutes: DEFAULT_SCAN_INTERVAL_MINUTES,
            counter_tolerance: DEFAULT_COUNTER_TOLERANCE,
            singleton_threshold_minutes: DEFAULT_SINGLETON_THRESHOLD_MINUTES,
            biweek_days: DEFAULT_BIWEEK_DAYS,
            include_empty_windows: false,
            date_range: None,
            entities: Vec::new(),
            config_release_id: "FRNBES_v1.0".to_string(),
        }
    }
}

impl SurveyConfig {
    /// Load configuration from JSON; absent fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: SurveyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.session_gap_seconds <= 0 {
            return Err(ComputeError::InvalidConfig(
                "session_gap_seconds must be positive".to_string(),
            ));
        }
        if self.scan_interval_minutes <= 0.0 {
            return Err(ComputeError::InvalidConfig(
                "scan_interval_minutes must be positive".to_string(),
            ));
        }
        if self.counter_tolerance < 0.0 {
            return Err(ComputeError::InvalidConfig(
                "counter_tolerance must not be negative".to_string(),
            ));
        }
        if self.biweek_days <= 0 {
            return Err(ComputeError::InvalidConfig(
                "biweek_days must be positive".to_string(),
            ));
        }
        if self.roles.is_empty() {
            return Err(ComputeError::InvalidConfig(
                "at least one role is required".to_string(),
            ));
        }
        if let Some(range) = &self.date_range {
            DateRange::new(range.start, range.end)?;
        }
        Ok(())
    }

    pub fn keeps_entity(&self, entity: Option<&str>) -> bool {
        if self.entities.is_empty() {
            return true;
        }
        entity.map_or(false, |e| self.entities.iter().any(|allowed| allowed == e))
    }
}

/// Width of a period bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PeriodWidth {
    /// One calendar day
    Day,
    /// Fixed run of 7 * n days
    Weeks(u32),
}

impl PeriodWidth {
    pub fn days(&self) -> i64 {
        match self {
            PeriodWidth::Day => 1,
            PeriodWidth::Weeks(n) => 7 * i64::from(*n),
        }
    }

    pub fn code(&self) -> String {
        match self {
            PeriodWidth::Day => "1D".to_string(),
            PeriodWidth::Weeks(n) => format!("{}W", n),
        }
    }
}

impl FromStr for PeriodWidth {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "D" | "1D" => Ok(PeriodWidth::Day),
            "W" | "1W" => Ok(PeriodWidth::Weeks(1)),
            "2W" => Ok(PeriodWidth::Weeks(2)),
            "4W" => Ok(PeriodWidth::Weeks(4)),
            other => Err(ComputeError::InvalidConfig(format!(
                "unsupported period '{}' (expected 1D, 1W, 2W or 4W)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for PeriodWidth {
    type Error = ComputeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeriodWidth> for String {
    fn from(width: PeriodWidth) -> Self {
        width.code()
    }
}

/// Where the sex-data ratio is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SexFilterScope {
    /// Ratio per calendar date
    Date,
    /// Ratio per period bin
    Period,
}

/// Configuration for the period aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    pub width: PeriodWidth,
    /// Indicators to aggregate; empty means every indicator present
    pub metrics: Vec<String>,
    /// Add `<metric>_percent` columns
    pub normalize: bool,
    pub min_valid_sex_ratio: f64,
    pub sex_filter_scope: SexFilterScope,
    pub min_scans: usize,
    /// Inclusive location-code range counted as an observed role
    pub observed_location_range: (f64, f64),
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            width: PeriodWidth::Weeks(2),
            metrics: Vec::new(),
            normalize: false,
            min_valid_sex_ratio: DEFAULT_MIN_VALID_SEX_RATIO,
            sex_filter_scope: SexFilterScope::Date,
            min_scans: DEFAULT_MIN_SCANS,
            observed_location_range: (0.0, 14.0),
        }
    }
}

impl PeriodConfig {
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !(0.0..=1.0).contains(&self.min_valid_sex_ratio) {
            return Err(ComputeError::InvalidConfig(format!(
                "min_valid_sex_ratio must be within 0..=1, got {}",
                self.min_valid_sex_ratio
            )));
        }
        let (low, high) = self.observed_location_range;
        if high < low {
            return Err(ComputeError::InvalidConfig(
                "observed_location_range is inverted".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_observed_location(&self, location: f64) -> bool {
        let (low, high) = self.observed_location_range;
        low <= location && location <= high
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_field_protocol() {
        let config = SurveyConfig::default();
        assert_eq!(config.session_gap_seconds, 480);
        assert_eq!(config.scan_interval_minutes, 3.0);
        assert_eq!(config.roles.len(), 4);
        assert_eq!(config.columns.location(Role::Undiff1), "undiff1.loc");
        assert_eq!(config.columns.behavior(Role::Female), "female.be");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SurveyConfig::from_json(r#"{"session_gap_seconds": 600}"#).unwrap();
        assert_eq!(config.session_gap_seconds, 600);
        assert_eq!(config.biweek_days, 14);
        assert_eq!(config.columns.counter, "minutes");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SurveyConfig::from_json(r#"{"biweek_days": 0}"#);
        assert!(matches!(result, Err(ComputeError::InvalidConfig(_))));

        let result = SurveyConfig::from_json(r#"{"roles": []}"#);
        assert!(matches!(result, Err(ComputeError::InvalidConfig(_))));
    }

    #[test]
    fn test_duplicate_roles_collapse_on_load() {
        let config = SurveyConfig::from_json(r#"{"roles": ["female", "male", "female"]}"#).unwrap();
        let roles: Vec<Role> = config.roles.iter().collect();
        assert_eq!(roles, vec![Role::Female, Role::Male]);

        let reloaded = SurveyConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(reloaded.roles, config.roles);
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let result = SurveyConfig::from_json(
            r#"{"date_range": {"start": "2024-05-31", "end": "2024-05-01"}}"#,
        );
        assert!(matches!(result, Err(ComputeError::InvalidConfig(_))));

        let config = SurveyConfig::from_json(
            r#"{"date_range": {"start": "2024-05-01", "end": "2024-05-31"}}"#,
        )
        .unwrap();
        assert!(config.date_range.is_some());
    }

    #[test]
    fn test_period_width_parsing() {
        assert_eq!("1D".parse::<PeriodWidth>().unwrap(), PeriodWidth::Day);
        assert_eq!("2w".parse::<PeriodWidth>().unwrap().days(), 14);
        assert_eq!("4W".parse::<PeriodWidth>().unwrap().days(), 28);
        assert!("1M".parse::<PeriodWidth>().is_err());
    }

    #[test]
    fn test_period_width_serde() {
        let config: PeriodConfig = serde_json::from_str(r#"{"width": "4W"}"#).unwrap();
        assert_eq!(config.width, PeriodWidth::Weeks(4));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""width":"4W""#));
    }

    #[test]
    fn test_date_range_parsing() {
        let range: DateRange = "2024-05-01 to 2024-05-31".parse().unwrap();
        assert!(range.contains(NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        assert!("2024-05-31 to 2024-05-01".parse::<DateRange>().is_err());
    }

    #[test]
    fn test_excluded_columns() {
        let columns = ColumnNames::default();
        assert!(columns.is_excluded("p1"));
        assert!(columns.is_excluded("p3_dist_from_nest_code"));
        assert!(!columns.is_excluded("AF_NestBuilding"));
        assert!(columns.is_reserved("male.be"));
        assert!(columns.is_reserved("minutes"));
        assert!(columns.is_reserved("num_observations"));
        assert!(columns.is_reserved("Period_bin"));
    }

    #[test]
    fn test_entity_allow_list() {
        let mut config = SurveyConfig::default();
        assert!(config.keeps_entity(None));
        config.entities = vec!["Hygiene".to_string()];
        assert!(config.keeps_entity(Some("Hygiene")));
        assert!(!config.keeps_entity(Some("Erie")));
        assert!(!config.keeps_entity(None));
    }
}
