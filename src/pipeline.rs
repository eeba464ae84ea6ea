//! Pipeline orchestration
//!
//! This module provides the public API for nestflux. It runs a raw scan table
//! through load, sessionize, summarize, biweekly, stats and (optionally) period
//! aggregation, and returns every table at once or nothing.

use crate::biweekly::BiweeklyAggregator;
use crate::config::{PeriodConfig, SurveyConfig};
use crate::error::ComputeError;
use crate::period::{PeriodAggregator, PeriodOutput};
use crate::qc::QcReport;
use crate::schema::{RawRow, ScanLoader, SCHEMA_VERSION};
use crate::sessionizer::Sessionizer;
use crate::stats::StatsEngine;
use crate::summarizer::SessionSummarizer;
use crate::table::{
    biweek_record, period_record, role_interval_record, role_stats_record, session_record,
    stats_summary_record, Record,
};
use crate::types::{BiweekWindow, RoleSet, SessionStats, SessionSummary};
use crate::{NESTFLUX_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Provenance attached to every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub producer_name: String,
    pub producer_version: String,
    pub run_id: String,
    pub input_schema: String,
    pub computed_at_utc: DateTime<Utc>,
    pub config_release_id: String,
}

impl RunManifest {
    fn new(config: &SurveyConfig) -> Self {
        Self {
            producer_name: PRODUCER_NAME.to_string(),
            producer_version: NESTFLUX_VERSION.to_string(),
            run_id: Uuid::new_v4().to_string(),
            input_schema: SCHEMA_VERSION.to_string(),
            computed_at_utc: Utc::now(),
            config_release_id: config.config_release_id.clone(),
        }
    }
}

/// Every table produced by one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyOutput {
    pub roles: RoleSet,
    pub sessions: Vec<SessionSummary>,
    pub biweekly: Vec<BiweekWindow>,
    pub stats: SessionStats,
    pub periods: Option<PeriodOutput>,
    pub qc: QcReport,
    pub manifest: RunManifest,
}

impl SurveyOutput {
    pub fn session_table(&self) -> Vec<Record> {
        self.sessions
            .iter()
            .map(|s| session_record(s, &self.roles))
            .collect()
    }

    pub fn biweekly_table(&self) -> Vec<Record> {
        self.biweekly
            .iter()
            .map(|w| biweek_record(w, &self.roles))
            .collect()
    }

    pub fn stats_summary_table(&self) -> Vec<Record> {
        vec![stats_summary_record(&self.stats.summary)]
    }

    pub fn stats_by_role_table(&self) -> Vec<Record> {
        self.stats.by_role.iter().map(role_stats_record).collect()
    }

    pub fn stats_ci_table(&self) -> Vec<Record> {
        self.stats.intervals.iter().map(role_interval_record).collect()
    }

    pub fn period_table(&self) -> Vec<Record> {
        self.periods
            .as_ref()
            .map(|p| p.bins.iter().map(period_record).collect())
            .unwrap_or_default()
    }
}

/// Run the full pipeline over a raw scan table.
///
/// Period aggregation runs only when `periods` is supplied.
///
/// # Example
/// ```ignore
/// let rows = parse_ndjson(&input)?;
/// let output = run_survey(&rows, &SurveyConfig::default(), None)?;
/// println!("{} sessions", output.sessions.len());
/// ```
pub fn run_survey(
    rows: &[RawRow],
    config: &SurveyConfig,
    periods: Option<&PeriodConfig>,
) -> Result<SurveyOutput, ComputeError> {
    let mut processor = SurveyProcessor::new(config.clone())?;
    if let Some(period_config) = periods {
        processor = processor.with_periods(period_config.clone())?;
    }
    processor.process(rows)
}

/// Statistics over an externally supplied session table
pub fn stats_from_session_table(
    records: &[Record],
    roles: &RoleSet,
) -> Result<SessionStats, ComputeError> {
    StatsEngine::new(roles).from_records(records)
}

/// Period aggregation alone, skipping the session stages
pub fn periods_from_rows(
    rows: &[RawRow],
    config: &SurveyConfig,
    periods: &PeriodConfig,
) -> Result<PeriodOutput, ComputeError> {
    let loaded = ScanLoader::load(rows, config)?;
    PeriodAggregator::new(periods, config).aggregate(&loaded.scans)
}

/// Validated configuration bound to the pipeline stages.
pub struct SurveyProcessor {
    config: SurveyConfig,
    periods: Option<PeriodConfig>,
}

impl SurveyProcessor {
    pub fn new(config: SurveyConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            config,
            periods: None,
        })
    }

    /// Enable period aggregation
    pub fn with_periods(mut self, periods: PeriodConfig) -> Result<Self, ComputeError> {
        periods.validate()?;
        self.periods = Some(periods);
        Ok(self)
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    pub fn process(&self, rows: &[RawRow]) -> Result<SurveyOutput, ComputeError> {
        let config = &self.config;

        // Stage 1: validate, coerce, sort
        let loaded = ScanLoader::load(rows, config)?;

        // Stage 2: period bins work on raw scans, before sessionizing consumes them
        let periods = match &self.periods {
            Some(period_config) => {
                Some(PeriodAggregator::new(period_config, config).aggregate(&loaded.scans)?)
            }
            None => None,
        };

        // Stage 3: sessions and counter repair
        let repaired = Sessionizer::new(config).assign(loaded.scans);

        // Stage 4: session summaries
        let sessions = SessionSummarizer::new(config).summarize(&repaired);

        // Stage 5: biweekly windows
        let biweekly = BiweeklyAggregator::new(config).aggregate(&sessions)?;

        // Stage 6: rates and intervals
        let stats = StatsEngine::new(&config.roles).from_sessions(&sessions)?;

        let qc = QcReport::build(&loaded.report, &sessions, periods.as_ref().map(|p| &p.report), config);

        info!(
            rows = qc.total_rows,
            sessions = qc.sessions,
            windows = biweekly.len(),
            effort_minutes = qc.effort_minutes,
            "survey run complete"
        );

        Ok(SurveyOutput {
            roles: config.roles.clone(),
            sessions,
            biweekly,
            stats,
            periods,
            qc,
            manifest: RunManifest::new(config),
        })
    }
}
