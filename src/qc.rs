//! Quality-control summary for one run

use crate::config::SurveyConfig;
use crate::period::PeriodReport;
use crate::schema::LoadReport;
use crate::types::SessionSummary;
use serde::{Deserialize, Serialize};

/// Data-quality counters reported alongside the output tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcReport {
    pub total_rows: usize,
    pub rows_dropped: usize,
    pub rows_filtered: usize,
    pub rows_used: usize,
    pub sessions: usize,
    pub singleton_sessions: usize,
    pub corrupt_sessions: usize,
    pub suspect_start_sessions: usize,
    /// Sum of session minutes
    pub effort_minutes: f64,
    pub sex_filter_rows_excluded: usize,
    pub periods_discarded: usize,
    pub sex_filter_threshold: Option<f64>,
    pub missing_role_columns: Vec<String>,
    pub config_release_id: String,
}

impl QcReport {
    pub fn build(
        load: &LoadReport,
        sessions: &[SessionSummary],
        periods: Option<&PeriodReport>,
        config: &SurveyConfig,
    ) -> Self {
        Self {
            total_rows: load.total_rows,
            rows_dropped: load.dropped_rows,
            rows_filtered: load.filtered_rows,
            rows_used: load.loaded_rows,
            sessions: sessions.len(),
            singleton_sessions: sessions.iter().filter(|s| s.singleton_session).count(),
            corrupt_sessions: sessions.iter().filter(|s| s.minutes_corrupt_flag).count(),
            suspect_start_sessions: sessions.iter().filter(|s| s.suspect_start_minutes).count(),
            effort_minutes: sessions.iter().map(|s| s.session_minutes).sum(),
            sex_filter_rows_excluded: periods.map_or(0, |p| p.sex_filter_rows_excluded),
            periods_discarded: periods.map_or(0, |p| p.periods_discarded),
            sex_filter_threshold: periods.map(|p| p.sex_filter_threshold),
            missing_role_columns: load.missing_role_columns.clone(),
            config_release_id: config.config_release_id.clone(),
        }
    }
}
