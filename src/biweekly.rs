//! Biweekly effort and rate aggregation
//!
//! Sessions are pooled into consecutive fixed-length windows anchored on the
//! first observed session date.

use crate::config::SurveyConfig;
use crate::error::ComputeError;
use crate::stats::rate_per_100hr;
use crate::types::{BiweekWindow, RoleRates, SessionSummary};
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use tracing::debug;

/// Build the contiguous window grid covering `first_day..=last_day`
pub fn window_bounds(
    first_day: NaiveDate,
    last_day: NaiveDate,
    window_days: i64,
) -> Vec<(NaiveDate, NaiveDate)> {
    let mut bounds = Vec::new();
    if window_days <= 0 {
        return bounds;
    }

    let mut start = first_day;
    while start <= last_day {
        let end = start + Duration::days(window_days - 1);
        bounds.push((start, end));
        start = end + Duration::days(1);
    }
    bounds
}

/// Aggregates session summaries into biweek windows
pub struct BiweeklyAggregator<'a> {
    config: &'a SurveyConfig,
}

impl<'a> BiweeklyAggregator<'a> {
    pub fn new(config: &'a SurveyConfig) -> Self {
        Self { config }
    }

    pub fn aggregate(&self, sessions: &[SessionSummary]) -> Result<Vec<BiweekWindow>, ComputeError> {
        let (Some(first_day), Some(last_day)) = (
            sessions.iter().map(|s| s.date).min(),
            sessions.iter().map(|s| s.date).max(),
        ) else {
            return Ok(Vec::new());
        };

        let mut windows: Vec<BiweekWindow> =
            window_bounds(first_day, last_day, self.config.biweek_days)
                .into_iter()
                .enumerate()
                .map(|(i, (start, end))| self.empty_window(i as u32 + 1, start, end))
                .collect();

        for session in sessions {
            let window = windows
                .iter_mut()
                .find(|w| w.contains(session.date))
                .ok_or_else(|| {
                    ComputeError::InvariantViolation(format!(
                        "session {} on {} falls outside every biweek window",
                        session.session_id, session.date
                    ))
                })?;
            accumulate(window, session);
        }

        for window in &mut windows {
            finalize(window);
        }

        let total = windows.len();
        if !self.config.include_empty_windows {
            windows.retain(|w| w.n_sessions > 0);
        }

        debug!(
            windows = windows.len(),
            empty_omitted = total - windows.len(),
            "biweekly windows built"
        );

        Ok(windows)
    }

    fn empty_window(&self, biweek_id: u32, start: NaiveDate, end: NaiveDate) -> BiweekWindow {
        let roles = self
            .config
            .roles
            .iter()
            .map(|role| {
                (
                    role,
                    RoleRates {
                        d: 0,
                        d7: 0,
                        d_per_100hr: f64::NAN,
                        d7_per_100hr: f64::NAN,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        BiweekWindow {
            biweek_id,
            biweek_start: start,
            biweek_end: end,
            total_minutes: 0.0,
            survey_hours: 0.0,
            n_sessions: 0,
            n_singletons: 0,
            all_roles_d: 0,
            all_roles_7d: 0,
            all_roles_d_per_100hr: f64::NAN,
            all_roles_7d_per_100hr: f64::NAN,
            roles,
        }
    }
}

fn accumulate(window: &mut BiweekWindow, session: &SessionSummary) {
    window.total_minutes += session.session_minutes;
    window.n_sessions += 1;
    if session.singleton_session {
        window.n_singletons += 1;
    }
    window.all_roles_d += session.all_roles_d;
    window.all_roles_7d += session.all_roles_7d;

    for (role, rates) in window.roles.iter_mut() {
        if let Some(counts) = session.role_counts.get(role) {
            rates.d += counts.d;
            rates.d7 += counts.d7;
        }
    }
}

fn finalize(window: &mut BiweekWindow) {
    let hours = window.total_minutes / 60.0;
    window.survey_hours = hours;
    window.all_roles_d_per_100hr = rate_per_100hr(f64::from(window.all_roles_d), hours);
    window.all_roles_7d_per_100hr = rate_per_100hr(f64::from(window.all_roles_7d), hours);
    for rates in window.roles.values_mut() {
        rates.d_per_100hr = rate_per_100hr(f64::from(rates.d), hours);
        rates.d7_per_100hr = rate_per_100hr(f64::from(rates.d7), hours);
    }
}
