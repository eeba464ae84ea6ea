//! Rates and Poisson confidence intervals
//!
//! Rates are expressed per 100 survey hours. Intervals use the normal
//! approximation to Poisson variance, with a fixed fallback standard error
//! when no events were observed so the upper bound stays informative.

use crate::error::ComputeError;
use crate::schema::coerce_number;
use crate::table::{
    session_record, Record, ALL_ROLES_7D_COLUMN, ALL_ROLES_D_COLUMN, SESSION_MINUTES_COLUMN,
};
use crate::types::{
    ConfidenceInterval, Role, RoleInterval, RoleSet, RoleStats, SessionStats, SessionSummary,
    StatsSummary,
};
use tracing::debug;

/// Two-sided 95% normal quantile
pub const Z_95: f64 = 1.96;

/// Exposure basis for reported rates
pub const RATE_BASIS_HOURS: f64 = 100.0;

/// `count / survey_hours * 100`, NaN when exposure is not positive
pub fn rate_per_100hr(count: f64, survey_hours: f64) -> f64 {
    if survey_hours > 0.0 {
        count / survey_hours * RATE_BASIS_HOURS
    } else {
        f64::NAN
    }
}

/// Poisson 95% interval for a rate, per 100 exposure hours
///
/// With `count == 0` the standard error falls back to `1.96 / exposure`.
pub fn poisson_ci(count: f64, exposure_hours: f64) -> ConfidenceInterval {
    if exposure_hours <= 0.0 || exposure_hours.is_nan() {
        return ConfidenceInterval {
            low: f64::NAN,
            high: f64::NAN,
        };
    }

    let rate = count / exposure_hours;
    let se = if count > 0.0 {
        count.sqrt() / exposure_hours
    } else {
        Z_95 / exposure_hours
    };

    ConfidenceInterval {
        low: (rate - Z_95 * se).max(0.0) * RATE_BASIS_HOURS,
        high: (rate + Z_95 * se) * RATE_BASIS_HOURS,
    }
}

/// Column sums pulled from a session table
struct SessionTotals {
    total_minutes: f64,
    all_roles_d: f64,
    all_roles_7d: f64,
    roles: Vec<(Role, f64, f64)>,
}

/// Computes the summary, by-role and interval tables from a session table
pub struct StatsEngine<'a> {
    roles: &'a RoleSet,
}

impl<'a> StatsEngine<'a> {
    pub fn new(roles: &'a RoleSet) -> Self {
        Self { roles }
    }

    /// Statistics over typed session summaries
    pub fn from_sessions(&self, sessions: &[SessionSummary]) -> Result<SessionStats, ComputeError> {
        let records: Vec<Record> = sessions
            .iter()
            .map(|s| session_record(s, self.roles))
            .collect();
        self.from_records(&records)
    }

    /// Statistics over a session table addressed by column name.
    ///
    /// `session_minutes`, `all_roles_D` and `all_roles_7D` are required; a role
    /// is reported only when both its `<role>_D` and `<role>_7D` columns exist.
    /// An empty table yields NaN rates for every configured role.
    pub fn from_records(&self, records: &[Record]) -> Result<SessionStats, ComputeError> {
        let totals = if records.is_empty() {
            SessionTotals {
                total_minutes: 0.0,
                all_roles_d: 0.0,
                all_roles_7d: 0.0,
                roles: self.roles.iter().map(|r| (r, 0.0, 0.0)).collect(),
            }
        } else {
            self.sum_columns(records)?
        };

        Ok(self.compute(&totals))
    }

    fn sum_columns(&self, records: &[Record]) -> Result<SessionTotals, ComputeError> {
        let has_column = |name: &str| records.iter().any(|r| r.contains_key(name));

        let missing: Vec<&str> = [SESSION_MINUTES_COLUMN, ALL_ROLES_D_COLUMN, ALL_ROLES_7D_COLUMN]
            .into_iter()
            .filter(|c| !has_column(*c))
            .collect();
        if !missing.is_empty() {
            return Err(ComputeError::missing_columns(missing));
        }

        let sum = |name: &str| -> f64 {
            records
                .iter()
                .filter_map(|r| r.get(name).and_then(coerce_number))
                .sum()
        };

        let roles = self
            .roles
            .iter()
            .filter_map(|role| {
                let d_col = role.d_column();
                let d7_col = role.d7_column();
                if has_column(d_col.as_str()) && has_column(d7_col.as_str()) {
                    Some((role, sum(d_col.as_str()), sum(d7_col.as_str())))
                } else {
                    debug!(role = role.as_str(), "role columns absent, skipping");
                    None
                }
            })
            .collect();

        Ok(SessionTotals {
            total_minutes: sum(SESSION_MINUTES_COLUMN),
            all_roles_d: sum(ALL_ROLES_D_COLUMN),
            all_roles_7d: sum(ALL_ROLES_7D_COLUMN),
            roles,
        })
    }

    fn compute(&self, totals: &SessionTotals) -> SessionStats {
        let survey_hours = totals.total_minutes / 60.0;

        let summary = StatsSummary {
            total_minutes: totals.total_minutes,
            survey_hours,
            all_roles_d_total: totals.all_roles_d,
            all_roles_7d_total: totals.all_roles_7d,
            all_roles_d_per_100hr: rate_per_100hr(totals.all_roles_d, survey_hours),
            all_roles_7d_per_100hr: rate_per_100hr(totals.all_roles_7d, survey_hours),
            d_ci: poisson_ci(totals.all_roles_d, survey_hours),
            d7_ci: poisson_ci(totals.all_roles_7d, survey_hours),
        };

        // Every role is measured against the total survey hours
        let by_role = totals
            .roles
            .iter()
            .map(|&(role, d, d7)| RoleStats {
                role,
                role_d_total: d,
                role_7d_total: d7,
                role_d_per_100hr: rate_per_100hr(d, survey_hours),
                role_7d_per_100hr: rate_per_100hr(d7, survey_hours),
            })
            .collect();

        let intervals = totals
            .roles
            .iter()
            .map(|&(role, d, d7)| RoleInterval {
                role,
                d_ci: poisson_ci(d, survey_hours),
                d7_ci: poisson_ci(d7, survey_hours),
            })
            .collect();

        SessionStats {
            summary,
            by_role,
            intervals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_poisson_ci_zero_count() {
        let ci = poisson_ci(0.0, 10.0);
        assert_eq!(ci.low, 0.0);
        // se falls back to 1.96 / 10, so the upper bound is 1.96 * 1.96 / 10 * 100
        assert!((ci.high - 38.416).abs() < 1e-9);
    }

    #[test]
    fn test_poisson_ci_positive_count() {
        let ci = poisson_ci(5.0, 10.0);
        assert!((ci.low - 6.173).abs() < 0.01);
        assert!((ci.high - 93.827).abs() < 0.01);
        assert!((rate_per_100hr(5.0, 10.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_poisson_ci_lower_bound_clamped() {
        let ci = poisson_ci(1.0, 1.0);
        assert_eq!(ci.low, 0.0);
        assert!((ci.high - 296.0).abs() < 1e-9);
    }

    #[test]
    fn test_undefined_exposure_is_nan() {
        let ci = poisson_ci(3.0, 0.0);
        assert!(ci.low.is_nan() && ci.high.is_nan());
        assert!(poisson_ci(3.0, -1.0).high.is_nan());
        assert!(rate_per_100hr(3.0, 0.0).is_nan());
        assert_eq!(rate_per_100hr(0.0, 2.0), 0.0);
    }

    #[test]
    fn test_stats_from_records() {
        let roles = RoleSet::default();
        let records = vec![
            record(json!({
                "session_minutes": 300.0, "all_roles_D": 3, "all_roles_7D": 1,
                "female_D": 2, "female_7D": 1, "male_D": 1, "male_7D": 0
            })),
            record(json!({
                "session_minutes": 300.0, "all_roles_D": 2, "all_roles_7D": 0,
                "female_D": 2, "female_7D": 0, "male_D": 0, "male_7D": 0
            })),
        ];
        let stats = StatsEngine::new(&roles).from_records(&records).unwrap();

        assert_eq!(stats.summary.total_minutes, 600.0);
        assert_eq!(stats.summary.survey_hours, 10.0);
        assert_eq!(stats.summary.all_roles_d_total, 5.0);
        assert!((stats.summary.all_roles_d_per_100hr - 50.0).abs() < 1e-9);
        assert!((stats.summary.d_ci.low - 6.173).abs() < 0.01);

        // undiff columns are absent, so only two roles are reported
        assert_eq!(stats.by_role.len(), 2);
        assert_eq!(stats.by_role[0].role, Role::Female);
        assert_eq!(stats.by_role[0].role_d_total, 4.0);
        assert!((stats.by_role[0].role_d_per_100hr - 40.0).abs() < 1e-9);
        assert_eq!(stats.intervals[1].role, Role::Male);
        assert!((stats.intervals[1].d7_ci.high - 38.416).abs() < 1e-9);
    }

    #[test]
    fn test_stats_missing_required_column() {
        let roles = RoleSet::default();
        let records = vec![record(json!({"session_minutes": 30.0, "all_roles_D": 1}))];
        match StatsEngine::new(&roles).from_records(&records) {
            Err(ComputeError::Schema { missing }) => {
                assert_eq!(missing, vec!["all_roles_7D".to_string()])
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_stats_on_empty_table() {
        let roles = RoleSet::default();
        let stats = StatsEngine::new(&roles).from_records(&[]).unwrap();
        assert_eq!(stats.summary.survey_hours, 0.0);
        assert!(stats.summary.all_roles_d_per_100hr.is_nan());
        assert!(stats.summary.d_ci.low.is_nan());
        assert_eq!(stats.by_role.len(), 4);
    }
}
