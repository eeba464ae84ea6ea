//! Period aggregation over raw scans
//!
//! Independent of sessions: scans are screened for sex-data quality, bucketed
//! into calendar bins of a fixed width and their indicator columns summed.

use crate::config::{PeriodConfig, PeriodWidth, SexFilterScope, SurveyConfig};
use crate::error::ComputeError;
use crate::types::{MetricTotal, PeriodBin, Role, Scan};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Counts behind one period run, for QC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub scans_in: usize,
    pub sex_filter_rows_excluded: usize,
    pub periods_discarded: usize,
    pub sex_filter_threshold: f64,
}

/// Period bins plus their accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodOutput {
    pub bins: Vec<PeriodBin>,
    pub report: PeriodReport,
}

/// Monday on or before `date`
pub fn week_anchor(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Role location tallies for one filter scope
#[derive(Debug, Default)]
struct SexTally {
    sexed: usize,
    total: usize,
}

impl SexTally {
    /// `(female + male) / all roles`, 0 when nothing was observed
    fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.sexed as f64 / self.total as f64
        }
    }
}

/// Buckets scans into period bins and sums indicator columns
pub struct PeriodAggregator<'a> {
    config: &'a PeriodConfig,
    scan_minutes: f64,
}

impl<'a> PeriodAggregator<'a> {
    pub fn new(config: &'a PeriodConfig, survey: &SurveyConfig) -> Self {
        Self {
            config,
            scan_minutes: survey.scan_interval_minutes,
        }
    }

    pub fn aggregate(&self, scans: &[Scan]) -> Result<PeriodOutput, ComputeError> {
        self.config.validate()?;

        let mut report = PeriodReport {
            scans_in: scans.len(),
            sex_filter_threshold: self.config.min_valid_sex_ratio,
            ..PeriodReport::default()
        };

        let metrics = self.resolve_metrics(scans)?;

        let Some(first_date) = scans.iter().map(Scan::date).min() else {
            return Ok(PeriodOutput {
                bins: Vec::new(),
                report,
            });
        };
        let anchor = match self.config.width {
            PeriodWidth::Day => first_date,
            PeriodWidth::Weeks(_) => week_anchor(first_date),
        };

        let kept = self.apply_sex_filter(scans, anchor);
        report.sex_filter_rows_excluded = scans.len() - kept.len();
        if report.sex_filter_rows_excluded > 0 {
            warn!(
                excluded = report.sex_filter_rows_excluded,
                threshold = self.config.min_valid_sex_ratio,
                "scans removed by sex-data filter"
            );
        }

        let mut groups: BTreeMap<NaiveDate, Vec<&Scan>> = BTreeMap::new();
        for scan in kept {
            groups
                .entry(self.bin_start(scan.date(), anchor))
                .or_default()
                .push(scan);
        }

        let mut bins = Vec::with_capacity(groups.len());
        for (start, members) in groups {
            if members.len() <= self.config.min_scans {
                report.periods_discarded += 1;
                continue;
            }
            bins.push(self.build_bin(start, &members, &metrics));
        }

        if report.periods_discarded > 0 {
            warn!(
                discarded = report.periods_discarded,
                min_scans = self.config.min_scans,
                "periods with too few scans discarded"
            );
        }
        debug!(
            bins = bins.len(),
            width = %self.config.width.code(),
            "period aggregation complete"
        );

        Ok(PeriodOutput { bins, report })
    }

    /// Selected metrics, or every indicator present when none were selected
    fn resolve_metrics(&self, scans: &[Scan]) -> Result<Vec<String>, ComputeError> {
        let available: BTreeSet<&str> = scans
            .iter()
            .flat_map(|s| s.indicators.keys().map(String::as_str))
            .collect();

        if self.config.metrics.is_empty() {
            return Ok(available.into_iter().map(str::to_string).collect());
        }

        for metric in &self.config.metrics {
            if !available.contains(metric.as_str()) {
                return Err(ComputeError::UnknownMetric(metric.clone()));
            }
        }
        Ok(self.config.metrics.clone())
    }

    fn bin_start(&self, date: NaiveDate, anchor: NaiveDate) -> NaiveDate {
        let width = self.config.width.days();
        let offset = (date - anchor).num_days().div_euclid(width);
        anchor + Duration::days(offset * width)
    }

    fn scope_key(&self, scan: &Scan, anchor: NaiveDate) -> NaiveDate {
        match self.config.sex_filter_scope {
            SexFilterScope::Date => scan.date(),
            SexFilterScope::Period => self.bin_start(scan.date(), anchor),
        }
    }

    fn apply_sex_filter<'s>(&self, scans: &'s [Scan], anchor: NaiveDate) -> Vec<&'s Scan> {
        let mut tallies: BTreeMap<NaiveDate, SexTally> = BTreeMap::new();
        for scan in scans {
            let tally = tallies.entry(self.scope_key(scan, anchor)).or_default();
            for role in Role::ALL {
                let observed = scan
                    .observation(role)
                    .and_then(|o| o.location)
                    .map_or(false, |loc| self.config.is_observed_location(loc));
                if observed {
                    tally.total += 1;
                    if role.is_sexed() {
                        tally.sexed += 1;
                    }
                }
            }
        }

        scans
            .iter()
            .filter(|scan| {
                tallies
                    .get(&self.scope_key(scan, anchor))
                    .map_or(false, |t| t.ratio() >= self.config.min_valid_sex_ratio)
            })
            .collect()
    }

    fn build_bin(&self, start: NaiveDate, members: &[&Scan], metrics: &[String]) -> PeriodBin {
        let n = members.len();
        let metrics = metrics
            .iter()
            .map(|name| {
                let total: f64 = members
                    .iter()
                    .filter_map(|s| s.indicators.get(name))
                    .sum();
                let percent = self
                    .config
                    .normalize
                    .then(|| total / (n as f64 * self.scan_minutes) * 100.0);
                MetricTotal {
                    metric: name.clone(),
                    total,
                    percent,
                }
            })
            .collect();

        PeriodBin {
            period_start: start,
            period_end: start + Duration::days(self.config.width.days() - 1),
            num_observations: n,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(day: u32, minute: i64) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            + Duration::minutes(minute)
    }

    /// Scan with both adults located inside the nest area
    fn sexed_scan(day: u32, minute: i64, building: f64) -> Scan {
        Scan::new(Some("Hygiene"), at(day, minute), Some(minute as f64))
            .with_role(Role::Female, Some(3.0), Some("D"))
            .with_role(Role::Male, Some(10.0), Some("P"))
            .with_indicator("AF_NestBuilding", building)
    }

    fn daily_config() -> PeriodConfig {
        PeriodConfig {
            width: PeriodWidth::Day,
            normalize: true,
            ..PeriodConfig::default()
        }
    }

    #[test]
    fn test_week_anchor_is_monday() {
        // 2024-05-01 is a Wednesday
        let wednesday = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(week_anchor(wednesday), NaiveDate::from_ymd_opt(2024, 4, 29).unwrap());
        let monday = NaiveDate::from_ymd_opt(2024, 4, 29).unwrap();
        assert_eq!(week_anchor(monday), monday);
    }

    #[test]
    fn test_percent_of_available_time() {
        let config = daily_config();
        let survey = SurveyConfig::default();
        let scans = vec![
            sexed_scan(1, 0, 3.0),
            sexed_scan(1, 3, 3.0),
            sexed_scan(1, 6, 0.0),
            sexed_scan(1, 9, 0.0),
        ];
        let out = PeriodAggregator::new(&config, &survey).aggregate(&scans).unwrap();

        assert_eq!(out.bins.len(), 1);
        let bin = &out.bins[0];
        assert_eq!(bin.num_observations, 4);
        assert_eq!(bin.label(), "2024-05-01 to 2024-05-01");
        let metric = bin.metric("AF_NestBuilding").unwrap();
        assert_eq!(metric.total, 6.0);
        assert_eq!(metric.percent, Some(50.0));
    }

    #[test]
    fn test_small_bins_discarded() {
        let config = daily_config();
        let survey = SurveyConfig::default();
        let mut scans: Vec<Scan> = (0..4).map(|i| sexed_scan(1, i * 3, 1.0)).collect();
        scans.extend((0..3).map(|i| sexed_scan(2, i * 3, 1.0)));
        let out = PeriodAggregator::new(&config, &survey).aggregate(&scans).unwrap();

        assert_eq!(out.bins.len(), 1);
        assert_eq!(out.report.periods_discarded, 1);
        assert!(out.bins.iter().all(|b| b.num_observations > 3));
    }

    #[test]
    fn test_sex_filter_removes_low_ratio_dates() {
        let config = daily_config();
        let survey = SurveyConfig::default();
        let mut scans: Vec<Scan> = (0..4).map(|i| sexed_scan(1, i * 3, 1.0)).collect();
        // Day 2: only undifferentiated birds observed
        scans.extend((0..5).map(|i| {
            Scan::new(Some("Hygiene"), at(2, i * 3), Some(0.0))
                .with_role(Role::Undiff1, Some(2.0), Some("D"))
                .with_indicator("AF_NestBuilding", 3.0)
        }));
        // Day 3: nothing located at all, ratio is undefined
        scans.extend((0..5).map(|i| {
            Scan::new(Some("Hygiene"), at(3, i * 3), Some(0.0))
                .with_role(Role::Female, Some(99.0), None)
                .with_indicator("AF_NestBuilding", 3.0)
        }));
        let out = PeriodAggregator::new(&config, &survey).aggregate(&scans).unwrap();

        assert_eq!(out.report.sex_filter_rows_excluded, 10);
        assert_eq!(out.bins.len(), 1);
        assert_eq!(out.bins[0].period_start, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }

    #[test]
    fn test_period_scope_pools_dates() {
        let config = PeriodConfig {
            width: PeriodWidth::Weeks(1),
            sex_filter_scope: SexFilterScope::Period,
            ..PeriodConfig::default()
        };
        let survey = SurveyConfig::default();
        let mut scans: Vec<Scan> = (0..19).map(|i| sexed_scan(1, i * 3, 1.0)).collect();
        // One undifferentiated-only scan on another day of the same week
        scans.push(
            Scan::new(Some("Hygiene"), at(2, 0), Some(0.0))
                .with_role(Role::Undiff2, Some(5.0), None)
                .with_role(Role::Undiff1, Some(5.0), None),
        );
        let out = PeriodAggregator::new(&config, &survey).aggregate(&scans).unwrap();

        // 38 sexed of 40 located is 0.95, so the whole week survives
        assert_eq!(out.report.sex_filter_rows_excluded, 0);
        assert_eq!(out.bins.len(), 1);
        assert_eq!(out.bins[0].num_observations, 20);
        assert_eq!(out.bins[0].period_start, NaiveDate::from_ymd_opt(2024, 4, 29).unwrap());
        assert_eq!(out.bins[0].period_end, NaiveDate::from_ymd_opt(2024, 5, 5).unwrap());
        assert_eq!(out.bins[0].metrics[0].percent, None);
    }

    #[test]
    fn test_fixed_width_bins_are_contiguous() {
        let config = PeriodConfig {
            width: PeriodWidth::Weeks(2),
            ..PeriodConfig::default()
        };
        let survey = SurveyConfig::default();
        let mut scans = Vec::new();
        for day in [1, 12, 13, 20, 27] {
            scans.extend((0..4).map(|i| sexed_scan(day, i * 3, 1.0)));
        }
        let out = PeriodAggregator::new(&config, &survey).aggregate(&scans).unwrap();

        let labels: Vec<String> = out.bins.iter().map(PeriodBin::label).collect();
        assert_eq!(
            labels,
            vec![
                "2024-04-29 to 2024-05-12",
                "2024-05-13 to 2024-05-26",
                "2024-05-27 to 2024-06-09",
            ]
        );
        assert_eq!(out.bins[0].num_observations, 8);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let config = PeriodConfig {
            metrics: vec!["AF_Perching".to_string()],
            ..daily_config()
        };
        let survey = SurveyConfig::default();
        let scans = vec![sexed_scan(1, 0, 1.0)];
        match PeriodAggregator::new(&config, &survey).aggregate(&scans) {
            Err(ComputeError::UnknownMetric(name)) => assert_eq!(name, "AF_Perching"),
            other => panic!("expected unknown metric, got {:?}", other),
        }
    }

    #[test]
    fn test_selected_metric_missing_on_some_scans_counts_zero() {
        let config = PeriodConfig {
            metrics: vec!["AM_Present".to_string()],
            ..daily_config()
        };
        let survey = SurveyConfig::default();
        let mut scans: Vec<Scan> = (0..4).map(|i| sexed_scan(1, i * 3, 1.0)).collect();
        scans[0] = scans[0].clone().with_indicator("AM_Present", 3.0);
        let out = PeriodAggregator::new(&config, &survey).aggregate(&scans).unwrap();

        assert_eq!(out.bins[0].metrics.len(), 1);
        assert_eq!(out.bins[0].metrics[0].total, 3.0);
        assert_eq!(out.bins[0].metrics[0].percent, Some(25.0));
    }
}
