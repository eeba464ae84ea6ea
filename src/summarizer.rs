//! Session-level summarization
//!
//! Rolls repaired scans up into one row per (entity, session) with duration,
//! counter diagnostics and per-role nest-building counts.

use crate::config::SurveyConfig;
use crate::types::{RepairedScan, Role, RoleCounts, SessionSummary};
use std::collections::BTreeMap;
use tracing::debug;

/// Behavior code for nest building
const NEST_BUILDING_CODE: &str = "D";

/// Location code of the nest tree itself
const NEST_TREE_LOCATION: f64 = 7.0;

/// Start counters a well-entered session can begin with
const EXPECTED_START_MINUTES: [f64; 2] = [0.0, 3.0];

/// Builds session summary rows
pub struct SessionSummarizer<'a> {
    config: &'a SurveyConfig,
}

impl<'a> SessionSummarizer<'a> {
    pub fn new(config: &'a SurveyConfig) -> Self {
        Self { config }
    }

    /// Summarize every session, ordered by entity then session id
    pub fn summarize(&self, repaired: &[RepairedScan]) -> Vec<SessionSummary> {
        let mut groups: BTreeMap<(Option<&str>, u64), Vec<&RepairedScan>> = BTreeMap::new();
        for scan in repaired {
            groups
                .entry((scan.scan.entity.as_deref(), scan.session_id))
                .or_default()
                .push(scan);
        }

        let summaries: Vec<SessionSummary> = groups
            .into_iter()
            .map(|((entity, session_id), rows)| self.summarize_session(entity, session_id, &rows))
            .collect();

        debug!(sessions = summaries.len(), "sessions summarized");
        summaries
    }

    fn summarize_session(
        &self,
        entity: Option<&str>,
        session_id: u64,
        rows: &[&RepairedScan],
    ) -> SessionSummary {
        // Groups are never empty: each was created by pushing a row
        let first = rows[0];
        let mut session_start = first.scan.timestamp;
        let mut session_end = first.scan.timestamp;
        let mut repaired_min = first.repaired_counter;
        let mut repaired_max = first.repaired_counter;
        let mut corrupt = false;

        for row in rows {
            session_start = session_start.min(row.scan.timestamp);
            session_end = session_end.max(row.scan.timestamp);
            repaired_min = repaired_min.min(row.repaired_counter);
            repaired_max = repaired_max.max(row.repaired_counter);
            corrupt |= row.counter_was_repaired();
        }

        let session_minutes = (session_end - session_start).num_milliseconds() as f64 / 60_000.0;

        let mut role_counts = BTreeMap::new();
        let mut all_roles_d = 0;
        let mut all_roles_7d = 0;
        for role in self.config.roles.iter() {
            let counts = count_nest_building(rows, role);
            all_roles_d += counts.d;
            all_roles_7d += counts.d7;
            role_counts.insert(role, counts);
        }

        let start_minutes = repaired_min;

        SessionSummary {
            session_id,
            entity: entity.map(str::to_string),
            date: session_start.date(),
            session_start,
            session_end,
            session_minutes,
            singleton_session: session_minutes < self.config.singleton_threshold_minutes,
            start_minutes,
            suspect_start_minutes: !start_minutes.is_nan()
                && !EXPECTED_START_MINUTES.contains(&start_minutes),
            minutes_corrupt_flag: corrupt,
            minutes_repaired_min: repaired_min,
            minutes_repaired_max: repaired_max,
            minutes_repaired_range: repaired_max - repaired_min,
            n_rows: rows.len(),
            all_roles_d,
            all_roles_7d,
            role_counts,
        }
    }
}

/// Count D rows inside the nest area (locations 1-7) and at the nest tree (7)
fn count_nest_building(rows: &[&RepairedScan], role: Role) -> RoleCounts {
    let mut counts = RoleCounts::default();

    for row in rows {
        let Some(obs) = row.scan.observation(role) else {
            continue;
        };
        if !obs.behavior_is(NEST_BUILDING_CODE) {
            continue;
        }
        let Some(location) = obs.location else {
            continue;
        };
        if location.fract() == 0.0 && (1.0..=NEST_TREE_LOCATION).contains(&location) {
            counts.d += 1;
        }
        if location == NEST_TREE_LOCATION {
            counts.d7 += 1;
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessionizer::Sessionizer;
    use crate::types::Scan;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn at(minutes: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            + Duration::minutes(minutes)
    }

    fn summarize(scans: Vec<Scan>) -> Vec<SessionSummary> {
        let config = SurveyConfig::default();
        let repaired = Sessionizer::new(&config).assign(scans);
        SessionSummarizer::new(&config).summarize(&repaired)
    }

    #[test]
    fn test_duration_and_singleton() {
        let summaries = summarize(vec![
            Scan::new(None, at(0), Some(0.0)),
            Scan::new(None, at(3), Some(3.0)),
            Scan::new(None, at(6), Some(6.0)),
            Scan::new(None, at(9), Some(9.0)),
            Scan::new(None, at(30), Some(0.0)),
            Scan::new(None, at(33), Some(3.0)),
        ]);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].session_minutes, 9.0);
        assert!(!summaries[0].singleton_session);
        assert_eq!(summaries[0].n_rows, 4);
        assert_eq!(summaries[1].session_minutes, 3.0);
        assert!(summaries[1].singleton_session);

        for s in &summaries {
            assert_eq!(s.singleton_session, s.session_minutes < 9.0);
        }
    }

    #[test]
    fn test_counter_diagnostics() {
        let summaries = summarize(vec![
            Scan::new(None, at(0), Some(0.0)),
            Scan::new(None, at(3), Some(3.0)),
            Scan::new(None, at(6), Some(60.0)),
            Scan::new(None, at(9), Some(9.0)),
        ]);
        let s = &summaries[0];

        assert!(s.minutes_corrupt_flag);
        assert_eq!(s.start_minutes, 0.0);
        assert!(!s.suspect_start_minutes);
        assert_eq!(s.minutes_repaired_min, 0.0);
        assert_eq!(s.minutes_repaired_max, 9.0);
        assert_eq!(s.minutes_repaired_range, 9.0);
    }

    #[test]
    fn test_clean_session_not_flagged() {
        let summaries = summarize(vec![
            Scan::new(None, at(0), Some(0.0)),
            Scan::new(None, at(3), Some(3.0)),
        ]);
        assert!(!summaries[0].minutes_corrupt_flag);
    }

    #[test]
    fn test_suspect_start_from_direct_input() {
        let config = SurveyConfig::default();
        let repaired = vec![RepairedScan {
            scan: Scan::new(None, at(0), Some(12.0)),
            session_id: 1,
            repaired_counter: 12.0,
        }];
        let summaries = SessionSummarizer::new(&config).summarize(&repaired);
        assert!(summaries[0].suspect_start_minutes);
    }

    #[test]
    fn test_nest_building_counts() {
        let summaries = summarize(vec![
            Scan::new(None, at(0), Some(0.0))
                .with_role(Role::Female, Some(7.0), Some("D"))
                .with_role(Role::Male, Some(3.0), Some("d")),
            Scan::new(None, at(3), Some(3.0))
                .with_role(Role::Female, Some(2.0), Some("D"))
                .with_role(Role::Male, Some(9.0), Some("D")),
            Scan::new(None, at(6), Some(6.0))
                .with_role(Role::Female, Some(7.0), Some("C"))
                .with_role(Role::Undiff1, Some(7.0), Some("D"))
                .with_role(Role::Undiff2, None, Some("D")),
        ]);
        let s = &summaries[0];

        let female = s.role_counts[&Role::Female];
        assert_eq!((female.d, female.d7), (2, 1));
        let male = s.role_counts[&Role::Male];
        assert_eq!((male.d, male.d7), (1, 0));
        let undiff1 = s.role_counts[&Role::Undiff1];
        assert_eq!((undiff1.d, undiff1.d7), (1, 1));
        let undiff2 = s.role_counts[&Role::Undiff2];
        assert_eq!((undiff2.d, undiff2.d7), (0, 0));

        assert_eq!(s.all_roles_d, 4);
        assert_eq!(s.all_roles_7d, 2);
        for counts in s.role_counts.values() {
            assert!(counts.d7 <= counts.d);
        }
    }

    #[test]
    fn test_sessions_grouped_per_entity() {
        let summaries = summarize(vec![
            Scan::new(Some("BOCR"), at(0), Some(0.0)),
            Scan::new(Some("BOCR"), at(3), Some(3.0)),
            Scan::new(Some("Erie"), at(0), Some(0.0)),
        ]);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].entity.as_deref(), Some("BOCR"));
        assert_eq!(summaries[1].entity.as_deref(), Some("Erie"));
        assert_eq!(summaries[1].session_id, 2);
        assert_eq!(summaries[1].date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }
}
