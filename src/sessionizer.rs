//! Hybrid time-gap sessionizer
//!
//! Sessions are cut purely on time gaps between consecutive scans of one
//! entity. The manual minutes counter never splits a session; it is only
//! checked against the expected cadence and repaired where it drifts.

use crate::config::SurveyConfig;
use crate::types::{RepairedScan, Scan};
use chrono::NaiveDateTime;
use tracing::debug;

/// Per-entity walk state
struct EntityCursor {
    previous_timestamp: Option<NaiveDateTime>,
    expected_counter: f64,
}

impl EntityCursor {
    fn new() -> Self {
        Self {
            previous_timestamp: None,
            expected_counter: 0.0,
        }
    }

    fn starts_session(&self, timestamp: NaiveDateTime, gap_seconds: i64) -> bool {
        match self.previous_timestamp {
            None => true,
            Some(prev) => (timestamp - prev).num_milliseconds() > gap_seconds * 1000,
        }
    }
}

/// Assigns session ids and repaired counters
pub struct Sessionizer<'a> {
    config: &'a SurveyConfig,
}

impl<'a> Sessionizer<'a> {
    pub fn new(config: &'a SurveyConfig) -> Self {
        Self { config }
    }

    /// Walk scans already sorted by (entity, timestamp).
    ///
    /// Session ids come from one counter shared by all entities, so they are
    /// unique across the run; the walk state itself is reset at each entity
    /// boundary.
    pub fn assign(&self, scans: Vec<Scan>) -> Vec<RepairedScan> {
        let gap_seconds = self.config.session_gap_seconds;
        let cadence = self.config.scan_interval_minutes;
        let tolerance = self.config.counter_tolerance;

        let mut repaired = Vec::with_capacity(scans.len());
        let mut session_counter: u64 = 0;
        let mut current_entity: Option<Option<String>> = None;
        let mut cursor = EntityCursor::new();

        for scan in scans {
            if current_entity.as_ref() != Some(&scan.entity) {
                current_entity = Some(scan.entity.clone());
                cursor = EntityCursor::new();
            }

            let repaired_counter = if cursor.starts_session(scan.timestamp, gap_seconds) {
                session_counter += 1;
                cursor.expected_counter = 0.0;
                0.0
            } else {
                let expected = cursor.expected_counter;
                let value = match scan.raw_counter {
                    Some(raw) if (raw - expected).abs() <= tolerance => raw,
                    _ => expected,
                };
                cursor.expected_counter = value + cadence;
                value
            };

            cursor.previous_timestamp = Some(scan.timestamp);
            repaired.push(RepairedScan {
                scan,
                session_id: session_counter,
                repaired_counter,
            });
        }

        debug!(
            scans = repaired.len(),
            sessions = session_counter,
            "sessions assigned"
        );

        repaired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn scans_at(entity: Option<&str>, offsets_and_counters: &[(i64, Option<f64>)]) -> Vec<Scan> {
        offsets_and_counters
            .iter()
            .map(|(offset, counter)| {
                Scan::new(entity, base_time() + Duration::minutes(*offset), *counter)
            })
            .collect()
    }

    fn ids_and_values(repaired: &[RepairedScan]) -> (Vec<u64>, Vec<f64>) {
        (
            repaired.iter().map(|r| r.session_id).collect(),
            repaired.iter().map(|r| r.repaired_counter).collect(),
        )
    }

    #[test]
    fn test_gap_starts_new_session() {
        let config = SurveyConfig::default();
        let scans = scans_at(
            None,
            &[(0, Some(0.0)), (3, Some(3.0)), (6, Some(6.0)), (20, Some(0.0))],
        );
        let repaired = Sessionizer::new(&config).assign(scans);

        let (ids, values) = ids_and_values(&repaired);
        assert_eq!(ids, vec![1, 1, 1, 2]);
        assert_eq!(values, vec![0.0, 3.0, 6.0, 0.0]);
    }

    #[test]
    fn test_exactly_eight_minutes_continues() {
        let config = SurveyConfig::default();
        let mut scans = scans_at(None, &[(0, Some(0.0)), (8, Some(3.0))]);
        scans.push(Scan::new(
            None,
            base_time() + Duration::minutes(16) + Duration::seconds(1),
            Some(6.0),
        ));
        let repaired = Sessionizer::new(&config).assign(scans);

        let (ids, _) = ids_and_values(&repaired);
        assert_eq!(ids, vec![1, 1, 2]);
    }

    #[test]
    fn test_sub_second_excess_gap_splits() {
        let config = SurveyConfig::default();
        let scans = vec![
            Scan::new(None, base_time(), Some(0.0)),
            Scan::new(
                None,
                base_time() + Duration::seconds(480) + Duration::milliseconds(500),
                Some(3.0),
            ),
            Scan::new(
                None,
                base_time() + Duration::seconds(960) + Duration::milliseconds(500),
                Some(3.0),
            ),
        ];
        let repaired = Sessionizer::new(&config).assign(scans);

        let (ids, _) = ids_and_values(&repaired);
        assert_eq!(ids, vec![1, 2, 2]);
    }

    #[test]
    fn test_corrupt_and_missing_counters_repaired() {
        let config = SurveyConfig::default();
        let scans = scans_at(
            None,
            &[
                (0, Some(0.0)),
                (3, Some(3.0)),
                (6, Some(33.0)), // typo, far from expected 6
                (9, None),       // blank
                (12, Some(11.0)), // within tolerance of 12
                (15, Some(14.0)),
            ],
        );
        let repaired = Sessionizer::new(&config).assign(scans);

        let (_, values) = ids_and_values(&repaired);
        assert_eq!(values, vec![0.0, 3.0, 6.0, 9.0, 11.0, 14.0]);
        assert!(repaired[2].counter_was_repaired());
        assert!(repaired[3].counter_was_repaired());
        assert!(!repaired[4].counter_was_repaired());
    }

    #[test]
    fn test_first_scan_anchors_at_zero() {
        let config = SurveyConfig::default();
        let scans = scans_at(None, &[(0, Some(27.0)), (3, Some(3.0)), (6, Some(6.0))]);
        let repaired = Sessionizer::new(&config).assign(scans);

        let (_, values) = ids_and_values(&repaired);
        assert_eq!(values, vec![0.0, 3.0, 6.0]);
        assert!(repaired[0].counter_was_repaired());
        assert!(!repaired[1].counter_was_repaired());
    }

    #[test]
    fn test_entities_do_not_share_state() {
        let config = SurveyConfig::default();
        let mut scans = scans_at(Some("BOCR"), &[(0, Some(0.0)), (3, Some(3.0))]);
        // Same wall-clock minute on another nest must still open a new session
        scans.extend(scans_at(Some("Erie"), &[(4, Some(0.0)), (7, Some(3.0))]));
        let repaired = Sessionizer::new(&config).assign(scans);

        let (ids, values) = ids_and_values(&repaired);
        assert_eq!(ids, vec![1, 1, 2, 2]);
        assert_eq!(values, vec![0.0, 3.0, 0.0, 3.0]);
    }

    #[test]
    fn test_partition_respects_gap_threshold() {
        let config = SurveyConfig::default();
        let offsets = [0, 3, 6, 15, 18, 30, 33, 36, 39, 60];
        let scans = scans_at(
            None,
            &offsets.iter().map(|o| (*o, Some(0.0))).collect::<Vec<_>>(),
        );
        let repaired = Sessionizer::new(&config).assign(scans);

        for pair in repaired.windows(2) {
            let gap = (pair[1].scan.timestamp - pair[0].scan.timestamp).num_seconds();
            if pair[0].session_id == pair[1].session_id {
                assert!(gap <= 480);
            } else {
                assert!(gap > 480);
                assert_eq!(pair[1].session_id, pair[0].session_id + 1);
            }
        }
        assert_eq!(repaired.last().unwrap().session_id, 4);
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let config = SurveyConfig::default();
        let scans = scans_at(
            Some("Hygiene"),
            &[(0, Some(0.0)), (3, None), (6, Some(40.0)), (30, Some(3.0))],
        );
        let first = Sessionizer::new(&config).assign(scans.clone());
        let second = Sessionizer::new(&config).assign(scans);
        assert_eq!(first, second);
    }
}
