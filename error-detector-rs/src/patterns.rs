//! # Pattern Tracker
//!
//! Keeps a pruned time series of occurrences per (endpoint, error code) and
//! derives the two signals the detector acts on: recurring patterns (many
//! occurrences in the last hour) and rapid bursts (occurrences seconds apart).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::event::PatternKey;

/// How long occurrences are retained per key
pub const PATTERN_WINDOW_HOURS: i64 = 24;

/// Occurrences within the last hour needed to call a pattern recurring
pub const RECURRING_THRESHOLD: usize = 5;

/// Inter-arrival time below which consecutive errors count as a burst
pub const BURST_INTERVAL_SECS: i64 = 10;

/// A pattern that qualified as recurring during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringPattern {
    pub key: PatternKey,
    /// Occurrences within the trailing hour
    pub occurrences: usize,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

/// A rapid error sequence detected on record
#[derive(Debug, Clone, PartialEq)]
pub struct RapidBurst {
    pub key: PatternKey,
    /// The inspected inter-arrival intervals, oldest first
    pub recent_intervals: Vec<Duration>,
    /// Occurrences retained for the key
    pub total_occurrences: usize,
}

/// Per-key statistics for `ErrorDetector::stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub count: usize,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub frequency_per_hour: usize,
}

/// Sliding-window occurrence tracker
#[derive(Debug, Default)]
pub struct PatternTracker {
    series: HashMap<PatternKey, VecDeque<DateTime<Utc>>>,
}

impl PatternTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn window() -> Duration {
        Duration::hours(PATTERN_WINDOW_HOURS)
    }

    /// Appends an occurrence and drops the key's entries older than the window
    pub fn record(&mut self, key: &PatternKey, timestamp: DateTime<Utc>) {
        let series = self.series.entry(key.clone()).or_default();
        series.push_back(timestamp);

        let cutoff = timestamp - Self::window();
        series.retain(|t| *t > cutoff);
    }

    /// Occurrences retained for a key
    pub fn occurrences(&self, key: &PatternKey) -> usize {
        self.series.get(key).map_or(0, VecDeque::len)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PatternKey> {
        self.series.keys()
    }

    fn recent(&self, key: &PatternKey, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.series
            .get(key)
            .map(|series| {
                series
                    .iter()
                    .copied()
                    .filter(|t| now - *t < Duration::hours(1))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when the key has at least `RECURRING_THRESHOLD` occurrences in the
    /// hour before `now`
    pub fn is_recurring(&self, key: &PatternKey, now: DateTime<Utc>) -> bool {
        self.recent(key, now).len() >= RECURRING_THRESHOLD
    }

    /// Inspects the (up to) two most recent inter-arrival intervals of the key.
    /// A burst needs at least two occurrences and every inspected interval
    /// under `BURST_INTERVAL_SECS`.
    pub fn rapid_burst(&self, key: &PatternKey) -> Option<RapidBurst> {
        let series = self.series.get(key)?;
        if series.len() < 2 {
            return None;
        }

        let intervals: Vec<Duration> = series
            .iter()
            .zip(series.iter().skip(1))
            .map(|(earlier, later)| *later - *earlier)
            .collect();
        let recent_intervals = intervals[intervals.len().saturating_sub(2)..].to_vec();

        let limit = Duration::seconds(BURST_INTERVAL_SECS);
        if recent_intervals.iter().all(|interval| *interval < limit) {
            Some(RapidBurst {
                key: key.clone(),
                recent_intervals,
                total_occurrences: series.len(),
            })
        } else {
            None
        }
    }

    /// Drops entries outside the window for every key and forgets empty keys
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Self::window();
        self.series.retain(|_, series| {
            series.retain(|t| *t > cutoff);
            !series.is_empty()
        });
    }

    /// Every key that currently qualifies as recurring, sorted by key
    pub fn recurring_patterns(&self, now: DateTime<Utc>) -> Vec<RecurringPattern> {
        let mut found: Vec<RecurringPattern> = self
            .series
            .keys()
            .filter_map(|key| {
                let recent = self.recent(key, now);
                if recent.len() < RECURRING_THRESHOLD {
                    return None;
                }
                Some(RecurringPattern {
                    key: key.clone(),
                    occurrences: recent.len(),
                    first_occurrence: *recent.iter().min()?,
                    last_occurrence: *recent.iter().max()?,
                })
            })
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    /// Statistics for every tracked key
    pub fn stats(&self, now: DateTime<Utc>) -> HashMap<String, PatternStats> {
        self.series
            .iter()
            .map(|(key, series)| {
                let stats = PatternStats {
                    count: series.len(),
                    first_seen: series.iter().min().copied(),
                    last_seen: series.iter().max().copied(),
                    frequency_per_hour: self.recent(key, now).len(),
                };
                (key.to_string(), stats)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn key() -> PatternKey {
        PatternKey::new("https://api.example.com/v1", "500")
    }

    #[test]
    fn test_five_in_an_hour_is_recurring_four_is_not() {
        let mut tracker = PatternTracker::new();
        let start = base();

        for i in 0..4 {
            tracker.record(&key(), start + Duration::minutes(i * 10));
        }
        let now = start + Duration::minutes(45);
        assert!(!tracker.is_recurring(&key(), now));

        tracker.record(&key(), start + Duration::minutes(44));
        assert!(tracker.is_recurring(&key(), now));
    }

    #[test]
    fn test_old_occurrences_do_not_count_towards_recurrence() {
        let mut tracker = PatternTracker::new();
        let start = base();
        for i in 0..5 {
            tracker.record(&key(), start + Duration::minutes(i));
        }

        assert!(tracker.is_recurring(&key(), start + Duration::minutes(30)));
        assert!(!tracker.is_recurring(&key(), start + Duration::minutes(90)));
    }

    #[test]
    fn test_record_prunes_entries_older_than_a_day() {
        let mut tracker = PatternTracker::new();
        let start = base();

        tracker.record(&key(), start);
        tracker.record(&key(), start + Duration::hours(23));
        assert_eq!(tracker.occurrences(&key()), 2);

        tracker.record(&key(), start + Duration::hours(25));
        assert_eq!(tracker.occurrences(&key()), 2);
    }

    #[test]
    fn test_two_errors_three_seconds_apart_is_a_burst() {
        let mut tracker = PatternTracker::new();
        tracker.record(&key(), base());
        assert!(tracker.rapid_burst(&key()).is_none());

        tracker.record(&key(), base() + Duration::seconds(3));
        let burst = tracker.rapid_burst(&key()).expect("burst expected");
        assert_eq!(burst.recent_intervals, vec![Duration::seconds(3)]);
        assert_eq!(burst.total_occurrences, 2);
    }

    #[test]
    fn test_two_errors_thirty_seconds_apart_is_not_a_burst() {
        let mut tracker = PatternTracker::new();
        tracker.record(&key(), base());
        tracker.record(&key(), base() + Duration::seconds(30));
        assert!(tracker.rapid_burst(&key()).is_none());
    }

    #[test]
    fn test_burst_requires_both_recent_intervals_to_be_short() {
        let mut tracker = PatternTracker::new();
        tracker.record(&key(), base());
        tracker.record(&key(), base() + Duration::seconds(30));
        tracker.record(&key(), base() + Duration::seconds(33));
        assert!(tracker.rapid_burst(&key()).is_none());

        tracker.record(&key(), base() + Duration::seconds(35));
        let burst = tracker.rapid_burst(&key()).expect("burst expected");
        assert_eq!(
            burst.recent_intervals,
            vec![Duration::seconds(3), Duration::seconds(2)]
        );
    }

    #[test]
    fn test_recurring_scan_and_prune() {
        let mut tracker = PatternTracker::new();
        let quiet = PatternKey::new("/quiet", "404");
        let now = base();

        for i in 0..6 {
            tracker.record(&key(), now - Duration::minutes(i * 5));
        }
        tracker.record(&quiet, now - Duration::hours(30));

        let found = tracker.recurring_patterns(now);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, key());
        assert_eq!(found[0].occurrences, 6);
        assert_eq!(found[0].first_occurrence, now - Duration::minutes(25));
        assert_eq!(found[0].last_occurrence, now);

        tracker.prune(now);
        assert_eq!(tracker.keys().count(), 1);
    }

    #[test]
    fn test_stats_use_joined_key() {
        let mut tracker = PatternTracker::new();
        let now = base();
        tracker.record(&key(), now - Duration::hours(2));
        tracker.record(&key(), now - Duration::minutes(1));

        let stats = tracker.stats(now);
        let entry = &stats["https://api.example.com/v1:500"];
        assert_eq!(entry.count, 2);
        assert_eq!(entry.frequency_per_hour, 1);
        assert_eq!(entry.last_seen, Some(now - Duration::minutes(1)));
    }
}
