//! # Error Ledger
//!
//! Bounded in-memory history of recent errors, backed by an append-only
//! newline-delimited JSON log that is replayed on startup.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::event::ErrorEvent;
use crate::monitoring;
use crate::types::Result;

/// Default number of events kept in memory
pub const DEFAULT_CAPACITY: usize = 1000;

/// Number of entries reported in the top-N rankings of a summary
const TOP_N: usize = 5;

/// Append-only JSONL file holding one `ErrorEvent` per line
#[derive(Debug, Clone)]
pub struct DurableLog {
    path: PathBuf,
}

impl DurableLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a single event as one line
    pub fn append(&self, event: &ErrorEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Reads every parseable event in file order. A missing file is an empty
    /// log; malformed lines are skipped with a warning.
    pub fn replay(&self) -> Result<Vec<ErrorEvent>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No error log file found");
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut events = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<ErrorEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Failed to parse error log line"
                ),
            }
        }

        Ok(events)
    }
}

/// Aggregate view over the in-memory history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// Events currently held in memory
    pub total_errors_tracked: usize,
    /// Events in the trailing hour
    pub errors_last_hour: usize,
    /// Events in the trailing 24 hours
    pub errors_last_day: usize,
    /// Most frequent error codes, most frequent first
    #[serde(with = "ranked")]
    pub top_error_codes: Vec<(String, usize)>,
    /// Endpoints with the most errors, most frequent first
    #[serde(with = "ranked")]
    pub top_error_endpoints: Vec<(String, usize)>,
}

/// Serializes a ranking the same way `LedgerSummary` does
pub struct Ranked<'a>(pub &'a [(String, usize)]);

impl Serialize for Ranked<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ranked::serialize(self.0, serializer)
    }
}

/// Ranked counts as a JSON object (`{"500": 3, "404": 1}`), keys written in
/// rank order.
mod ranked {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(ranking: &[(String, usize)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(ranking.iter().map(|(key, count)| (key, count)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, usize)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RankedVisitor;

        impl<'de> Visitor<'de> for RankedVisitor {
            type Value = Vec<(String, usize)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of counts")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut ranking = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, usize>()? {
                    ranking.push(entry);
                }
                Ok(ranking)
            }
        }

        deserializer.deserialize_map(RankedVisitor)
    }
}

/// Filters for `ErrorLedger::search`. Unset fields match everything; time
/// bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub error_code: Option<String>,
    pub endpoint: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_code(mut self, code: impl ToString) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    fn matches(&self, event: &ErrorEvent) -> bool {
        if let Some(code) = &self.error_code {
            if &event.error_code != code {
                return false;
            }
        }
        if let Some(endpoint) = &self.endpoint {
            if &event.endpoint != endpoint {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}

/// Per-code rate over one interval and its change against the previous one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeTrend {
    pub current_count: usize,
    pub previous_count: usize,
    pub percent_change: f64,
}

/// Error rates over a trailing interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRates {
    pub interval_minutes: i64,
    pub total_errors: usize,
    /// Errors per minute, by code
    pub error_rates: HashMap<String, f64>,
    pub trends: HashMap<String, CodeTrend>,
    pub timestamp: DateTime<Utc>,
}

/// Bounded error history with a durable log behind it
#[derive(Debug)]
pub struct ErrorLedger {
    capacity: usize,
    events: VecDeque<ErrorEvent>,
    /// Lifetime occurrence count per code, including evicted events
    error_counts: HashMap<String, u64>,
    log: Option<DurableLog>,
}

impl ErrorLedger {
    /// Creates an empty ledger. A capacity of zero is raised to one.
    pub fn new(capacity: usize, log: Option<DurableLog>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            error_counts: HashMap::new(),
            log,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in ledger order, oldest first
    pub fn events(&self) -> impl Iterator<Item = &ErrorEvent> {
        self.events.iter()
    }

    pub fn error_counts(&self) -> &HashMap<String, u64> {
        &self.error_counts
    }

    /// Points the ledger at a different durable log; history is kept
    pub fn set_log(&mut self, log: Option<DurableLog>) {
        self.log = log;
    }

    /// Records an event in memory and in the durable log. Log failures are
    /// reported through tracing and metrics, never to the caller.
    pub fn track(&mut self, event: ErrorEvent) {
        if let Some(log) = &self.log {
            if let Err(e) = log.append(&event) {
                warn!(
                    path = %log.path().display(),
                    error = %e,
                    "Failed to append error to durable log"
                );
                monitoring::record_log_write_failure();
            }
        }

        self.remember(event);
    }

    fn remember(&mut self, event: ErrorEvent) {
        *self.error_counts.entry(event.error_code.clone()).or_insert(0) += 1;

        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Replays the durable log into memory. Returns the replayed events that
    /// fall within `pattern_window` of `now`, for the pattern tracker.
    pub fn load(&mut self, now: DateTime<Utc>, pattern_window: Duration) -> Vec<ErrorEvent> {
        let Some(log) = self.log.clone() else {
            return Vec::new();
        };

        let replayed = match log.replay() {
            Ok(events) => events,
            Err(e) => {
                warn!(path = %log.path().display(), error = %e, "Failed to load error log");
                return Vec::new();
            }
        };

        let mut recent = Vec::new();
        for event in replayed {
            if now - event.timestamp < pattern_window {
                recent.push(event.clone());
            }
            self.remember(event);
        }

        info!(
            path = %log.path().display(),
            loaded = self.events.len(),
            recent = recent.len(),
            "Loaded errors from durable log"
        );

        recent
    }

    /// Counts and rankings computed over the in-memory history
    pub fn summary(&self, now: DateTime<Utc>) -> LedgerSummary {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::days(1);

        let mut errors_last_hour = 0;
        let mut errors_last_day = 0;
        let mut by_code: HashMap<&str, usize> = HashMap::new();
        let mut by_endpoint: HashMap<&str, usize> = HashMap::new();

        for event in &self.events {
            if event.timestamp > hour_ago {
                errors_last_hour += 1;
            }
            if event.timestamp > day_ago {
                errors_last_day += 1;
            }
            *by_code.entry(event.error_code.as_str()).or_insert(0) += 1;
            *by_endpoint.entry(event.endpoint.as_str()).or_insert(0) += 1;
        }

        LedgerSummary {
            total_errors_tracked: self.events.len(),
            errors_last_hour,
            errors_last_day,
            top_error_codes: top_n(by_code),
            top_error_endpoints: top_n(by_endpoint),
        }
    }

    /// Matching events in ledger order, at most `limit` of them
    pub fn search(&self, filter: &SearchFilter, limit: usize) -> Vec<ErrorEvent> {
        self.events
            .iter()
            .filter(|event| filter.matches(event))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Per-code rates over the trailing `interval`, with the trend against the
    /// interval just before it
    pub fn error_rates(&self, now: DateTime<Utc>, interval: Duration) -> ErrorRates {
        let interval_start = now - interval;
        let previous_start = interval_start - interval;
        let minutes = interval.num_minutes().max(1);

        let mut current: HashMap<String, usize> = HashMap::new();
        let mut previous: HashMap<String, usize> = HashMap::new();
        let mut total_errors = 0;

        for event in &self.events {
            if event.timestamp > interval_start {
                total_errors += 1;
                *current.entry(event.error_code.clone()).or_insert(0) += 1;
            } else if event.timestamp > previous_start {
                *previous.entry(event.error_code.clone()).or_insert(0) += 1;
            }
        }

        let error_rates = current
            .iter()
            .map(|(code, count)| (code.clone(), *count as f64 / minutes as f64))
            .collect();

        let mut trends = HashMap::new();
        for code in current.keys().chain(previous.keys()) {
            let current_count = current.get(code).copied().unwrap_or(0);
            let previous_count = previous.get(code).copied().unwrap_or(0);

            let change = match (previous_count, current_count) {
                (0, 0) => 0.0,
                (0, _) => 100.0,
                (prev, cur) => (cur as f64 - prev as f64) / prev as f64 * 100.0,
            };

            trends.insert(
                code.clone(),
                CodeTrend {
                    current_count,
                    previous_count,
                    percent_change: (change * 100.0).round() / 100.0,
                },
            );
        }

        debug!(interval_minutes = minutes, total = total_errors, "Computed error rates");

        ErrorRates {
            interval_minutes: minutes,
            total_errors,
            error_rates,
            trends,
            timestamp: now,
        }
    }
}

/// Highest counts first; ties broken by key so results are stable
fn top_n(counts: HashMap<&str, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(key, count)| (key.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_N);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_capacity_is_never_exceeded_and_eviction_is_fifo() {
        let mut ledger = ErrorLedger::new(3, None);

        for i in 0..10 {
            ledger.track(ErrorEvent::at(base() + Duration::seconds(i), "500", format!("e{}", i), "/x"));
            assert!(ledger.len() <= 3);
        }

        let messages: Vec<_> = ledger.events().map(|e| e.error_message.as_str()).collect();
        assert_eq!(messages, vec!["e7", "e8", "e9"]);
        assert_eq!(ledger.error_counts().get("500"), Some(&10));
    }

    #[test]
    fn test_summary_windows_and_rankings() {
        let now = base();
        let mut ledger = ErrorLedger::new(100, None);

        ledger.track(ErrorEvent::at(now - Duration::minutes(10), "500", "a", "/a"));
        ledger.track(ErrorEvent::at(now - Duration::minutes(20), "500", "b", "/a"));
        ledger.track(ErrorEvent::at(now - Duration::hours(3), "429", "c", "/b"));
        ledger.track(ErrorEvent::at(now - Duration::hours(30), "404", "d", "/c"));

        let summary = ledger.summary(now);
        assert_eq!(summary.total_errors_tracked, 4);
        assert_eq!(summary.errors_last_hour, 2);
        assert_eq!(summary.errors_last_day, 3);
        assert_eq!(summary.top_error_codes[0], ("500".to_string(), 2));
        assert_eq!(summary.top_error_endpoints[0], ("/a".to_string(), 2));
        assert_eq!(summary.top_error_codes.len(), 3);
    }

    #[test]
    fn test_top_rankings_are_capped_at_five() {
        let now = base();
        let mut ledger = ErrorLedger::new(100, None);
        for code in 0..8 {
            ledger.track(ErrorEvent::at(now, 400 + code, "x", format!("/e{}", code)));
        }

        let summary = ledger.summary(now);
        assert_eq!(summary.top_error_codes.len(), 5);
        assert_eq!(summary.top_error_endpoints.len(), 5);
    }

    #[test]
    fn test_rankings_serialize_as_objects_in_rank_order() {
        let mut ledger = ErrorLedger::new(10, None);
        for (offset, code, endpoint) in [(1, 500, "/a"), (2, 404, "/b"), (3, 500, "/a"), (4, 500, "/c")] {
            ledger.track(ErrorEvent::at(base() + Duration::seconds(offset), code, "x", endpoint));
        }

        let summary = ledger.summary(base() + Duration::seconds(5));
        let encoded = serde_json::to_string(&summary).unwrap();
        assert!(encoded.contains(r#""top_error_codes":{"500":3,"404":1}"#), "{}", encoded);

        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["top_error_endpoints"]["/a"], 2);

        let decoded: LedgerSummary = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, summary);
    }

    #[test]
    fn test_search_filters_and_limit() {
        let now = base();
        let mut ledger = ErrorLedger::new(100, None);
        for i in 0..6 {
            let code = if i % 2 == 0 { "500" } else { "429" };
            ledger.track(ErrorEvent::at(now + Duration::minutes(i), code, format!("m{}", i), "/x"));
        }
        ledger.track(ErrorEvent::at(now, "500", "other", "/y"));

        let hits = ledger.search(&SearchFilter::new().error_code(500).endpoint("/x"), 100);
        let messages: Vec<_> = hits.iter().map(|e| e.error_message.as_str()).collect();
        assert_eq!(messages, vec!["m0", "m2", "m4"]);

        let limited = ledger.search(&SearchFilter::new(), 2);
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].error_message, "m0");

        let windowed = ledger.search(
            &SearchFilter::new()
                .start_time(now + Duration::minutes(1))
                .end_time(now + Duration::minutes(3)),
            100,
        );
        let messages: Vec<_> = windowed.iter().map(|e| e.error_message.as_str()).collect();
        assert_eq!(messages, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_durable_log_round_trip_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("errors.jsonl");
        let now = base();

        {
            let mut ledger = ErrorLedger::new(10, Some(DurableLog::new(&path)));
            ledger.track(ErrorEvent::at(now - Duration::hours(48), "500", "old", "/x"));
            for i in 0..4 {
                ledger.track(ErrorEvent::at(now - Duration::minutes(i), "503", format!("new{}", i), "/y"));
            }
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 5);

        let mut reloaded = ErrorLedger::new(3, Some(DurableLog::new(&path)));
        let recent = reloaded.load(now, Duration::hours(24));

        assert_eq!(reloaded.len(), 3);
        assert_eq!(recent.len(), 4);
        assert!(recent.iter().all(|e| e.error_code == "503"));
        assert_eq!(reloaded.error_counts().get("500"), Some(&1));
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("errors.jsonl");
        std::fs::write(
            &path,
            "not json\n{\"timestamp\":\"2024-05-01T11:59:00\",\"error_code\":\"500\",\"error_message\":\"m\",\"endpoint\":\"/x\"}\n\n",
        )
        .unwrap();

        let mut ledger = ErrorLedger::new(10, Some(DurableLog::new(&path)));
        let recent = ledger.load(base(), Duration::hours(24));
        assert_eq!(ledger.len(), 1);
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_unwritable_log_does_not_fail_tracking() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for appending
        let mut ledger = ErrorLedger::new(10, Some(DurableLog::new(dir.path())));
        ledger.track(ErrorEvent::at(base(), "500", "boom", "/x"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_error_rates_and_trends() {
        let now = base();
        let mut ledger = ErrorLedger::new(100, None);

        for i in 0..6 {
            ledger.track(ErrorEvent::at(now - Duration::minutes(5 + i), "500", "cur", "/x"));
        }
        for i in 0..3 {
            ledger.track(ErrorEvent::at(now - Duration::minutes(70 + i), "500", "prev", "/x"));
        }
        ledger.track(ErrorEvent::at(now - Duration::minutes(1), "429", "new", "/x"));
        ledger.track(ErrorEvent::at(now - Duration::minutes(90), "404", "gone", "/x"));

        let rates = ledger.error_rates(now, Duration::minutes(60));
        assert_eq!(rates.interval_minutes, 60);
        assert_eq!(rates.total_errors, 7);
        assert!((rates.error_rates["500"] - 0.1).abs() < 1e-9);

        assert_eq!(rates.trends["500"].percent_change, 100.0);
        assert_eq!(rates.trends["429"].percent_change, 100.0);
        assert_eq!(rates.trends["404"].current_count, 0);
        assert_eq!(rates.trends["404"].percent_change, -100.0);
    }
}
