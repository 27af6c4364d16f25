//! Fixed-bucket latency histogram.
//!
//! ```text
//!  bucket:  0     1     2    ...   9      10
//!  bound:  1ms   2ms   3ms  ...  10ms   100ms
//!          [0,1) [1,2) [2,3)     [9,10) [10,∞)
//! ```
//!
//! A value lands in the first bucket whose bound exceeds it. Anything at or
//! past the last finite bound (10 ms) falls through to the 100 ms catch-all.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

const ONE_MS: u64 = 1_000_000;

pub const BUCKETS: usize = 11;

/// Upper bounds in nanoseconds.
pub const BUCKET_BOUNDS_NS: [u64; BUCKETS] = [
    ONE_MS,
    2 * ONE_MS,
    3 * ONE_MS,
    4 * ONE_MS,
    5 * ONE_MS,
    6 * ONE_MS,
    7 * ONE_MS,
    8 * ONE_MS,
    9 * ONE_MS,
    10 * ONE_MS,
    100 * ONE_MS,
];

pub const BUCKET_LABELS: [&str; BUCKETS] = [
    "1ms", "2ms", "3ms", "4ms", "5ms", "6ms", "7ms", "8ms", "9ms", "10ms", "100ms",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencyHistogram {
    counts: [u64; BUCKETS],
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket a value in nanoseconds falls in.
    pub fn bucket_index(nanos: u64) -> usize {
        BUCKET_BOUNDS_NS
            .iter()
            .position(|&bound| nanos < bound)
            .unwrap_or(BUCKETS - 1)
    }

    pub fn record(&mut self, nanos: u64) {
        self.counts[Self::bucket_index(nanos)] += 1;
    }

    pub fn record_duration(&mut self, elapsed: Duration) {
        self.record(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }

    pub fn counts(&self) -> &[u64; BUCKETS] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn report(&self) -> HistogramReport {
        HistogramReport {
            buckets: BUCKET_LABELS
                .iter()
                .zip(self.counts)
                .map(|(label, count)| (*label, count))
                .collect(),
            total: self.total(),
        }
    }
}

/// Labelled counts in bucket order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramReport {
    pub buckets: Vec<(&'static str, u64)>,
    pub total: u64,
}

impl fmt::Display for HistogramReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, count) in &self.buckets {
            writeln!(f, "{label}: {count}")?;
        }
        write!(f, "{} total readings in histogram", self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_edges() {
        assert_eq!(LatencyHistogram::bucket_index(0), 0);
        assert_eq!(LatencyHistogram::bucket_index(ONE_MS - 1), 0);
        assert_eq!(LatencyHistogram::bucket_index(ONE_MS), 1);
        assert_eq!(LatencyHistogram::bucket_index(10 * ONE_MS - 1), 9);
        assert_eq!(LatencyHistogram::bucket_index(10 * ONE_MS), 10);
        assert_eq!(LatencyHistogram::bucket_index(100 * ONE_MS), 10);
        assert_eq!(LatencyHistogram::bucket_index(u64::MAX), 10);
    }

    #[test]
    fn record_duration_uses_whole_elapsed_time() {
        let mut hist = LatencyHistogram::new();
        hist.record_duration(Duration::from_millis(2_500));
        hist.record_duration(Duration::from_micros(1_500));
        assert_eq!(hist.counts()[10], 1);
        assert_eq!(hist.counts()[1], 1);
    }

    #[test]
    fn report_text() {
        let mut hist = LatencyHistogram::new();
        hist.record(500);
        hist.record(ONE_MS * 50);
        let text = hist.report().to_string();
        assert!(text.starts_with("1ms: 1\n2ms: 0\n"));
        assert!(text.contains("\n100ms: 1\n"));
        assert!(text.ends_with("2 total readings in histogram"));
    }

    #[test]
    fn report_serializes_as_pairs() {
        let mut hist = LatencyHistogram::new();
        hist.record(3 * ONE_MS + 1);
        let json = serde_json::to_value(hist.report()).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["buckets"][3], serde_json::json!(["4ms", 1]));
    }
}
