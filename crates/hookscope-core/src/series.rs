//! Dense chart series and summary metrics derived from a [`BucketAggregator`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::aggregator::BucketAggregator;
use crate::types::{
    EventRecord, TOOL_CALL_EVENT_TYPE, TimeBucket, TimeRange, TimingMetrics, bucket_timestamp,
};

/// Everything a chart needs for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSnapshot {
    pub time_range: TimeRange,
    pub bucket_size_ms: i64,
    pub series: Vec<TimeBucket>,
    pub unique_agent_count: usize,
    pub tool_call_count: u64,
    pub timing: TimingMetrics,
}

impl BucketAggregator {
    /// One entry per bucket step across the active window, oldest first.
    ///
    /// Steps without a live bucket are filled with an empty one, and the
    /// result is trimmed to the last `max_bucket_count` entries.
    pub fn series(&self, now_ms: i64) -> Vec<TimeBucket> {
        let config = self.config();
        let mut series = Vec::with_capacity(config.max_bucket_count + 1);

        let mut step = now_ms - config.window_duration_ms;
        while step <= now_ms {
            let key = bucket_timestamp(step, config.bucket_size_ms);
            let bucket = self
                .buckets
                .get(&key)
                .cloned()
                .unwrap_or_else(|| TimeBucket::empty(key));
            series.push(bucket);
            step += config.bucket_size_ms;
        }

        let excess = series.len().saturating_sub(config.max_bucket_count);
        series.drain(..excess);
        series
    }

    /// Distinct `app:fingerprint` agent ids seen inside the active window.
    pub fn unique_agent_ids(&self, now_ms: i64) -> Vec<String> {
        self.events_in_window(now_ms)
            .map(EventRecord::agent_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct agent ids across all retained history.
    pub fn all_unique_agent_ids(&self) -> Vec<String> {
        self.history
            .iter()
            .map(EventRecord::agent_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn unique_agent_count(&self, now_ms: i64) -> usize {
        self.unique_agent_ids(now_ms).len()
    }

    /// Sum of `PreToolUse` counts over the live buckets.
    pub fn tool_call_count(&self) -> u64 {
        self.buckets
            .values()
            .filter_map(|b| b.event_type_counts.get(TOOL_CALL_EVENT_TYPE))
            .sum()
    }

    /// Min, max and mean of the strictly positive gaps between consecutive
    /// events (by timestamp) inside the active window. Zeros when there are
    /// no such gaps.
    pub fn timing_metrics(&self, now_ms: i64) -> TimingMetrics {
        let mut stamps: Vec<i64> = self
            .events_in_window(now_ms)
            .filter_map(|e| e.timestamp)
            .collect();
        stamps.sort_unstable();

        let gaps: Vec<i64> = stamps
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|gap| *gap > 0)
            .collect();

        let (Some(min), Some(max)) = (gaps.iter().min(), gaps.iter().max()) else {
            return TimingMetrics::default();
        };

        #[allow(clippy::cast_precision_loss)]
        let avg = gaps.iter().sum::<i64>() as f64 / gaps.len() as f64;

        TimingMetrics {
            min_gap_ms: *min,
            max_gap_ms: *max,
            avg_gap_ms: avg,
        }
    }

    pub fn snapshot(&self, now_ms: i64) -> ChartSnapshot {
        ChartSnapshot {
            time_range: self.time_range(),
            bucket_size_ms: self.config().bucket_size_ms,
            series: self.series(now_ms),
            unique_agent_count: self.unique_agent_count(now_ms),
            tool_call_count: self.tool_call_count(),
            timing: self.timing_metrics(now_ms),
        }
    }

    fn events_in_window(&self, now_ms: i64) -> impl Iterator<Item = &EventRecord> {
        let cutoff = now_ms - self.config().window_duration_ms;
        self.history
            .iter()
            .filter(move |e| e.timestamp.is_some_and(|ts| ts >= cutoff))
    }
}
