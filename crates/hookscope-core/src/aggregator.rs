//! Time-bucketed aggregation of hook events.
//!
//! Two paths feed the visible buckets:
//!
//! - **incremental**: [`BucketAggregator::add_event`] parks events in a pending
//!   batch and pushes a debounce deadline forward. Once the deadline passes,
//!   [`BucketAggregator::flush_due`] merges the whole batch in one pass.
//! - **retention**: every accepted event is also kept in an age-pruned
//!   history, which [`BucketAggregator::set_time_range`] replays to rebuild
//!   the buckets at a new granularity.
//!
//! The aggregator never reads a clock. Callers own the timers and pass
//! `now_ms` into every operation.

use std::collections::BTreeMap;

use crate::types::{AgentFilter, EventRecord, TimeBucket, TimeRange, TimeRangeConfig, bucket_timestamp};

/// Quiet period before a pending batch is merged.
pub const DEBOUNCE_MS: i64 = 50;

/// How long accepted events stay eligible for re-aggregation and statistics.
///
/// Never shorter than the widest range's window, so a switch to any range
/// rebuilds exactly the buckets incremental merging would hold.
pub const RETENTION_MS: i64 = 10 * 60 * 1000;

/// Interval at which the host should call [`BucketAggregator::sweep`].
pub const SWEEP_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct BucketAggregator {
    range: TimeRange,
    filter: Option<AgentFilter>,
    /// Live buckets keyed (and therefore ordered) by left boundary.
    pub(crate) buckets: BTreeMap<i64, TimeBucket>,
    /// Retained events in arrival order; pruned by age, not count.
    pub(crate) history: Vec<EventRecord>,
    pending: Vec<EventRecord>,
    /// Pending batch becomes due at this instant.
    deadline_ms: Option<i64>,
    debounce_ms: i64,
    retention_ms: i64,
}

impl BucketAggregator {
    pub fn new(range: TimeRange, filter: Option<AgentFilter>) -> Self {
        Self::with_timing(range, filter, DEBOUNCE_MS, RETENTION_MS)
    }

    pub fn with_timing(
        range: TimeRange,
        filter: Option<AgentFilter>,
        debounce_ms: i64,
        retention_ms: i64,
    ) -> Self {
        Self {
            range,
            filter,
            buckets: BTreeMap::new(),
            history: Vec::new(),
            pending: Vec::new(),
            deadline_ms: None,
            debounce_ms,
            retention_ms,
        }
    }

    pub fn time_range(&self) -> TimeRange {
        self.range
    }

    pub fn config(&self) -> TimeRangeConfig {
        self.range.config()
    }

    pub fn filter(&self) -> Option<&AgentFilter> {
        self.filter.as_ref()
    }

    /// Live buckets, oldest first.
    pub fn buckets(&self) -> impl Iterator<Item = &TimeBucket> {
        self.buckets.values()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// When the pending batch should be merged, if anything is pending.
    pub fn next_deadline(&self) -> Option<i64> {
        self.deadline_ms
    }

    /// Queue an event for the next merge and restart the debounce period.
    ///
    /// Events without a timestamp, or rejected by the agent filter, are
    /// dropped from both paths. Returns whether the event was accepted.
    pub fn add_event(&mut self, event: EventRecord, now_ms: i64) -> bool {
        if event.timestamp.is_none() || !passes(self.filter.as_ref(), &event) {
            return false;
        }
        self.history.push(event.clone());
        self.pending.push(event);
        self.deadline_ms = Some(now_ms + self.debounce_ms);
        true
    }

    /// Merge the pending batch if its deadline has passed.
    pub fn flush_due(&mut self, now_ms: i64) -> bool {
        match self.deadline_ms {
            Some(deadline) if now_ms >= deadline => {
                self.flush(now_ms);
                true
            }
            _ => false,
        }
    }

    /// Merge the whole pending batch now, then prune by window, cap and age.
    pub fn flush(&mut self, now_ms: i64) {
        self.deadline_ms = None;
        let batch = std::mem::take(&mut self.pending);
        let bucket_size = self.config().bucket_size_ms;
        for event in &batch {
            merge_event(&mut self.buckets, bucket_size, event);
        }
        self.prune_buckets(now_ms);
        self.prune_history(now_ms);
    }

    /// Switch granularity and rebuild every bucket from retained history.
    ///
    /// A batch still waiting on its debounce deadline is discarded rather
    /// than merged under the old range: its events are already in history,
    /// so the rebuild counts each of them exactly once.
    pub fn set_time_range(&mut self, range: TimeRange, now_ms: i64) {
        self.range = range;
        self.pending.clear();
        self.deadline_ms = None;
        self.reaggregate(now_ms);
    }

    /// Rebuild buckets from retained history under the active range.
    pub fn reaggregate(&mut self, now_ms: i64) {
        self.buckets.clear();
        let config = self.config();
        let cutoff = now_ms - config.window_duration_ms;
        for event in &self.history {
            let in_window = event.timestamp.is_some_and(|ts| ts >= cutoff);
            if in_window && passes(self.filter.as_ref(), event) {
                merge_event(&mut self.buckets, config.bucket_size_ms, event);
            }
        }
        self.prune_buckets(now_ms);
    }

    /// Periodic age pruning, so stale data disappears without new input.
    pub fn sweep(&mut self, now_ms: i64) {
        self.prune_buckets(now_ms);
        self.prune_history(now_ms);
    }

    /// Explicit user reset: drops buckets, history and any pending batch.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.history.clear();
        self.pending.clear();
        self.deadline_ms = None;
    }

    /// Shutdown hook: merges anything still pending so nothing is lost.
    pub fn cleanup(&mut self, now_ms: i64) {
        if !self.pending.is_empty() {
            self.flush(now_ms);
        }
        self.deadline_ms = None;
    }

    fn prune_buckets(&mut self, now_ms: i64) {
        let config = self.config();
        let cutoff = now_ms - config.window_duration_ms;
        self.buckets = self.buckets.split_off(&cutoff);
        while self.buckets.len() > config.max_bucket_count {
            self.buckets.pop_first();
        }
    }

    fn prune_history(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.retention_ms.max(widest_window_ms());
        self.history
            .retain(|event| event.timestamp.is_some_and(|ts| ts >= cutoff));
    }
}

fn widest_window_ms() -> i64 {
    TimeRange::ALL
        .iter()
        .map(|range| range.config().window_duration_ms)
        .max()
        .unwrap_or(0)
}

fn passes(filter: Option<&AgentFilter>, event: &EventRecord) -> bool {
    filter.is_none_or(|f| f.matches(event))
}

fn merge_event(buckets: &mut BTreeMap<i64, TimeBucket>, bucket_size_ms: i64, event: &EventRecord) {
    let Some(ts) = event.timestamp else {
        return;
    };
    let key = bucket_timestamp(ts, bucket_size_ms);
    buckets
        .entry(key)
        .or_insert_with(|| TimeBucket::empty(key))
        .record(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn event(kind: &str, ts: i64) -> EventRecord {
        EventRecord::new("kai", "abcdef1234", kind, Some(ts))
    }

    #[test]
    fn add_event_waits_for_deadline() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        assert!(agg.add_event(event("Stop", NOW), NOW));
        assert_eq!(agg.next_deadline(), Some(NOW + DEBOUNCE_MS));
        assert_eq!(agg.bucket_count(), 0);

        assert!(!agg.flush_due(NOW + DEBOUNCE_MS - 1));
        assert_eq!(agg.pending_len(), 1);

        assert!(agg.flush_due(NOW + DEBOUNCE_MS));
        assert_eq!(agg.pending_len(), 0);
        assert_eq!(agg.next_deadline(), None);
        assert_eq!(agg.bucket_count(), 1);
    }

    #[test]
    fn new_arrival_postpones_flush() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        agg.add_event(event("Stop", NOW), NOW);
        agg.add_event(event("Stop", NOW + 30), NOW + 30);
        assert!(!agg.flush_due(NOW + DEBOUNCE_MS));
        assert!(agg.flush_due(NOW + 30 + DEBOUNCE_MS));
        let bucket = agg.buckets().next().expect("test");
        assert_eq!(bucket.count, 2);
    }

    #[test]
    fn merges_into_floor_bucket() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        agg.add_event(event("PreToolUse", 1000), 1000);
        agg.add_event(event("PostToolUse", 1500), 1500);
        agg.flush(1600);

        let buckets: Vec<_> = agg.buckets().collect();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, 1000);
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].event_type_counts["PreToolUse"], 1);
        assert_eq!(buckets[0].event_type_counts["PostToolUse"], 1);
        assert_eq!(buckets[0].session_counts["abcdef1234"], 2);
        assert_eq!(buckets[0].app_counts["kai"], 2);
    }

    #[test]
    fn missing_timestamp_is_ignored() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        let untimed = EventRecord::new("kai", "abcdef1234", "Stop", None);
        assert!(!agg.add_event(untimed, NOW));
        assert_eq!(agg.pending_len(), 0);
        assert_eq!(agg.history_len(), 0);
        assert_eq!(agg.next_deadline(), None);
    }

    #[test]
    fn agent_filter_rejects_other_agents() {
        let filter: AgentFilter = "kai:abcdef12".parse().expect("test");
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, Some(filter));

        assert!(agg.add_event(event("Stop", NOW), NOW));
        assert!(!agg.add_event(EventRecord::new("designer", "abcdef1234", "Stop", Some(NOW)), NOW));
        assert!(!agg.add_event(EventRecord::new("kai", "ffffffff99", "Stop", Some(NOW)), NOW));
        agg.flush(NOW);

        assert_eq!(agg.history_len(), 1);
        assert_eq!(agg.buckets().map(|b| b.count).sum::<u64>(), 1);
    }

    #[test]
    fn flush_prunes_outside_window() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        agg.add_event(event("Stop", NOW - 120_000), NOW);
        agg.add_event(event("Stop", NOW - 1_000), NOW);
        agg.flush(NOW);

        let stamps: Vec<_> = agg.buckets().map(|b| b.timestamp).collect();
        assert_eq!(stamps, vec![NOW - 1_000]);
        // Still within retention.
        assert_eq!(agg.history_len(), 2);
    }

    #[test]
    fn flush_caps_bucket_count() {
        // now aligned to a bucket edge yields 61 candidate buckets in the window.
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        for i in 0..=60 {
            agg.add_event(event("Stop", NOW - i * 1000), NOW);
        }
        agg.flush(NOW);
        assert_eq!(agg.bucket_count(), 60);
        assert_eq!(agg.buckets().next().map(|b| b.timestamp), Some(NOW - 59_000));
    }

    #[test]
    fn sweep_ages_out_buckets_and_history() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        agg.add_event(event("Stop", NOW), NOW);
        agg.flush(NOW);

        agg.sweep(NOW + 61_000);
        assert_eq!(agg.bucket_count(), 0);
        assert_eq!(agg.history_len(), 1);

        agg.sweep(NOW + RETENTION_MS + 1);
        assert_eq!(agg.history_len(), 0);
    }

    #[test]
    fn set_time_range_rebuilds_at_new_granularity() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        let base = 1_700_000_000_000; // multiple of 5000
        for offset in [0, 1_000, 2_000, 4_999] {
            agg.add_event(event("Stop", base + offset), base + 5_000);
        }
        agg.flush(base + 5_000);
        assert_eq!(agg.bucket_count(), 4);

        agg.set_time_range(TimeRange::FiveMinutes, base + 5_000);
        assert_eq!(agg.time_range(), TimeRange::FiveMinutes);
        let buckets: Vec<_> = agg.buckets().collect();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, base);
        assert_eq!(buckets[0].count, 4);
    }

    #[test]
    fn set_time_range_discards_pending_without_double_count() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        agg.add_event(event("Stop", NOW), NOW);
        agg.add_event(event("Stop", NOW + 10), NOW + 10);

        agg.set_time_range(TimeRange::ThreeMinutes, NOW + 20);
        assert_eq!(agg.pending_len(), 0);
        assert_eq!(agg.next_deadline(), None);
        assert_eq!(agg.buckets().map(|b| b.count).sum::<u64>(), 2);

        // A later flush must not merge the discarded batch again.
        agg.flush(NOW + 100);
        assert_eq!(agg.buckets().map(|b| b.count).sum::<u64>(), 2);
    }

    #[test]
    fn widening_to_ten_minutes_keeps_older_events() {
        let mut incremental = BucketAggregator::new(TimeRange::TenMinutes, None);
        let mut switched = BucketAggregator::new(TimeRange::OneMinute, None);
        for ts in [NOW - 400_000, NOW - 100_000] {
            incremental.add_event(event("Stop", ts), NOW);
            switched.add_event(event("Stop", ts), NOW);
        }
        incremental.flush(NOW);
        switched.flush(NOW);
        switched.sweep(NOW);
        assert_eq!(switched.history_len(), 2);

        switched.set_time_range(TimeRange::TenMinutes, NOW);
        let counts = |agg: &BucketAggregator| agg.buckets().map(|b| b.count).sum::<u64>();
        assert_eq!(counts(&incremental), 2);
        assert_eq!(counts(&switched), 2);
        assert_eq!(
            incremental.buckets().collect::<Vec<_>>(),
            switched.buckets().collect::<Vec<_>>()
        );
    }

    #[test]
    fn short_retention_still_covers_widest_window() {
        let mut agg = BucketAggregator::with_timing(TimeRange::OneMinute, None, DEBOUNCE_MS, 1_000);
        agg.add_event(event("Stop", NOW - 500_000), NOW);
        agg.flush(NOW);
        assert_eq!(agg.history_len(), 1);

        agg.sweep(NOW + 200_000);
        assert_eq!(agg.history_len(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        agg.add_event(event("Stop", NOW), NOW);
        agg.flush(NOW);
        agg.add_event(event("Stop", NOW + 1), NOW + 1);

        agg.clear();
        assert_eq!(agg.bucket_count(), 0);
        assert_eq!(agg.history_len(), 0);
        assert_eq!(agg.pending_len(), 0);
        assert_eq!(agg.next_deadline(), None);
    }

    #[test]
    fn cleanup_flushes_pending() {
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);
        agg.add_event(event("Stop", NOW), NOW);
        agg.cleanup(NOW + 1);
        assert_eq!(agg.pending_len(), 0);
        assert_eq!(agg.next_deadline(), None);
        assert_eq!(agg.bucket_count(), 1);
    }
}
