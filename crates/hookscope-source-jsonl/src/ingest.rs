//! Ingestion coordinator: picks today's event file, tails every attached
//! file, stores new records and hands each stored batch to a subscriber.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use hookscope_core::store::{DEFAULT_CAPACITY, EventStore};
use hookscope_core::types::EventRecord;
use tracing::{debug, info};

use crate::paths::{self, DEFAULT_UTC_OFFSET_MINUTES};
use crate::watcher::EventFileWatcher;

/// Subscriber invoked with each newly stored batch (ids assigned).
pub type BatchCallback = Box<dyn FnMut(&[EventRecord]) + Send>;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Base directory containing `history/raw-outputs/`.
    pub events_dir: PathBuf,
    /// Offset used to decide which calendar day "today" is.
    pub utc_offset: FixedOffset,
    /// Event store capacity.
    pub store_capacity: usize,
}

impl IngestConfig {
    pub fn new(events_dir: PathBuf) -> Self {
        Self {
            events_dir,
            utc_offset: paths::utc_offset(DEFAULT_UTC_OFFSET_MINUTES).unwrap_or_else(|| Utc.fix()),
            store_capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn with_store_capacity(mut self, capacity: usize) -> Self {
        self.store_capacity = capacity;
        self
    }
}

pub struct IngestionCoordinator {
    config: IngestConfig,
    store: EventStore,
    /// Attached files in attach order. Old days stay attached; they simply
    /// stop growing.
    watchers: Vec<EventFileWatcher>,
    current_path: Option<PathBuf>,
    on_batch: Option<BatchCallback>,
}

impl std::fmt::Debug for IngestionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionCoordinator")
            .field("config", &self.config)
            .field("store_len", &self.store.len())
            .field("watchers", &self.watchers)
            .field("current_path", &self.current_path)
            .field("has_subscriber", &self.on_batch.is_some())
            .finish()
    }
}

impl IngestionCoordinator {
    pub fn new(config: IngestConfig) -> Self {
        let store = EventStore::with_capacity(config.store_capacity);
        Self {
            config,
            store,
            watchers: Vec::new(),
            current_path: None,
            on_batch: None,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Install the optional subscriber and attach today's file.
    pub fn start(&mut self, now: DateTime<Utc>, on_batch: Option<BatchCallback>) -> PathBuf {
        if on_batch.is_some() {
            self.on_batch = on_batch;
        }
        let today = self.today_path(now);
        info!(
            events_dir = %self.config.events_dir.display(),
            utc_offset = %self.config.utc_offset,
            "starting event file ingestion"
        );
        self.attach(today.clone());
        self.current_path = Some(today.clone());
        today
    }

    pub fn today_path(&self, now: DateTime<Utc>) -> PathBuf {
        paths::events_file_for(&self.config.events_dir, now, self.config.utc_offset)
    }

    /// Attach a new day's file when the date has rolled over.
    pub fn check_rotation(&mut self, now: DateTime<Utc>) -> bool {
        let today = self.today_path(now);
        if self.current_path.as_deref() == Some(today.as_path()) {
            return false;
        }
        info!(path = %today.display(), "new day detected, watching new event file");
        self.attach(today.clone());
        self.current_path = Some(today);
        true
    }

    /// Start tailing `path` from its current end. No-op if already attached.
    pub fn attach(&mut self, path: PathBuf) -> bool {
        if self.is_watching(&path) {
            return false;
        }
        info!(path = %path.display(), "watching event file, only new events will be captured");
        self.watchers.push(EventFileWatcher::new(path));
        true
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watchers.iter().any(|w| w.path() == path)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watchers.iter().map(|w| w.path().to_path_buf()).collect()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Handle a change notification for `path`.
    ///
    /// Paths are matched exactly, then by file name (notification backends
    /// may report canonicalized paths). Unattached paths are ignored.
    pub fn on_file_changed(&mut self, path: &Path) -> Vec<EventRecord> {
        let position = self
            .watchers
            .iter()
            .position(|w| w.path() == path)
            .or_else(|| {
                let name = path.file_name()?;
                self.watchers
                    .iter()
                    .position(|w| w.path().file_name() == Some(name))
            });

        let Some(idx) = position else {
            debug!(path = %path.display(), "change on unwatched path, ignoring");
            return Vec::new();
        };

        let records = self.watchers[idx].poll_new_records();
        self.dispatch(records)
    }

    /// Poll every attached file, dispatching one batch per file.
    pub fn poll_all(&mut self) -> Vec<EventRecord> {
        let mut stored = Vec::new();
        for idx in 0..self.watchers.len() {
            let records = self.watchers[idx].poll_new_records();
            stored.extend(self.dispatch(records));
        }
        stored
    }

    /// Store a parsed batch, then notify the subscriber, in that order.
    fn dispatch(&mut self, records: Vec<EventRecord>) -> Vec<EventRecord> {
        if records.is_empty() {
            return records;
        }
        let stored = self.store.append(records);
        info!(
            received = stored.len(),
            in_memory = self.store.len(),
            "received events"
        );
        if let Some(callback) = self.on_batch.as_mut() {
            callback(&stored);
        }
        stored
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EventStore {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hookscope_core::aggregator::BucketAggregator;
    use hookscope_core::types::TimeRange;
    use std::fs;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("valid datetime")
    }

    fn append(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("test");
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("test");
        f.write_all(content.as_bytes()).expect("test");
    }

    #[test]
    fn start_attaches_today_at_eof() {
        let dir = tempfile::tempdir().expect("test");
        let mut coordinator = IngestionCoordinator::new(IngestConfig::new(dir.path().to_path_buf()));
        let now = at(2026, 10, 19, 20);
        let today = coordinator.today_path(now);
        append(&today, "{\"hook_event_type\":\"Old\",\"timestamp\":1}\n");

        let path = coordinator.start(now, None);
        assert_eq!(path, today);
        assert!(coordinator.poll_all().is_empty());

        append(&today, "{\"hook_event_type\":\"New\",\"timestamp\":2}\n");
        let stored = coordinator.on_file_changed(&today);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].hook_event_type, "New");
        assert_eq!(stored[0].id, Some(1));
        assert_eq!(coordinator.store().len(), 1);
    }

    #[test]
    fn subscriber_sees_stored_batch_with_ids() {
        let dir = tempfile::tempdir().expect("test");
        let mut coordinator = IngestionCoordinator::new(IngestConfig::new(dir.path().to_path_buf()));
        let seen: Arc<Mutex<Vec<Vec<Option<u64>>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let now = at(2026, 10, 19, 20);
        let today = coordinator.start(
            now,
            Some(Box::new(move |batch: &[EventRecord]| {
                sink.lock()
                    .expect("test")
                    .push(batch.iter().map(|e| e.id).collect());
            })),
        );

        append(
            &today,
            "{\"hook_event_type\":\"A\"}\nnot valid json\n{\"hook_event_type\":\"B\"}\n",
        );
        coordinator.on_file_changed(&today);
        // No growth, no callback.
        coordinator.on_file_changed(&today);

        let calls = seen.lock().expect("test").clone();
        assert_eq!(calls, vec![vec![Some(1), Some(2)]]);
        assert_eq!(coordinator.store().recent(10).len(), 2);
    }

    #[test]
    fn rotation_attaches_next_day_and_keeps_old() {
        let dir = tempfile::tempdir().expect("test");
        let mut coordinator = IngestionCoordinator::new(IngestConfig::new(dir.path().to_path_buf()));
        let day_one = coordinator.start(at(2026, 10, 19, 20), None);

        assert!(!coordinator.check_rotation(at(2026, 10, 19, 21)));
        // 08:00 UTC is midnight at UTC-8.
        assert!(coordinator.check_rotation(at(2026, 10, 20, 8)));

        let day_two = coordinator.current_path().expect("test").to_path_buf();
        assert_ne!(day_one, day_two);
        assert!(day_two.ends_with("2026-10/2026-10-20_all-events.jsonl"));
        assert_eq!(coordinator.watched_paths(), vec![day_one.clone(), day_two.clone()]);

        append(&day_one, "{\"hook_event_type\":\"Late\"}\n");
        append(&day_two, "{\"hook_event_type\":\"Early\"}\n");
        let stored = coordinator.poll_all();
        let kinds: Vec<_> = stored.iter().map(|e| e.hook_event_type.as_str()).collect();
        assert_eq!(kinds, vec!["Late", "Early"]);
    }

    #[test]
    fn unwatched_path_is_ignored() {
        let dir = tempfile::tempdir().expect("test");
        let mut coordinator = IngestionCoordinator::new(IngestConfig::new(dir.path().to_path_buf()));
        coordinator.start(at(2026, 10, 19, 20), None);

        let stray = dir.path().join("stray.jsonl");
        append(&stray, "{\"hook_event_type\":\"Stop\"}\n");
        assert!(coordinator.on_file_changed(&stray).is_empty());
        assert!(coordinator.store().is_empty());
    }

    #[test]
    fn tailed_events_aggregate_into_one_bucket() {
        let dir = tempfile::tempdir().expect("test");
        let mut coordinator = IngestionCoordinator::new(IngestConfig::new(dir.path().to_path_buf()));
        let today = coordinator.start(at(2026, 10, 19, 20), None);
        let mut agg = BucketAggregator::new(TimeRange::OneMinute, None);

        append(
            &today,
            concat!(
                r#"{"sourceApp":"kai","sessionId":"abcdef1234","hookEventType":"PreToolUse","timestamp":1000}"#,
                "\n",
                r#"{"sourceApp":"kai","sessionId":"abcdef1234","hookEventType":"PostToolUse","timestamp":1500}"#,
                "\n",
            ),
        );
        for record in coordinator.on_file_changed(&today) {
            agg.add_event(record, 1500);
        }
        agg.flush(1550);

        let buckets: Vec<_> = agg.buckets().collect();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, 1000);
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].event_type_counts["PreToolUse"], 1);
        assert_eq!(buckets[0].event_type_counts["PostToolUse"], 1);
    }
}
