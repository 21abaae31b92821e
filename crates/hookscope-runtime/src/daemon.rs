//! Daemon event loop: wires file notifications → ingestion → store +
//! aggregator, and drives the debounce, sweep and rotation timers.
//!
//! Every handler takes the state lock, runs to completion and releases it,
//! so two handlers never interleave.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::{Duration, interval};

use hookscope_core::aggregator::{BucketAggregator, SWEEP_INTERVAL_MS};
use hookscope_core::types::{AgentFilter, EventRecord, TimeRange};
use hookscope_source_jsonl::ingest::{IngestConfig, IngestionCoordinator};
use hookscope_source_jsonl::paths;

use crate::cli::DaemonOpts;
use crate::server;

/// How often the current day's file name is recomputed.
const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Capacity of the live-event broadcast to `tail` subscribers.
const BROADCAST_CAPACITY: usize = 256;

/// Shared daemon state protected by a mutex.
pub struct DaemonState {
    pub ingest: IngestionCoordinator,
    pub aggregator: BucketAggregator,
    /// Fan-out of every stored batch to streaming clients.
    pub events_tx: broadcast::Sender<Vec<EventRecord>>,
}

impl DaemonState {
    pub fn new(config: IngestConfig, range: TimeRange, filter: Option<AgentFilter>) -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            ingest: IngestionCoordinator::new(config),
            aggregator: BucketAggregator::new(range, filter),
            events_tx,
        }
    }

    /// Attach today's file and route stored batches to streaming clients.
    pub fn start(&mut self, now: chrono::DateTime<Utc>) {
        let tx = self.events_tx.clone();
        self.ingest.start(
            now,
            Some(Box::new(move |batch: &[EventRecord]| {
                // No receivers is fine: nobody is tailing right now.
                let _ = tx.send(batch.to_vec());
            })),
        );
    }

    pub fn on_file_changed(&mut self, path: &Path, now_ms: i64) -> usize {
        let stored = self.ingest.on_file_changed(path);
        self.feed_aggregator(stored, now_ms)
    }

    pub fn poll_all(&mut self, now_ms: i64) -> usize {
        let stored = self.ingest.poll_all();
        self.feed_aggregator(stored, now_ms)
    }

    fn feed_aggregator(&mut self, stored: Vec<EventRecord>, now_ms: i64) -> usize {
        let count = stored.len();
        for record in stored {
            self.aggregator.add_event(record, now_ms);
        }
        count
    }

    /// Explicit reset of both the store and the aggregator.
    pub fn clear(&mut self) {
        self.ingest.store_mut().clear();
        self.aggregator.clear();
        tracing::info!("cleared in-memory events");
    }

    pub fn status(&self) -> serde_json::Value {
        let store = self.ingest.store();
        serde_json::json!({
            "events_in_memory": store.len(),
            "store_capacity": store.capacity(),
            "total_received": store.total_appended(),
            "current_file": self.ingest.current_path().map(|p| p.display().to_string()),
            "watched_files": self
                .ingest
                .watched_paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>(),
            "time_range": self.aggregator.time_range(),
            "agent_filter": self.aggregator.filter().map(ToString::to_string),
            "buckets": self.aggregator.bucket_count(),
            "history_len": self.aggregator.history_len(),
            "pending": self.aggregator.pending_len(),
        })
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Run the daemon: starts the event loop and UDS server, waits for shutdown.
pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let events_dir = opts
        .events_dir
        .clone()
        .unwrap_or_else(paths::default_events_dir);
    let offset = paths::utc_offset(opts.tz_offset_minutes).ok_or_else(|| {
        anyhow::anyhow!("tz offset out of range: {} minutes", opts.tz_offset_minutes)
    })?;
    let config = IngestConfig::new(events_dir.clone())
        .with_utc_offset(offset)
        .with_store_capacity(opts.store_capacity);

    let state = Arc::new(Mutex::new(DaemonState::new(
        config,
        opts.time_range,
        opts.agent.clone(),
    )));
    state.lock().await.start(Utc::now());

    // Bridge synchronous notify callbacks into the event loop. The sender is
    // held here for the daemon's lifetime so the channel never closes, even
    // when no watcher could be registered.
    let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>(256);
    let _fs_watcher = watch_raw_outputs(&paths::raw_outputs_dir(&events_dir), &notify_tx);

    // Start UDS server
    let server_state = Arc::clone(&state);
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_state).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Start event loop
    let loop_state = Arc::clone(&state);
    let poll_ms = opts.poll_interval_ms.max(1);
    let loop_handle = tokio::spawn(async move {
        run_event_loop(loop_state, notify_rx, poll_ms, now_ms).await;
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = loop_handle => {
            tracing::warn!("event loop exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    // Merge anything still waiting on the debounce timer.
    {
        let mut st = state.lock().await;
        st.aggregator.cleanup(now_ms());
    }

    drop(notify_tx);
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Register a recursive watch on the raw-outputs tree, creating it if needed.
///
/// Returns `None` when notifications are unavailable; the fallback poll
/// interval still picks up new lines.
fn watch_raw_outputs(
    dir: &Path,
    tx: &mpsc::Sender<notify::Result<Event>>,
) -> Option<RecommendedWatcher> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(path = %dir.display(), error = %e, "cannot create event directory");
        return None;
    }

    let tx = tx.clone();
    let mut watcher = match notify::recommended_watcher(move |res| {
        // Best-effort send; if the receiver is dropped we just stop.
        let _ = tx.blocking_send(res);
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "file notifications unavailable, polling only");
            return None;
        }
    };

    if let Err(e) = watcher.watch(dir, RecursiveMode::Recursive) {
        tracing::warn!(path = %dir.display(), error = %e, "failed to watch event directory");
        return None;
    }

    tracing::info!(path = %dir.display(), "watching event directory");
    Some(watcher)
}

/// `clock` supplies epoch milliseconds for every aggregator call.
async fn run_event_loop<C>(
    state: Arc<Mutex<DaemonState>>,
    mut notify_rx: mpsc::Receiver<notify::Result<Event>>,
    poll_ms: u64,
    clock: C,
) where
    C: Fn() -> i64 + Send + Sync,
{
    let mut sweep = interval(Duration::from_millis(SWEEP_INTERVAL_MS));
    let mut rotation = interval(ROTATION_CHECK_INTERVAL);
    let mut poll = interval(Duration::from_millis(poll_ms));

    loop {
        let wait = state
            .lock()
            .await
            .aggregator
            .next_deadline()
            .map(|at| until(at, clock()));
        let debounce = async move {
            match wait {
                Some(left) => tokio::time::sleep(left).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            Some(res) = notify_rx.recv() => {
                match res {
                    Ok(event) => handle_notify_event(&state, &event, clock()).await,
                    Err(e) => tracing::warn!("file watcher error: {e}"),
                }
            }
            () = debounce => {
                state.lock().await.aggregator.flush_due(clock());
            }
            _ = sweep.tick() => {
                state.lock().await.aggregator.sweep(clock());
            }
            _ = rotation.tick() => {
                state.lock().await.ingest.check_rotation(Utc::now());
            }
            _ = poll.tick() => {
                let mut st = state.lock().await;
                let count = st.poll_all(clock());
                if count > 0 {
                    tracing::debug!("fallback poll picked up {count} event(s)");
                }
            }
        }
    }
}

async fn handle_notify_event(state: &Arc<Mutex<DaemonState>>, event: &Event, now_ms: i64) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {}
        _ => return,
    }

    let mut st = state.lock().await;
    for path in &event.paths {
        st.on_file_changed(path, now_ms);
    }
}

/// Time left until `deadline_ms`, zero if already passed.
fn until(deadline_ms: i64, now_ms: i64) -> Duration {
    let remaining = u64::try_from(deadline_ms.saturating_sub(now_ms)).unwrap_or(0);
    Duration::from_millis(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn state_in(dir: &Path) -> (DaemonState, std::path::PathBuf) {
        let mut state = DaemonState::new(
            IngestConfig::new(dir.to_path_buf()),
            TimeRange::OneMinute,
            None,
        );
        let now = Utc::now();
        state.start(now);
        let today = state.ingest.today_path(now);
        (state, today)
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
    fn until_clamps_at_zero() {
        assert_eq!(until(1_000, 400), Duration::from_millis(600));
        assert_eq!(until(1_000, 2_000), Duration::ZERO);
    }

    #[test]
    fn file_change_feeds_store_aggregator_and_subscribers() {
        let dir = tempfile::tempdir().expect("test");
        let (mut state, today) = state_in(dir.path());
        let mut rx = state.events_tx.subscribe();

        let now = now_ms();
        append(
            &today,
            &format!(
                "{{\"source_app\":\"kai\",\"session_id\":\"abcdef1234\",\"hook_event_type\":\"PreToolUse\",\"timestamp\":{now}}}\n{{\"source_app\":\"kai\",\"hook_event_type\":\"Notification\"}}\n"
            ),
        );

        assert_eq!(state.on_file_changed(&today, now), 2);
        assert_eq!(state.ingest.store().len(), 2);
        // The untimed record is stored but not aggregated.
        assert_eq!(state.aggregator.pending_len(), 1);

        let batch = rx.try_recv().expect("test");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, Some(1));

        state.aggregator.flush(now);
        assert_eq!(state.aggregator.tool_call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn event_loop_flushes_after_debounce_and_sweeps() {
        let dir = tempfile::tempdir().expect("test");
        let (state, today) = state_in(dir.path());
        let state = Arc::new(Mutex::new(state));

        // Epoch ms that advances with tokio's paused clock.
        let base = now_ms();
        let started = tokio::time::Instant::now();
        let clock = move || {
            base + i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
        };

        append(
            &today,
            &format!("{{\"source_app\":\"kai\",\"hook_event_type\":\"PreToolUse\",\"timestamp\":{base}}}\n"),
        );

        let (_notify_tx, notify_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_event_loop(Arc::clone(&state), notify_rx, 1000, clock));

        // First poll tick picks the line up; it waits on the debounce.
        tokio::time::sleep(Duration::from_millis(10)).await;
        {
            let st = state.lock().await;
            assert_eq!(st.ingest.store().len(), 1);
            assert_eq!(st.aggregator.pending_len(), 1);
            assert_eq!(st.aggregator.bucket_count(), 0);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let st = state.lock().await;
            assert_eq!(st.aggregator.pending_len(), 0);
            assert_eq!(st.aggregator.bucket_count(), 1);
            assert_eq!(st.aggregator.tool_call_count(), 1);
        }

        // Past the 1m window the sweep tick drops the bucket, history stays.
        tokio::time::sleep(Duration::from_secs(62)).await;
        {
            let st = state.lock().await;
            assert_eq!(st.aggregator.bucket_count(), 0);
            assert_eq!(st.aggregator.history_len(), 1);
        }

        handle.abort();
    }

    #[test]
    fn clear_resets_store_and_aggregator() {
        let dir = tempfile::tempdir().expect("test");
        let (mut state, today) = state_in(dir.path());
        let now = now_ms();
        append(
            &today,
            &format!("{{\"source_app\":\"kai\",\"hook_event_type\":\"Stop\",\"timestamp\":{now}}}\n"),
        );
        state.poll_all(now);
        state.aggregator.flush(now);

        state.clear();
        assert!(state.ingest.store().is_empty());
        assert_eq!(state.aggregator.bucket_count(), 0);
        assert_eq!(state.status()["events_in_memory"], 0);
        assert_eq!(state.status()["total_received"], 1);
    }
}
