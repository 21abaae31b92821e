use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::HookscopeError;

/// Number of leading `session_id` characters used as the session fingerprint.
pub const SESSION_FINGERPRINT_LEN: usize = 8;

/// App label used in bucket counts when an event carries no `source_app`.
pub const UNKNOWN_APP: &str = "unknown";

/// Event type counted by [`crate::aggregator::BucketAggregator::tool_call_count`].
pub const TOOL_CALL_EVENT_TYPE: &str = "PreToolUse";

// ─── EventRecord ──────────────────────────────────────────────────

/// One hook event, as written to the JSONL log by the capture hook.
///
/// Only `source_app`, `session_id`, `hook_event_type` and `timestamp` are
/// read by the pipeline. Every other top-level field lands in `extra` and is
/// written back out untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Assigned by [`crate::store::EventStore::append`]; never trusted from input.
    /// Any incoming value is consumed here so it cannot reject the line or
    /// leak into `extra`.
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<u64>,
    #[serde(default, alias = "sourceApp", deserialize_with = "lenient_string")]
    pub source_app: String,
    #[serde(default, alias = "sessionId", deserialize_with = "lenient_string")]
    pub session_id: String,
    #[serde(default, alias = "hookEventType", deserialize_with = "lenient_string")]
    pub hook_event_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Epoch milliseconds. Non-numeric values are treated as absent.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventRecord {
    pub fn new(
        source_app: impl Into<String>,
        session_id: impl Into<String>,
        hook_event_type: impl Into<String>,
        timestamp: Option<i64>,
    ) -> Self {
        Self {
            source_app: source_app.into(),
            session_id: session_id.into(),
            hook_event_type: hook_event_type.into(),
            timestamp,
            ..Self::default()
        }
    }

    /// Parse a single JSONL line.
    pub fn from_json_line(line: &str) -> Result<Self, HookscopeError> {
        Ok(serde_json::from_str(line)?)
    }

    /// First [`SESSION_FINGERPRINT_LEN`] characters of the session id.
    pub fn session_fingerprint(&self) -> &str {
        fingerprint(&self.session_id)
    }

    /// Display identity of the producing agent: `"{source_app}:{fingerprint}"`.
    pub fn agent_id(&self) -> String {
        format!("{}:{}", self.source_app, self.session_fingerprint())
    }

    /// App label for bucket counts (`"unknown"` when empty).
    pub fn app_label(&self) -> &str {
        if self.source_app.is_empty() {
            UNKNOWN_APP
        } else {
            &self.source_app
        }
    }
}

fn fingerprint(session_id: &str) -> &str {
    match session_id.char_indices().nth(SESSION_FINGERPRINT_LEN) {
        Some((idx, _)) => &session_id[..idx],
        None => session_id,
    }
}

/// Non-string values (null, numbers, objects) read as empty.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        _ => Ok(String::new()),
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_u64())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    #[allow(clippy::cast_possible_truncation)]
    let ts = value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));
    Ok(ts)
}

// ─── TimeBucket ───────────────────────────────────────────────────

/// Left-aligned bucket boundary for `timestamp_ms`.
///
/// Uses euclidean division so pre-epoch timestamps still floor downwards.
pub fn bucket_timestamp(timestamp_ms: i64, bucket_size_ms: i64) -> i64 {
    timestamp_ms.div_euclid(bucket_size_ms) * bucket_size_ms
}

/// Counts for one fixed-width time interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub timestamp: i64,
    pub count: u64,
    pub event_type_counts: BTreeMap<String, u64>,
    pub session_counts: BTreeMap<String, u64>,
    pub app_counts: BTreeMap<String, u64>,
}

impl TimeBucket {
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Fold one event into this bucket's counters.
    pub fn record(&mut self, event: &EventRecord) {
        self.count += 1;
        *self
            .event_type_counts
            .entry(event.hook_event_type.clone())
            .or_insert(0) += 1;
        *self
            .session_counts
            .entry(event.session_id.clone())
            .or_insert(0) += 1;
        *self
            .app_counts
            .entry(event.app_label().to_owned())
            .or_insert(0) += 1;
    }
}

// ─── TimeRange ────────────────────────────────────────────────────

/// Window and bucket geometry for one [`TimeRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRangeConfig {
    pub window_duration_ms: i64,
    pub bucket_size_ms: i64,
    pub max_bucket_count: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "10m")]
    TenMinutes,
}

impl TimeRange {
    pub const ALL: [Self; 4] = [
        Self::OneMinute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::TenMinutes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::TenMinutes => "10m",
        }
    }

    pub fn config(self) -> TimeRangeConfig {
        let (window_duration_ms, bucket_size_ms) = match self {
            Self::OneMinute => (60_000, 1_000),
            Self::ThreeMinutes => (180_000, 3_000),
            Self::FiveMinutes => (300_000, 5_000),
            Self::TenMinutes => (600_000, 10_000),
        };
        TimeRangeConfig {
            window_duration_ms,
            bucket_size_ms,
            max_bucket_count: 60,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = HookscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| HookscopeError::InvalidTimeRange(s.to_owned()))
    }
}

// ─── AgentFilter ──────────────────────────────────────────────────

/// Restricts an aggregation view to one `(source_app, session prefix)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentFilter {
    pub app: String,
    pub session: String,
}

impl AgentFilter {
    pub fn matches(&self, event: &EventRecord) -> bool {
        event.source_app == self.app && event.session_fingerprint() == self.session
    }
}

impl FromStr for AgentFilter {
    type Err = HookscopeError;

    /// Parses `"app:session"`; anything other than exactly two parts is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(app), Some(session), None) => Ok(Self {
                app: app.to_owned(),
                session: session.to_owned(),
            }),
            _ => Err(HookscopeError::InvalidAgentFilter(s.to_owned())),
        }
    }
}

impl fmt::Display for AgentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app, self.session)
    }
}

// ─── Query results ────────────────────────────────────────────────

/// Distinct values used to populate filter controls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub source_apps: Vec<String>,
    pub session_ids: Vec<String>,
    pub hook_event_types: Vec<String>,
}

/// Gap statistics between consecutive events, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingMetrics {
    pub min_gap_ms: i64,
    pub max_gap_ms: i64,
    pub avg_gap_ms: f64,
}

// ─── Tests ────────────────────────────────────────────────────────
