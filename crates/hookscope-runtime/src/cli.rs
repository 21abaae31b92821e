//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hookscope_core::types::{AgentFilter, TimeRange};
use hookscope_source_jsonl::paths::{DEFAULT_UTC_OFFSET_MINUTES, EVENTS_DIR_ENV};

#[derive(Parser)]
#[command(name = "hookscope", about = "Live dashboard for AI assistant hook events")]
pub struct Cli {
    /// UDS socket path (default: /tmp/hookscope-$USER/hookscoped.sock)
    #[arg(long, short = 's', global = true, env = "HOOKSCOPE_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (file tailing + aggregation + UDS server)
    Daemon(DaemonOpts),
    /// Show the event chart and summary metrics (default)
    Chart(ChartOpts),
    /// Live-refresh the chart
    Watch(WatchOpts),
    /// List the most recent events
    Recent(RecentOpts),
    /// Print each newly ingested event (id, agent, event type) as it arrives
    Tail,
    /// List distinct apps, sessions and event types
    Filters,
    /// Switch the chart time range
    Range(RangeOpts),
    /// Drop all in-memory events and buckets
    Clear,
    /// Show daemon status (JSON)
    Status,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Base directory holding history/raw-outputs/
    #[arg(long, env = EVENTS_DIR_ENV)]
    pub events_dir: Option<PathBuf>,

    /// Fixed UTC offset (minutes) deciding which day's file is current
    #[arg(long, default_value_t = DEFAULT_UTC_OFFSET_MINUTES, allow_hyphen_values = true)]
    pub tz_offset_minutes: i32,

    /// Initial chart time range
    #[arg(long, default_value = "1m")]
    pub time_range: TimeRange,

    /// Only aggregate events from one agent ("app:session-prefix")
    #[arg(long)]
    pub agent: Option<AgentFilter>,

    /// Fallback poll interval in milliseconds (for filesystems without notifications)
    #[arg(long, default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Number of events kept in memory
    #[arg(long, default_value = "1000")]
    pub store_capacity: usize,
}

#[derive(clap::Args, Default)]
pub struct ChartOpts {
    /// Print the raw chart snapshot as JSON
    #[arg(long)]
    pub json: bool,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

#[derive(clap::Args)]
pub struct WatchOpts {
    /// Refresh interval in seconds
    #[arg(long, short = 'n', default_value = "1")]
    pub interval: u64,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

#[derive(clap::Args)]
pub struct RecentOpts {
    /// Maximum number of events to show
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,

    /// Print events as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct RangeOpts {
    /// One of 1m, 3m, 5m, 10m
    pub range: TimeRange,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/hookscope/hookscoped.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/hookscope-{user}/hookscoped.sock")
}
