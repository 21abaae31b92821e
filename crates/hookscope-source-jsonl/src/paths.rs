//! Location of the day-partitioned event log.
//!
//! Layout: `{base}/history/raw-outputs/YYYY-MM/YYYY-MM-DD_all-events.jsonl`.
//! The calendar day is taken in one fixed UTC offset so every deployment
//! rotates at the same instant, whatever the host timezone.

use chrono::{DateTime, FixedOffset, Utc};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overriding the base directory.
pub const EVENTS_DIR_ENV: &str = "HOOKSCOPE_DIR";

/// UTC-08:00, the offset the capture hook dates its files in.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -8 * 60;

pub const EVENTS_FILE_SUFFIX: &str = "_all-events.jsonl";

/// `$HOME/.local/share/hookscope`, or `./.local/share/hookscope` without a home.
pub fn default_events_dir() -> PathBuf {
    let home = match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home),
        Err(_) => {
            warn!("could not determine home directory, using current directory");
            PathBuf::from(".")
        }
    };
    home.join(".local").join("share").join("hookscope")
}

/// Directory holding the month subdirectories.
pub fn raw_outputs_dir(base: &Path) -> PathBuf {
    base.join("history").join("raw-outputs")
}

/// Build a fixed offset from minutes east of UTC. `None` when out of range.
pub fn utc_offset(minutes: i32) -> Option<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
}

/// Path of the event file covering `now` in the given offset.
pub fn events_file_for(base: &Path, now: DateTime<Utc>, offset: FixedOffset) -> PathBuf {
    let local = now.with_timezone(&offset);
    let month = local.format("%Y-%m").to_string();
    let file_name = format!("{}{EVENTS_FILE_SUFFIX}", local.format("%Y-%m-%d"));
    raw_outputs_dir(base).join(month).join(file_name)
}
