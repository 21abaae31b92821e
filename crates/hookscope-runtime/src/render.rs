//! Terminal rendering for chart, recent-events and filter views.
//!
//! Pure formatting over values fetched from the daemon, separated from the
//! RPC plumbing for testability.

use std::collections::BTreeMap;

use chrono::DateTime;
use hookscope_core::series::ChartSnapshot;
use hookscope_core::types::{EventRecord, FilterOptions};

/// Eight-level block ramp used by the sparkline.
const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// How many event types the chart legend lists.
const TOP_EVENT_TYPES: usize = 5;

/// Resolve --color flag to bool.
pub fn resolve_color(color: &str) -> bool {
    use std::io::IsTerminal;
    match color {
        "always" => true,
        "never" => false,
        _ => std::io::stdout().is_terminal(),
    }
}

fn paint(text: &str, code: &str, use_color: bool) -> String {
    if use_color {
        format!("\x1b[{code}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}

/// One character per bucket, scaled to the busiest bucket. Empty buckets
/// render as a space so quiet stretches stand out.
pub(crate) fn sparkline(counts: &[u64]) -> String {
    let max = counts.iter().copied().max().unwrap_or(0);
    counts
        .iter()
        .map(|&count| {
            if count == 0 || max == 0 {
                return ' ';
            }
            let top = SPARK_LEVELS.len() - 1;
            let level = count.saturating_mul(top as u64) / max;
            SPARK_LEVELS[usize::try_from(level).unwrap_or(top).min(top)]
        })
        .collect()
}

pub(crate) fn format_chart(snapshot: &ChartSnapshot, use_color: bool) -> String {
    let counts: Vec<u64> = snapshot.series.iter().map(|b| b.count).collect();
    let total: u64 = counts.iter().sum();
    let peak = counts.iter().copied().max().unwrap_or(0);

    let mut by_type: BTreeMap<&str, u64> = BTreeMap::new();
    for bucket in &snapshot.series {
        for (kind, n) in &bucket.event_type_counts {
            *by_type.entry(kind.as_str()).or_default() += n;
        }
    }
    let mut ranked: Vec<(&str, u64)> = by_type.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let mut out = String::new();
    out.push_str(&paint(
        &format!(
            "Events ({}, {}s buckets)",
            snapshot.time_range,
            snapshot.bucket_size_ms / 1000
        ),
        "1",
        use_color,
    ));
    out.push('\n');
    out.push('│');
    out.push_str(&paint(&sparkline(&counts), "36", use_color));
    out.push_str("│\n");
    out.push_str(&format!(
        "total {total}  peak {peak}/bucket  agents {}  tool calls {}\n",
        snapshot.unique_agent_count, snapshot.tool_call_count
    ));

    let timing = &snapshot.timing;
    if timing.max_gap_ms > 0 {
        out.push_str(&format!(
            "gap min {}ms  avg {:.0}ms  max {}ms\n",
            timing.min_gap_ms, timing.avg_gap_ms, timing.max_gap_ms
        ));
    }

    if ranked.is_empty() {
        out.push_str(&paint("(no events in range)", "2", use_color));
    } else {
        let legend: Vec<String> = ranked
            .iter()
            .take(TOP_EVENT_TYPES)
            .map(|(kind, n)| format!("{kind} {n}"))
            .collect();
        out.push_str(&legend.join("  "));
    }
    out
}

fn format_clock(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(|| "--:--:--".to_string(), |t| t.format("%H:%M:%S").to_string())
}

/// Newest first, one event per line.
pub(crate) fn format_recent(events: &[EventRecord], use_color: bool) -> String {
    if events.is_empty() {
        return "(no events)".to_string();
    }
    events
        .iter()
        .map(|e| {
            let id = e.id.map_or_else(|| "-".to_string(), |id| id.to_string());
            format!(
                "{:>6}  {}  {:<24} {}",
                id,
                paint(&format_clock(e.timestamp), "2", use_color),
                e.agent_id(),
                paint(&e.hook_event_type, "33", use_color)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn format_filters(options: &FilterOptions) -> String {
    fn section(title: &str, values: &[String]) -> String {
        if values.is_empty() {
            format!("{title}: (none)")
        } else {
            format!("{title}:\n  {}", values.join("\n  "))
        }
    }
    [
        section("apps", &options.source_apps),
        section("sessions", &options.session_ids),
        section("event types", &options.hook_event_types),
    ]
    .join("\n")
}
