//! `hookscope watch`: live-refresh chart view.

use std::time::Duration;

use crate::cmd_chart::fetch_chart;
use crate::render::{format_chart, resolve_color};

/// Entry point for `hookscope watch`.
pub async fn cmd_watch(socket_path: &str, interval: u64, color: &str) -> anyhow::Result<()> {
    let use_color = resolve_color(color);

    loop {
        // Clear screen + cursor home
        print!("\x1b[2J\x1b[H");

        match fetch_chart(socket_path).await {
            Ok(snapshot) => println!("{}", format_chart(&snapshot, use_color)),
            Err(e) => println!("Cannot connect to daemon: {e}"),
        }

        if use_color {
            println!("\n\x1b[2mhookscope watch, Ctrl-C to quit\x1b[0m");
        } else {
            println!("\nhookscope watch, Ctrl-C to quit");
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval.max(1))) => {}
            _ = tokio::signal::ctrl_c() => { break; }
        }
    }

    Ok(())
}
