//! Query and control subcommands: `recent`, `filters`, `range`, `clear`,
//! `status`.

use hookscope_core::types::{EventRecord, FilterOptions, TimeRange};

use crate::client::rpc_call;
use crate::render::{format_filters, format_recent};

pub async fn cmd_recent(
    socket_path: &str,
    limit: usize,
    json: bool,
    use_color: bool,
) -> anyhow::Result<()> {
    let value = rpc_call(socket_path, "recent", serde_json::json!({ "limit": limit })).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    let events: Vec<EventRecord> = serde_json::from_value(value)?;
    println!("{}", format_recent(&events, use_color));
    Ok(())
}

pub async fn cmd_filters(socket_path: &str) -> anyhow::Result<()> {
    let value = rpc_call(socket_path, "filter_options", serde_json::json!({})).await?;
    let options: FilterOptions = serde_json::from_value(value)?;
    println!("{}", format_filters(&options));
    Ok(())
}

pub async fn cmd_range(socket_path: &str, range: TimeRange) -> anyhow::Result<()> {
    rpc_call(
        socket_path,
        "set_time_range",
        serde_json::json!({ "range": range }),
    )
    .await?;
    println!("time range set to {range}");
    Ok(())
}

pub async fn cmd_clear(socket_path: &str) -> anyhow::Result<()> {
    rpc_call(socket_path, "clear", serde_json::json!({})).await?;
    println!("cleared");
    Ok(())
}

pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let value = rpc_call(socket_path, "status", serde_json::json!({})).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
