//! `hookscope chart`: one-shot chart of the active time range.

use hookscope_core::series::ChartSnapshot;

use crate::client::rpc_call;
use crate::render::format_chart;

pub(crate) async fn fetch_chart(socket_path: &str) -> anyhow::Result<ChartSnapshot> {
    let value = rpc_call(socket_path, "chart", serde_json::json!({})).await?;
    Ok(serde_json::from_value(value)?)
}

/// Entry point for `hookscope chart`.
pub async fn cmd_chart(socket_path: &str, json: bool, use_color: bool) -> anyhow::Result<()> {
    let snapshot = fetch_chart(socket_path).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", format_chart(&snapshot, use_color));
    }
    Ok(())
}
