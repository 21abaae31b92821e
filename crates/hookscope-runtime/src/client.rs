//! UDS JSON-RPC client for CLI subcommands.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use hookscope_core::types::EventRecord;

async fn connect(socket_path: &str) -> anyhow::Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;
    Ok(stream.into_split())
}

async fn send_request(
    writer: &mut OwnedWriteHalf,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<()> {
    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    Ok(())
}

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let (reader, mut writer) = connect(socket_path).await?;
    send_request(&mut writer, method, params).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `hookscope tail`: print each newly ingested event until the daemon stops
/// or ctrl-c.
///
/// The write half stays open for the whole stream: the daemon treats EOF on
/// it as the subscriber leaving.
pub async fn cmd_tail(socket_path: &str) -> anyhow::Result<()> {
    let (reader, mut writer) = connect(socket_path).await?;
    send_request(&mut writer, "subscribe", serde_json::json!({})).await?;

    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            next = lines.next_line() => {
                let Some(line) = next? else { break };
                match serde_json::from_str::<EventRecord>(&line) {
                    Ok(record) => println!("{}", format_tail_line(&record)),
                    Err(e) => tracing::debug!("skipping unreadable line: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// One compact line per event: id, agent and event type.
pub(crate) fn format_tail_line(record: &EventRecord) -> String {
    let id = record.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    format!(
        "#{id:<6} {:<24} {}",
        record.agent_id(),
        record.hook_event_type
    )
}
