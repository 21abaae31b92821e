//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.
//!
//! `subscribe` is the one long-lived method: the connection stays open and
//! every newly stored event is written to it as one JSON line, until the
//! client closes its end.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{Mutex, broadcast};

use hookscope_core::types::{EventRecord, TimeRange};

use crate::daemon::{DaemonState, now_ms};

/// Default `limit` for the `recent` method.
const DEFAULT_RECENT_LIMIT: u64 = 100;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RpcError {
    MethodNotFound,
    InvalidParams(String),
    Internal(String),
}

impl RpcError {
    fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -32603,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::MethodNotFound => "method not found".to_string(),
            Self::InvalidParams(msg) => format!("invalid params: {msg}"),
            Self::Internal(msg) => format!("internal error: {msg}"),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Run the UDS JSON-RPC server.
pub async fn run_server(socket_path: &str, state: Arc<Mutex<DaemonState>>) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    state: Arc<Mutex<DaemonState>>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: serde_json::Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();

    if method == "subscribe" {
        let rx = state.lock().await.events_tx.subscribe();
        return stream_events(rx, reader, writer).await;
    }

    let outcome = {
        let mut st = state.lock().await;
        dispatch(&mut st, method, &request["params"], now_ms())
    };

    let response = match outcome {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(e) => serde_json::json!({
            "jsonrpc": "2.0",
            "error": {"code": e.code(), "message": e.message()},
            "id": id,
        }),
    };
    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

/// Forward every stored batch to the client until it hangs up.
///
/// The read side is watched for EOF so an idle subscriber that went away is
/// released without waiting for the next batch.
async fn stream_events<R, W>(
    mut rx: broadcast::Receiver<Vec<EventRecord>>,
    mut reader: R,
    mut writer: W,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut scratch = [0u8; 256];
    loop {
        let received = tokio::select! {
            received = rx.recv() => received,
            read = reader.read(&mut scratch) => match read {
                Ok(0) | Err(_) => {
                    tracing::debug!("subscriber disconnected");
                    return Ok(());
                }
                Ok(_) => continue,
            },
        };
        match received {
            Ok(batch) => {
                let mut out = String::new();
                for record in &batch {
                    out.push_str(&serde_json::to_string(record)?);
                    out.push('\n');
                }
                writer.write_all(out.as_bytes()).await?;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("subscriber lagged, skipped {skipped} batch(es)");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

/// Execute one query against the daemon state.
pub(crate) fn dispatch(
    state: &mut DaemonState,
    method: &str,
    params: &serde_json::Value,
    now_ms: i64,
) -> Result<serde_json::Value, RpcError> {
    let result = match method {
        "recent" => {
            let limit = match &params["limit"] {
                serde_json::Value::Null => DEFAULT_RECENT_LIMIT,
                v => v
                    .as_u64()
                    .ok_or_else(|| RpcError::InvalidParams("limit must be a non-negative integer".into()))?,
            };
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            serde_json::to_value(state.ingest.store().recent(limit))?
        }
        "filter_options" => serde_json::to_value(state.ingest.store().filter_options())?,
        "series" => serde_json::to_value(state.aggregator.series(now_ms))?,
        "chart" => serde_json::to_value(state.aggregator.snapshot(now_ms))?,
        "unique_agent_count" => serde_json::json!(state.aggregator.unique_agent_count(now_ms)),
        "tool_call_count" => serde_json::json!(state.aggregator.tool_call_count()),
        "timing_metrics" => serde_json::to_value(state.aggregator.timing_metrics(now_ms))?,
        "set_time_range" => {
            let raw = params["range"]
                .as_str()
                .ok_or_else(|| RpcError::InvalidParams("missing range".into()))?;
            let range: TimeRange = raw
                .parse()
                .map_err(|e: hookscope_core::HookscopeError| RpcError::InvalidParams(e.to_string()))?;
            state.aggregator.set_time_range(range, now_ms);
            tracing::info!(%range, "time range changed");
            serde_json::json!({ "time_range": range })
        }
        "clear" => {
            state.clear();
            serde_json::json!({ "cleared": true })
        }
        "status" => state.status(),
        _ => return Err(RpcError::MethodNotFound),
    };
    Ok(result)
}
