//! Stdin/stdout JSON bridge for the schedule host.
//!
//! Reads newline-delimited JSON [`Request`]s, dispatches them through
//! [`ScheduleCommandRouter`], and writes [`Reply`] and [`StatusEvent`]
//! frames as newline-delimited JSON.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::error::{MemorizerError, Result};
use crate::host::contract::{PARSE_ERROR_ID, Reply, Request, StatusEvent};
use crate::host::router::ScheduleCommandRouter;
use crate::status::StatusNotice;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};

/// Run the bridge on the process's stdin and stdout until stdin closes.
///
/// # Errors
///
/// Returns [`MemorizerError::Channel`] when stdin or stdout fail.
pub async fn run_stdio_bridge(
    router: ScheduleCommandRouter,
    notices: broadcast::Receiver<StatusNotice>,
) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    let output = BufWriter::new(tokio::io::stdout());
    run_bridge(input, output, router, notices).await
}

/// Run the bridge over arbitrary streams until `input` reaches EOF.
///
/// Two tasks operate in parallel:
///
/// 1. **Reader** -- reads JSON lines from `input`, dispatches each command
///    and writes the response.
/// 2. **Event forwarder** -- turns status notices into `schedule.status`
///    events.
///
/// # Errors
///
/// Returns [`MemorizerError::Channel`] when reading or writing fails.
pub async fn run_bridge<R, W>(
    input: R,
    output: W,
    router: ScheduleCommandRouter,
    mut notices: broadcast::Receiver<StatusNotice>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(output));

    let event_writer = Arc::clone(&writer);
    let event_handle = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => match serde_json::to_string(&StatusEvent::from(notice)) {
                    Ok(json) => {
                        let mut w = event_writer.lock().await;
                        if let Err(e) = write_line(&mut *w, &json).await {
                            tracing::warn!(
                                error = %e,
                                "failed to write status event; stopping event forwarder"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize status event; skipping");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some notices were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("status channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    let reader_result = run_reader(input, router, Arc::clone(&writer)).await;

    event_handle.abort();
    let _ = event_handle.await;

    reader_result
}

async fn run_reader<R, W>(
    mut input: R,
    router: ScheduleCommandRouter,
    writer: Arc<Mutex<W>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = input
            .read_line(&mut line)
            .await
            .map_err(|e| MemorizerError::Channel(format!("failed to read command: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("input closed (EOF); shutting down bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => router.dispatch(&request).await,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse request");
                Reply::error(
                    PARSE_ERROR_ID,
                    &MemorizerError::Protocol(format!("failed to parse request: {e}")),
                )
            }
        };

        let json = serde_json::to_string(&reply)
            .map_err(|e| MemorizerError::Channel(format!("failed to serialize reply: {e}")))?;
        let mut w = writer.lock().await;
        write_line(&mut *w, &json).await?;
    }

    Ok(())
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| MemorizerError::Channel(format!("failed to write output: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| MemorizerError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| MemorizerError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
