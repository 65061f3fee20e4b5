//! Local control socket.
//!
//! The lease owner listens on a Unix domain socket and speaks the same line
//! protocol as stdio. Other invocations connect to it instead of driving a
//! second scheduler: `--stop` sends one command, and an interactive host that
//! finds the schedule already owned relays its stdin/stdout.
//!
//! Non-Unix targets have no control socket yet.

use crate::error::{MemorizerError, Result};
use crate::host::contract::{HostCommand, Reply};
use crate::host::router::ScheduleCommandRouter;
use crate::status::BroadcastSink;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// How long [`send_control`] waits for the owner to answer.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept connections on `path` until `shutdown` is cancelled.
///
/// A stale socket file is replaced. Open connections are dropped and the
/// socket file removed on shutdown.
///
/// # Errors
///
/// Returns [`MemorizerError::Channel`] when the socket cannot be bound.
pub async fn serve_control(
    path: &Path,
    router: ScheduleCommandRouter,
    notices: BroadcastSink,
    shutdown: CancellationToken,
) -> Result<()> {
    #[cfg(unix)]
    {
        unix::serve(path, router, notices, shutdown).await
    }

    #[cfg(not(unix))]
    {
        let _ = (path, router, notices, shutdown);
        Err(unsupported())
    }
}

/// Send one command to the host listening on `path` and return its reply.
///
/// # Errors
///
/// Returns [`MemorizerError::Channel`] when nobody listens on `path`, the
/// connection fails, or no reply arrives within [`CONTROL_TIMEOUT`].
pub async fn send_control(path: &Path, command: &HostCommand) -> Result<Reply> {
    #[cfg(unix)]
    {
        tokio::time::timeout(CONTROL_TIMEOUT, unix::request(path, command))
            .await
            .map_err(|_| MemorizerError::Channel("control socket did not answer".to_owned()))?
    }

    #[cfg(not(unix))]
    {
        let _ = (path, command);
        Err(unsupported())
    }
}

/// Relay `input` to the host on `path` and its frames back to `output`.
///
/// Ends once the host closes the connection after `input` reaches EOF.
///
/// # Errors
///
/// Returns [`MemorizerError::Channel`] when the connection fails.
pub async fn relay_control<R, W>(path: &Path, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    #[cfg(unix)]
    {
        unix::relay(path, input, output).await
    }

    #[cfg(not(unix))]
    {
        let _ = (path, input, output);
        Err(unsupported())
    }
}

#[cfg(not(unix))]
fn unsupported() -> MemorizerError {
    MemorizerError::Channel("the control socket needs unix-domain sockets".to_owned())
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::host::contract::Request;
    use crate::host::stdio::run_bridge;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::task::JoinSet;
    use tracing::{debug, info, warn};

    pub(super) async fn serve(
        path: &Path,
        router: ScheduleCommandRouter,
        notices: BroadcastSink,
        shutdown: CancellationToken,
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).map_err(|e| {
            MemorizerError::Channel(format!(
                "failed to bind control socket {}: {e}",
                path.display()
            ))
        })?;
        info!(socket = %path.display(), "control socket listening");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("control client connected");
                        let (read, write) = stream.into_split();
                        connections.spawn(run_bridge(
                            BufReader::new(read),
                            write,
                            router.clone(),
                            notices.subscribe(),
                        ));
                    }
                    Err(e) => warn!("control socket accept failed: {e}"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    match joined {
                        Ok(Ok(())) => debug!("control client disconnected"),
                        Ok(Err(e)) => warn!("control connection failed: {e}"),
                        Err(e) => warn!("control connection task panicked: {e}"),
                    }
                }
            }
        }

        connections.shutdown().await;
        if let Err(e) = std::fs::remove_file(path) {
            debug!("control socket already removed: {e}");
        }
        info!("control socket closed");
        Ok(())
    }

    async fn connect(path: &Path) -> Result<UnixStream> {
        UnixStream::connect(path).await.map_err(|e| {
            MemorizerError::Channel(format!(
                "failed to connect to control socket {}: {e}",
                path.display()
            ))
        })
    }

    pub(super) async fn request(path: &Path, command: &HostCommand) -> Result<Reply> {
        let stream = connect(path).await?;
        let (read, mut write) = stream.into_split();

        let request = Request::new(uuid::Uuid::new_v4().to_string(), command);
        let mut line = serde_json::to_string(&request)
            .map_err(|e| MemorizerError::Channel(format!("failed to serialize request: {e}")))?;
        line.push('\n');
        write
            .write_all(line.as_bytes())
            .await
            .map_err(|e| MemorizerError::Channel(format!("failed to send request: {e}")))?;

        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| MemorizerError::Channel(format!("failed to read reply: {e}")))?
        {
            // Status events share the stream.
            match serde_json::from_str::<Reply>(&line) {
                Ok(reply) if reply.request_id == request.request_id => {
                    if let Err(e) = write.shutdown().await {
                        debug!("control socket already closed: {e}");
                    }
                    return Ok(reply);
                }
                _ => {}
            }
        }
        Err(MemorizerError::Channel(
            "control socket closed before replying".to_owned(),
        ))
    }

    pub(super) async fn relay<R, W>(path: &Path, mut input: R, mut output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let stream = connect(path).await?;
        let (mut read, mut write) = stream.into_split();

        let upstream = async {
            tokio::io::copy(&mut input, &mut write).await?;
            write.shutdown().await
        };
        let downstream = async {
            tokio::io::copy(&mut read, &mut output).await?;
            output.flush().await
        };
        let (up, down) = tokio::join!(upstream, downstream);
        up.and(down)
            .map_err(|e| MemorizerError::Channel(format!("control relay failed: {e}")))
    }
}
