//! Routes host commands into the scheduler.

use crate::error::Result;
use crate::host::contract::{HostCommand, Reply, ReplyPayload, Request};
use crate::scheduler::SchedulerHandle;

/// Answers [`Request`]s against a running scheduler.
#[derive(Clone)]
pub struct ScheduleCommandRouter {
    handle: SchedulerHandle,
}

impl ScheduleCommandRouter {
    #[must_use]
    pub fn new(handle: SchedulerHandle) -> Self {
        Self { handle }
    }

    /// Decode and run one request. Failures become error replies.
    pub async fn dispatch(&self, request: &Request) -> Reply {
        let outcome = match request.decode() {
            Ok(command) => self.execute(command).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(payload) => Reply::ok(request.request_id.clone(), payload),
            Err(e) => {
                tracing::warn!(
                    command = ?request.command,
                    request_id = %request.request_id,
                    "host command failed: {e}"
                );
                Reply::error(request.request_id.clone(), &e)
            }
        }
    }

    /// Run a decoded command.
    ///
    /// # Errors
    ///
    /// Returns [`MemorizerError::InvalidInput`](crate::MemorizerError::InvalidInput)
    /// for a rejected start and [`MemorizerError::Channel`](crate::MemorizerError::Channel)
    /// when the scheduler is gone.
    pub async fn execute(&self, command: HostCommand) -> Result<ReplyPayload> {
        match command {
            HostCommand::Ping => Ok(ReplyPayload::Pong { pong: true }),
            HostCommand::Start { items } => {
                let count = items.len();
                self.handle.start(items).await?;
                Ok(ReplyPayload::Started {
                    accepted: true,
                    items: count,
                })
            }
            HostCommand::Stop => {
                self.handle.stop().await?;
                Ok(ReplyPayload::Accepted { accepted: true })
            }
            HostCommand::Wake { source } => {
                self.handle.wake(source).await?;
                Ok(ReplyPayload::Woken {
                    accepted: true,
                    source,
                })
            }
            HostCommand::Status => Ok(ReplyPayload::Status {
                schedule: self.handle.snapshot().await?,
                resources: self.handle.outstanding().await?,
            }),
        }
    }
}
