//! Wire types of the schedule host protocol.
//!
//! One JSON object per line. A client sends [`Request`]s; the host answers
//! each with a [`Reply`] echoing its `request_id` and pushes
//! [`StatusEvent`]s whenever the schedule reports progress.

use crate::error::{MemorizerError, Result};
use crate::scheduler::{ResourceReport, SchedulerSnapshot, WakeSource};
use crate::status::StatusNotice;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol version carried in every frame as `v`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Event name of [`StatusEvent`]s.
pub const STATUS_EVENT: &str = "schedule.status";

/// `request_id` of replies to lines that could not be decoded at all.
pub const PARSE_ERROR_ID: &str = "parse-error";

/// Command names on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    Ping,
    #[serde(rename = "schedule.start")]
    Start,
    #[serde(rename = "schedule.stop")]
    Stop,
    #[serde(rename = "schedule.wake")]
    Wake,
    #[serde(rename = "schedule.status")]
    Status,
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Ping,
    Start { items: Vec<String> },
    Stop,
    /// Defaults to [`WakeSource::SafetyNet`] when the payload names none.
    Wake { source: WakeSource },
    Status,
}

#[derive(Deserialize)]
struct StartPayload {
    #[serde(default)]
    items: Vec<String>,
}

#[derive(Deserialize)]
struct WakePayload {
    source: Option<WakeSource>,
}

/// One line from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    #[must_use]
    pub fn new(request_id: impl Into<String>, command: &HostCommand) -> Self {
        let (name, payload) = match command {
            HostCommand::Ping => (CommandName::Ping, json!({})),
            HostCommand::Start { items } => (CommandName::Start, json!({ "items": items })),
            HostCommand::Stop => (CommandName::Stop, Value::Null),
            HostCommand::Wake { source } => (CommandName::Wake, json!({ "source": source })),
            HostCommand::Status => (CommandName::Status, Value::Null),
        };
        Self {
            v: PROTOCOL_VERSION,
            request_id: request_id.into(),
            command: name,
            payload,
        }
    }

    /// Check the frame and decode its payload.
    ///
    /// # Errors
    ///
    /// [`MemorizerError::Protocol`] for a foreign version or a blank request
    /// id, [`MemorizerError::InvalidInput`] for a payload of the wrong shape.
    pub fn decode(&self) -> Result<HostCommand> {
        if self.v != PROTOCOL_VERSION {
            return Err(MemorizerError::Protocol(format!(
                "unsupported protocol version {}; expected {PROTOCOL_VERSION}",
                self.v
            )));
        }
        if self.request_id.trim().is_empty() {
            return Err(MemorizerError::Protocol(
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(match self.command {
            CommandName::Ping => HostCommand::Ping,
            CommandName::Start => {
                let payload: StartPayload = payload_as(&self.payload)?;
                HostCommand::Start {
                    items: payload.items,
                }
            }
            CommandName::Stop => HostCommand::Stop,
            CommandName::Wake => {
                let source = if self.payload.is_null() {
                    None
                } else {
                    payload_as::<WakePayload>(&self.payload)?.source
                };
                HostCommand::Wake {
                    source: source.unwrap_or(WakeSource::SafetyNet),
                }
            }
            CommandName::Status => HostCommand::Status,
        })
    }
}

fn payload_as<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| MemorizerError::InvalidInput(format!("invalid payload: {e}")))
}

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyPayload {
    Pong {
        pong: bool,
    },
    Status {
        schedule: SchedulerSnapshot,
        resources: ResourceReport,
    },
    Started {
        accepted: bool,
        items: usize,
    },
    Woken {
        accepted: bool,
        source: WakeSource,
    },
    Accepted {
        accepted: bool,
    },
}

/// The host's answer to one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: Option<ReplyPayload>,
    pub error: Option<String>,
}

impl Reply {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: ReplyPayload) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, error: &MemorizerError) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: None,
            error: Some(error.to_string()),
        }
    }
}

/// Payload of a [`StatusEvent`]: the notice plus its rendered text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    #[serde(flatten)]
    pub notice: StatusNotice,
    pub text: String,
}

/// Unsolicited progress report pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub v: u32,
    pub event_id: String,
    pub event: &'static str,
    pub payload: StatusPayload,
}

impl From<StatusNotice> for StatusEvent {
    fn from(notice: StatusNotice) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            event_id: uuid::Uuid::new_v4().to_string(),
            event: STATUS_EVENT,
            payload: StatusPayload {
                text: notice.to_string(),
                notice,
            },
        }
    }
}
