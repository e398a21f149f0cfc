//! Wire events and commands exchanged with viewers.
//!
//! Every message is a JSON object with a `"type"` tag. Server events are a
//! closed set; client messages are parsed with [`parse_command`], which
//! separates unknown command types from malformed payloads so both can be
//! logged and ignored.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::action::ViewerInput;
use super::result::TaskResult;
use super::session::SessionPhase;

/// Severity of a `log` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Progress information.
    Info,
    /// Something unexpected that the run recovered from.
    Warning,
    /// A failure.
    Error,
}

/// Control command kinds, used in acknowledgments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// `pause`
    Pause,
    /// `resume`
    Resume,
    /// `stop`
    Stop,
    /// `nudge`
    Nudge,
}

/// Server-to-client event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Lifecycle phase change.
    Status {
        /// New phase.
        phase: SessionPhase,
    },
    /// A step cycle began.
    StepStarted {
        /// 1-based step number.
        id: u32,
        /// Short description of the step.
        label: String,
    },
    /// A step's action succeeded.
    StepCompleted {
        /// Step number.
        id: u32,
    },
    /// A step's decision or action failed.
    StepFailed {
        /// Step number.
        id: u32,
        /// Failure detail.
        error: String,
    },
    /// Free-form progress message.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
    /// Final (possibly partial) result; emitted exactly once per session.
    Final {
        /// Run result.
        result: Box<TaskResult>,
    },
    /// Screencast frame.
    Frame {
        /// Base64 JPEG.
        data: String,
        /// Page URL at capture time.
        url: String,
        /// Capture time.
        timestamp: DateTime<Utc>,
        /// Per-session frame sequence number.
        sequence: u64,
    },
    /// Acknowledgment of a control command.
    Ack {
        /// Command acknowledged.
        command: CommandKind,
        /// Whether the command changed control state.
        changed: bool,
    },
    /// Reply to a client `ping`.
    Pong {
        /// Server time.
        timestamp: DateTime<Utc>,
    },
    /// Acknowledgment of a viewer input applied to the live browser.
    CommandAck {
        /// Input kind applied.
        command: String,
        /// Whether the browser accepted the input.
        success: bool,
    },
    /// Server keepalive; clients may answer with `pong`.
    Ping,
}

impl ServerEvent {
    /// Status event for `phase`.
    #[must_use]
    pub fn status(phase: SessionPhase) -> Self {
        Self::Status { phase }
    }

    /// Log event.
    #[must_use]
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }

    /// Wire name of the event type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::Log { .. } => "log",
            Self::Final { .. } => "final",
            Self::Frame { .. } => "frame",
            Self::Ack { .. } => "ack",
            Self::Pong { .. } => "pong",
            Self::CommandAck { .. } => "command_ack",
            Self::Ping => "ping",
        }
    }

    /// Serialize to a JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        const FALLBACK: &str =
            r#"{"type":"log","level":"error","message":"serialization failed"}"#;
        serde_json::to_string(self).unwrap_or_else(|_| FALLBACK.to_owned())
    }
}

/// Client command accepted on the control channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Halt at the next suspension point.
    Pause,
    /// Continue after a pause.
    Resume,
    /// Exit at the next suspension point.
    Stop,
    /// Queue a hint for the next decision cycle.
    Nudge {
        /// Hint text.
        text: String,
    },
    /// Liveness probe.
    Ping,
}

impl ControlCommand {
    /// Wire names of every command variant.
    pub const TYPES: &'static [&'static str] = &["pause", "resume", "stop", "nudge", "ping"];
}

/// Client message accepted on the frame channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerCommand {
    /// Load a URL.
    Navigate {
        /// Destination.
        url: String,
    },
    /// Click at viewport coordinates.
    Click {
        /// Horizontal position.
        x: i64,
        /// Vertical position.
        y: i64,
    },
    /// Type text at the current focus.
    Type {
        /// Text to type.
        text: String,
    },
    /// Scroll vertically.
    Scroll {
        /// Scroll amount; positive is down.
        #[serde(default)]
        delta: i64,
    },
    /// Press a key.
    Key {
        /// Key name.
        key: String,
    },
    /// Liveness probe.
    Ping,
    /// Reply to a server keepalive.
    Pong,
}

impl ViewerCommand {
    /// Wire names of every command variant.
    pub const TYPES: &'static [&'static str] =
        &["navigate", "click", "type", "scroll", "key", "ping", "pong"];

    /// Browser input carried by this command, if any.
    #[must_use]
    pub fn into_input(self) -> Option<ViewerInput> {
        match self {
            Self::Navigate { url } => Some(ViewerInput::Navigate { url }),
            Self::Click { x, y } => Some(ViewerInput::Click { x, y }),
            Self::Type { text } => Some(ViewerInput::Type { text }),
            Self::Scroll { delta } => Some(ViewerInput::Scroll { delta }),
            Self::Key { key } => Some(ViewerInput::Key { key }),
            Self::Ping | Self::Pong => None,
        }
    }
}

/// Outcome of parsing a client text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    /// A recognised, well-formed command.
    Command(T),
    /// Well-formed JSON with a `type` this channel does not handle.
    Unknown(String),
    /// Not JSON, no `type` tag, or required fields missing.
    Malformed(String),
}

/// Parse a client text frame into `T`, classifying failures.
///
/// `known` lists the wire names `T` accepts; a payload whose `type` is not
/// in the list is reported as [`Parsed::Unknown`].
#[must_use]
pub fn parse_command<T: DeserializeOwned>(raw: &str, known: &[&str]) -> Parsed<T> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => return Parsed::Malformed(format!("invalid json: {err}")),
    };

    let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Parsed::Malformed("missing 'type' field".into());
    };

    if !known.contains(&kind) {
        return Parsed::Unknown(kind.to_owned());
    }

    let kind = kind.to_owned();
    match serde_json::from_value::<T>(value) {
        Ok(command) => Parsed::Command(command),
        Err(err) => Parsed::Malformed(format!("invalid '{kind}' command: {err}")),
    }
}
