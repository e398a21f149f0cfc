//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Requested session or entity does not exist.
    NotFound(String),
    /// Session limit reached or identifier already in use.
    Capacity(String),
    /// Browser resource crashed, refused a command, or became unreachable.
    Resource(String),
    /// Decision oracle failed to produce a usable decision.
    Oracle(String),
    /// Event could not be handed to an attached viewer in time.
    Delivery(String),
    /// Malformed or unsupported client message.
    Protocol(String),
    /// Frame capture source is no longer available.
    Streaming(String),
    /// IPC communication failure.
    Ipc(String),
    /// HTTP collaborator request failure.
    Http(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Capacity(msg) => write!(f, "capacity: {msg}"),
            Self::Resource(msg) => write!(f, "resource: {msg}"),
            Self::Oracle(msg) => write!(f, "oracle: {msg}"),
            Self::Delivery(msg) => write!(f, "delivery: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Streaming(msg) => write!(f, "streaming: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid json: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
