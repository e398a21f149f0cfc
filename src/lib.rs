#![forbid(unsafe_code)]

//! Control plane for oracle-driven browser automation sessions.
//!
//! A [`SessionManager`](orchestrator::session_manager::SessionManager)
//! runs one blocking worker per session. Worker events cross into the
//! network runtime through the
//! [`EventBridge`](orchestrator::bridge::EventBridge), and live frames fan
//! out to viewers through the [`FrameStreamer`](stream::FrameStreamer).

pub mod config;
pub mod driver;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod stream;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
