//! Session orchestration modules.
//!
//! Covers the session registry, per-session control state, the blocking
//! worker loop, loop detection, and the worker-to-network event bridge.

pub mod bridge;
pub mod control_state;
pub mod loop_guard;
pub mod session_manager;
pub mod worker;
