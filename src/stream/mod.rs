//! Live frame streaming to viewers.

pub mod frame_streamer;

pub use frame_streamer::{FrameStreamer, FrameSubscription};
