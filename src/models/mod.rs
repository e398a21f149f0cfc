//! Domain model module declarations.

pub mod action;
pub mod event;
pub mod frame;
pub mod result;
pub mod session;
