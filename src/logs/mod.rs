// src/logs/mod.rs

//! Per-job output capture and fan-out.

pub mod broadcaster;
pub mod event;

pub use broadcaster::{LogBroadcaster, Subscription};
pub use event::{JobEvent, LogLine};
