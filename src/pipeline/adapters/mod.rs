//! Adapter implementations of the pipeline ports.

pub mod memory;
mod notify;
pub mod postgres;

pub use notify::{RecordingNotifier, TracingNotifier};
