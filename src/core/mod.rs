//! Core types shared by every augur component.

mod error;
pub mod log;
pub mod progress;

pub use error::{Error, Result, REPO_STATE_RESET_MSG};
pub use log::{EventLevel, EventSink, LogContext, LogEvent, MemorySink, TracingSink};
