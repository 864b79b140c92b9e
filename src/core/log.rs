//! Component-scoped logging context.
//!
//! Components receive a [`LogContext`] at construction instead of reaching for
//! a global logger. Every event goes to `tracing` inside the context's span and
//! is mirrored to an [`EventSink`], which lets tests observe what a component
//! reported without installing a subscriber.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Level, Span};

/// Severity of a component event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// A single event emitted by a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: EventLevel,
    /// Component that emitted the event (e.g. `"resolver"`).
    pub component: String,
    pub message: String,
}

/// Destination for component events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &LogEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &LogEvent) {
        let component = event.component.as_str();
        match event.level {
            EventLevel::Debug => tracing::debug!(component, "{}", event.message),
            EventLevel::Info => tracing::info!(component, "{}", event.message),
            EventLevel::Warn => tracing::warn!(component, "{}", event.message),
            EventLevel::Error => tracing::error!(component, "{}", event.message),
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Whether any event at `level` contains `needle`.
    pub fn contains(&self, level: EventLevel, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &LogEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Logging context handed to each component.
#[derive(Clone)]
pub struct LogContext {
    component: String,
    span: Span,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogContext")
            .field("component", &self.component)
            .finish()
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new("augur", Arc::new(TracingSink))
    }
}

impl LogContext {
    /// Create a root context for a component writing to `sink`.
    pub fn new(component: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        let component = component.into();
        let span = tracing::span!(Level::INFO, "component", name = %component);
        Self {
            component,
            span,
            sink,
        }
    }

    /// Derive a context for a sub-component sharing the same sink.
    pub fn child(&self, component: impl Into<String>) -> Self {
        let component = component.into();
        let span = {
            let _parent = self.span.enter();
            tracing::span!(Level::INFO, "component", name = %component)
        };
        Self {
            component,
            span,
            sink: Arc::clone(&self.sink),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    fn emit(&self, level: EventLevel, message: String) {
        let _entered = self.span.enter();
        self.sink.record(&LogEvent {
            level,
            component: self.component.clone(),
            message,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(EventLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(EventLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(EventLevel::Error, message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_events() {
        let sink = Arc::new(MemorySink::new());
        let ctx = LogContext::new("composer", sink.clone());

        ctx.info("round 1 started");
        ctx.warn("file too large");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, EventLevel::Info);
        assert_eq!(events[0].component, "composer");
        assert!(sink.contains(EventLevel::Warn, "too large"));
        assert!(!sink.contains(EventLevel::Error, "too large"));
    }

    #[test]
    fn test_child_shares_sink() {
        let sink = Arc::new(MemorySink::new());
        let ctx = LogContext::new("augment", sink.clone());
        let child = ctx.child("evaluator");

        child.debug("evaluating 2 candidates");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].component, "evaluator");
        assert_eq!(child.component(), "evaluator");
    }

    #[test]
    fn test_event_level_display() {
        assert_eq!(EventLevel::Warn.to_string(), "warn");
        assert!(EventLevel::Error > EventLevel::Info);
    }
}
