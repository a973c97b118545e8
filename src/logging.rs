//! Injected logger capability.
//!
//! Operator-facing events (connects, disconnects, verification outcomes,
//! startup failures) go through a [`Logger`] handed to the server at
//! construction rather than a process-wide singleton. The default sink
//! forwards to the `log` facade; [`MemorySink`] keeps lines in memory for
//! tests and for front-ends that render their own log panel.

use std::sync::{Arc, Mutex};

use log::Level;

/// Destination for operator-facing log lines.
pub trait LogSink: Send + Sync {
    /// Record one pre-formatted message.
    fn log(&self, level: Level, message: &str);
}

/// Sink that forwards every line to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "trigger_hub", level, "{message}");
    }
}

/// Sink that stores lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded line.
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Whether any recorded line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }

    /// Number of recorded lines.
    pub fn len(&self) -> usize {
        self.lines.lock().map(|lines| lines.len()).unwrap_or(0)
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, message.to_string()));
        }
    }
}

/// Cloneable handle to a [`LogSink`].
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(FacadeSink))
    }
}

impl Logger {
    /// Wrap a sink.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Log at an explicit level.
    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        self.sink.log(level, message.as_ref());
    }

    /// Informational event.
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message);
    }

    /// Recoverable problem, usually on a single connection.
    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, message);
    }

    /// Failure the operator needs to act on.
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_levels() {
        let sink = Arc::new(MemorySink::new());
        let logger = Logger::new(Arc::clone(&sink) as Arc<dyn LogSink>);

        logger.info("server up");
        logger.warn("endpoint busy");

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (Level::Info, "server up".to_string()));
        assert_eq!(lines[1].0, Level::Warn);
        assert!(sink.contains("busy"));
    }

    #[test]
    fn test_default_logger_does_not_panic_without_subscriber() {
        Logger::default().error("nobody listening");
    }
}
