use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

/// Log level enum for type-safe logging
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// A single structured trace record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl TraceEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            pipeline: None,
            phase: None,
            module: None,
            document: None,
        }
    }

    pub fn pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }
}

/// Simple circular buffer for fixed-size event storage
struct CircularBuffer {
    buffer: Vec<TraceEvent>,
    head: usize,
    capacity: usize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            head: 0,
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, item: TraceEvent) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(item);
        } else {
            self.buffer[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn to_vec(&self) -> Vec<TraceEvent> {
        // Return items in chronological order
        let mut result = Vec::with_capacity(self.buffer.len());
        result.extend_from_slice(&self.buffer[self.head..]);
        result.extend_from_slice(&self.buffer[..self.head]);
        result
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }
}

/// Thread-safe append target for trace events
///
/// One sink is created per engine and handed to every execution context, so
/// concurrently running pipelines and fan-out units all write to the same
/// buffer. Each `record` call stores exactly one event under the lock. Events
/// are also forwarded to `tracing` for whatever subscriber the host installed.
pub struct TraceSink {
    buffer: Mutex<CircularBuffer>,
    min_level: AtomicU8,
}

impl TraceSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(CircularBuffer::new(capacity)),
            min_level: AtomicU8::new(LogLevel::Debug as u8),
        }
    }

    /// Record an event if it passes the minimum level
    pub fn record(&self, event: TraceEvent) {
        if (event.level as u8) < self.min_level.load(Ordering::Relaxed) {
            return;
        }

        forward_to_tracing(&event);

        // A poisoned buffer still holds valid events
        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.push(event);
    }

    /// Record a plain message without execution context
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.record(TraceEvent::new(level, message));
    }

    /// Set minimum log level (runtime filtering)
    pub fn set_min_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Get current minimum log level
    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    /// Snapshot of the buffered events, oldest first
    pub fn events(&self) -> Vec<TraceEvent> {
        match self.buffer.lock() {
            Ok(buffer) => buffer.to_vec(),
            Err(poisoned) => poisoned.into_inner().to_vec(),
        }
    }

    /// Buffered events at or above `level`
    pub fn events_at(&self, level: LogLevel) -> Vec<TraceEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level >= level)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}

impl Default for TraceSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn forward_to_tracing(event: &TraceEvent) {
    let pipeline = event.pipeline.as_deref().unwrap_or("-");
    let phase = event.phase.as_deref().unwrap_or("-");
    let module = event.module.as_deref().unwrap_or("-");
    let document = event.document.as_deref().unwrap_or("-");
    match event.level {
        LogLevel::Error => {
            tracing::error!(pipeline, phase, module, document, "{}", event.message)
        }
        LogLevel::Warn => tracing::warn!(pipeline, phase, module, document, "{}", event.message),
        LogLevel::Info => tracing::info!(pipeline, phase, module, document, "{}", event.message),
        LogLevel::Debug => {
            tracing::debug!(pipeline, phase, module, document, "{}", event.message)
        }
    }
}

/// Install a formatting `tracing` subscriber honouring `RUST_LOG`
///
/// Safe to call more than once; later calls leave the first subscriber in place.
///
/// # Example
/// ```
/// use docflow::logger::{init_tracing, LogLevel, TraceSink};
///
/// init_tracing();
/// init_tracing();
///
/// let sink = TraceSink::default();
/// sink.log(LogLevel::Info, "subscriber installed");
/// assert_eq!(sink.events().len(), 1);
/// ```
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();

        let sink = TraceSink::new(4);
        sink.log(LogLevel::Warn, "after init");
        assert_eq!(sink.events_at(LogLevel::Warn).len(), 1);
    }

    #[test]
    fn test_level_round_trip() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            assert_eq!(LogLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn test_min_level_filters_events() {
        let sink = TraceSink::new(10);
        sink.set_min_level(LogLevel::Warn);
        sink.log(LogLevel::Info, "ignored");
        sink.log(LogLevel::Error, "kept");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "kept");
        assert_eq!(sink.min_level(), LogLevel::Warn);
    }

    #[test]
    fn test_buffer_wraps_in_chronological_order() {
        let sink = TraceSink::new(3);
        for i in 0..5 {
            sink.log(LogLevel::Info, format!("event {}", i));
        }

        let messages: Vec<_> = sink.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["event 2", "event 3", "event 4"]);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_context_fields() {
        let event = TraceEvent::new(LogLevel::Error, "boom")
            .pipeline("Pages")
            .phase("Process")
            .module("Render")
            .document("index.md");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["pipeline"], "Pages");
        assert_eq!(json["document"], "index.md");
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let sink = Arc::new(TraceSink::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        sink.log(LogLevel::Error, format!("{}-{}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.events().len(), 400);
        assert_eq!(sink.events_at(LogLevel::Error).len(), 400);
    }
}
