//! Structured trace events.
//!
//! Each event is one JSON object per line. Events are level-gated against
//! [`crate::config::Config::log_level`] before anything is formatted, and are
//! handed as bytes to the installed [`TraceSink`]. With no sink installed,
//! events are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{self, LogLevel};

/// Destination for encoded trace lines.
pub trait TraceSink: Send + Sync {
    /// Write one complete line, newline included. Must not fail loudly.
    fn write_line(&self, line: &[u8]);
}

/// One trace record.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent<'a> {
    pub seq: u64,
    pub ts_us: u64,
    pub level: LogLevel,
    pub event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fd: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

static SEQ: AtomicU64 = AtomicU64::new(0);

impl<'a> TraceEvent<'a> {
    #[must_use]
    pub fn new(level: LogLevel, event: &'a str) -> Self {
        Self {
            seq: SEQ.fetch_add(1, Ordering::Relaxed),
            ts_us: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX)),
            level,
            event,
            call: None,
            fd: None,
            errno: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn call(mut self, call: &'a str) -> Self {
        self.call = Some(call);
        self
    }

    #[must_use]
    pub fn fd(mut self, fd: i32) -> Self {
        self.fd = Some(fd);
        self
    }

    #[must_use]
    pub fn errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// JSONL encoding, newline included.
    #[must_use]
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        line
    }
}

/// Whether `level` passes `threshold`.
#[must_use]
pub fn passes(level: LogLevel, threshold: LogLevel) -> bool {
    level != LogLevel::Off && level <= threshold
}

static SINK: RwLock<Option<Box<dyn TraceSink>>> = parking_lot::const_rwlock(None);

/// Install `sink`, returning the previous one.
pub fn set_sink(sink: Box<dyn TraceSink>) -> Option<Box<dyn TraceSink>> {
    SINK.write().replace(sink)
}

/// Remove the installed sink.
pub fn take_sink() -> Option<Box<dyn TraceSink>> {
    SINK.write().take()
}

/// Whether an event at `level` would be written.
#[must_use]
pub fn enabled(level: LogLevel) -> bool {
    passes(level, config::current().log_level)
}

/// Encode and write `event` to `sink` if it passes `threshold`.
pub fn emit_to(sink: &dyn TraceSink, threshold: LogLevel, event: &TraceEvent<'_>) {
    if passes(event.level, threshold) {
        sink.write_line(&event.to_line());
    }
}

/// Write `event` to the installed sink if it passes `threshold`.
pub fn emit_with(threshold: LogLevel, event: &TraceEvent<'_>) {
    if !passes(event.level, threshold) {
        return;
    }
    // A sink being swapped concurrently drops the event instead of waiting.
    if let Some(guard) = SINK.try_read() {
        if let Some(sink) = guard.as_deref() {
            emit_to(sink, threshold, event);
        }
    }
}

/// Write `event` to the installed sink under the configured level.
pub fn emit(event: &TraceEvent<'_>) {
    emit_with(config::current().log_level, event);
}

/// Whether a sink is installed.
#[must_use]
pub fn has_sink() -> bool {
    SINK.read().is_some()
}
