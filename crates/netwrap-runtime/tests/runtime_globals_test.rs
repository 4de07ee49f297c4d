//! Process-wide config, sink and counters working together.

use std::sync::Arc;
use std::time::Duration;

use netwrap_runtime::config::{self, Config, LogLevel};
use netwrap_runtime::trace::{self, TraceEvent, TraceSink};
use netwrap_runtime::{ShimEvent, global_counters, global_state};
use parking_lot::Mutex;

#[derive(Clone, Default)]
struct Shared(Arc<Mutex<Vec<Vec<u8>>>>);

impl TraceSink for Shared {
    fn write_line(&self, line: &[u8]) {
        self.0.lock().push(line.to_vec());
    }
}

// Globals are shared by every test in this binary; keep them in one test.
#[test]
fn globals_follow_override_and_sink() {
    let cfg = Config {
        log_level: LogLevel::Info,
        log_fd: 9,
        poll_interval: Duration::from_micros(500),
        retry_interval: Duration::from_micros(50),
        sendfile_chunk: 4096,
    };
    config::override_config(&cfg);
    assert_eq!(config::current(), cfg);
    assert!(trace::enabled(LogLevel::Info));
    assert!(!trace::enabled(LogLevel::Debug));

    let sink = Shared::default();
    let previous = trace::set_sink(Box::new(sink.clone()));
    assert!(previous.is_none());

    trace::emit(&TraceEvent::new(LogLevel::Info, "bootstrap").detail("offset=512"));
    trace::emit(&TraceEvent::new(LogLevel::Debug, "passthrough").call("read"));
    {
        let lines = sink.0.lock();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_slice(&lines[0]).unwrap();
        assert_eq!(v["event"], "bootstrap");
        assert_eq!(v["detail"], "offset=512");
    }

    assert!(trace::take_sink().is_some());
    trace::emit(&TraceEvent::new(LogLevel::Error, "dropped"));
    assert_eq!(sink.0.lock().len(), 1);

    let before = global_counters().snapshot();
    global_counters().record(ShimEvent::Passthrough);
    assert_eq!(global_counters().snapshot().since(&before).passthrough_calls, 1);

    let state = global_state();
    let p = state.initialize(|| Ok(Some(4096))).unwrap();
    assert_eq!(p.offset(), 4096);
    assert!(state.is_fastpath(4096));
    assert!(!state.is_fastpath(4095));
}
