//! # netwrap-runtime
//!
//! Process-wide state shared by every interposed entry point:
//!
//! - [`config`]: environment knobs, resolved once without blocking.
//! - [`state`]: readiness flag and descriptor offset, flipped once by bootstrap.
//! - [`counters`]: relaxed atomic event counters with a serializable snapshot.
//! - [`trace`]: level-gated JSONL trace events.
//!
//! Nothing here calls libc directly; output goes through a [`trace::TraceSink`]
//! installed by the ABI layer.

pub mod config;
pub mod counters;
pub mod state;
pub mod trace;

pub use config::{Config, ConfigError, LogLevel};
pub use counters::{CountersSnapshot, ShimCounters, ShimEvent, global_counters};
pub use state::{BootstrapError, ProcessState, global_state};
