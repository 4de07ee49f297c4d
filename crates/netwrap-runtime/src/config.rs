//! Runtime configuration.
//!
//! Read from the environment on first use:
//! - `NETWRAP_LOG`: `off|error|warn|info|debug` (default `warn`).
//! - `NETWRAP_LOG_FD`: descriptor receiving trace lines (default 2).
//! - `NETWRAP_POLL_INTERVAL_US`: select wait slice (default 1000).
//! - `NETWRAP_RETRY_INTERVAL_US`: would-block retry slice (default 100).
//! - `NETWRAP_SENDFILE_CHUNK`: sendfile bounce buffer in bytes (default
//!   16384, clamped to 512..=1 MiB).
//!
//! Malformed values keep the default and are reported as [`ConfigError`]s.

use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

pub const ENV_LOG: &str = "NETWRAP_LOG";
pub const ENV_LOG_FD: &str = "NETWRAP_LOG_FD";
pub const ENV_POLL_INTERVAL_US: &str = "NETWRAP_POLL_INTERVAL_US";
pub const ENV_RETRY_INTERVAL_US: &str = "NETWRAP_RETRY_INTERVAL_US";
pub const ENV_SENDFILE_CHUNK: &str = "NETWRAP_SENDFILE_CHUNK";

pub const MIN_SENDFILE_CHUNK: usize = 512;
pub const MAX_SENDFILE_CHUNK: usize = 1 << 20;

/// Trace verbosity. Ordered from quietest to noisiest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Parse a level name (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Self::Off,
            "error" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "info" => Self::Info,
            "debug" | "trace" => Self::Debug,
            _ => return None,
        })
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Error => 1,
            Self::Warn => 2,
            Self::Info => 3,
            Self::Debug => 4,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Off,
            1 => Self::Error,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Warn,
        }
    }
}

/// A rejected environment value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not {expected}; using the default")]
    Malformed {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{var}={value} is outside {min}..={max}; clamped")]
    OutOfRange {
        var: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub log_fd: i32,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub sendfile_chunk: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Warn,
            log_fd: 2,
            poll_interval: Duration::from_micros(1000),
            retry_interval: Duration::from_micros(100),
            sendfile_chunk: 16 * 1024,
        }
    }
}

fn parse_u64(
    var: &'static str,
    raw: &str,
    errors: &mut Vec<ConfigError>,
) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(ConfigError::Malformed {
                var,
                value: raw.to_owned(),
                expected: "an unsigned integer",
            });
            None
        }
    }
}

impl Config {
    /// Build a configuration from a variable lookup, collecting problems
    /// instead of failing.
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<ConfigError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let mut errors = Vec::new();

        if let Some(raw) = lookup(ENV_LOG) {
            match LogLevel::parse(&raw) {
                Some(level) => cfg.log_level = level,
                None => errors.push(ConfigError::Malformed {
                    var: ENV_LOG,
                    value: raw,
                    expected: "one of off|error|warn|info|debug",
                }),
            }
        }

        if let Some(raw) = lookup(ENV_LOG_FD) {
            match raw.trim().parse::<i32>() {
                Ok(fd) if fd >= 0 => cfg.log_fd = fd,
                _ => errors.push(ConfigError::Malformed {
                    var: ENV_LOG_FD,
                    value: raw,
                    expected: "a non-negative descriptor",
                }),
            }
        }

        if let Some(us) = lookup(ENV_POLL_INTERVAL_US)
            .and_then(|raw| parse_u64(ENV_POLL_INTERVAL_US, &raw, &mut errors))
        {
            cfg.poll_interval = Duration::from_micros(us);
        }

        if let Some(us) = lookup(ENV_RETRY_INTERVAL_US)
            .and_then(|raw| parse_u64(ENV_RETRY_INTERVAL_US, &raw, &mut errors))
        {
            cfg.retry_interval = Duration::from_micros(us);
        }

        if let Some(bytes) = lookup(ENV_SENDFILE_CHUNK)
            .and_then(|raw| parse_u64(ENV_SENDFILE_CHUNK, &raw, &mut errors))
        {
            let (min, max) = (MIN_SENDFILE_CHUNK as u64, MAX_SENDFILE_CHUNK as u64);
            if !(min..=max).contains(&bytes) {
                errors.push(ConfigError::OutOfRange {
                    var: ENV_SENDFILE_CHUNK,
                    value: bytes,
                    min,
                    max,
                });
            }
            cfg.sendfile_chunk = bytes.clamp(min, max) as usize;
        }

        (cfg, errors)
    }

    /// Read the process environment.
    #[must_use]
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|var| std::env::var(var).ok())
    }
}

// ---------------------------------------------------------------------------
// Process-wide cache
// ---------------------------------------------------------------------------

// 0=unresolved, 1=resolving, 2=resolved. A reentrant call (e.g. a traced
// write issued while the environment is being read) sees RESOLVING and gets
// the defaults instead of blocking.
static STATE: AtomicU8 = AtomicU8::new(0);

const UNRESOLVED: u8 = 0;
const RESOLVING: u8 = 1;
const RESOLVED: u8 = 2;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(2);
static LOG_FD: AtomicI32 = AtomicI32::new(2);
static POLL_US: AtomicU64 = AtomicU64::new(1000);
static RETRY_US: AtomicU64 = AtomicU64::new(100);
static SENDFILE_CHUNK: AtomicU64 = AtomicU64::new(16 * 1024);

fn load() -> Config {
    Config {
        log_level: LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed)),
        log_fd: LOG_FD.load(Ordering::Relaxed),
        poll_interval: Duration::from_micros(POLL_US.load(Ordering::Relaxed)),
        retry_interval: Duration::from_micros(RETRY_US.load(Ordering::Relaxed)),
        sendfile_chunk: SENDFILE_CHUNK.load(Ordering::Relaxed) as usize,
    }
}

fn publish(cfg: &Config) {
    LOG_LEVEL.store(cfg.log_level.to_u8(), Ordering::Relaxed);
    LOG_FD.store(cfg.log_fd, Ordering::Relaxed);
    POLL_US.store(
        u64::try_from(cfg.poll_interval.as_micros()).unwrap_or(u64::MAX),
        Ordering::Relaxed,
    );
    RETRY_US.store(
        u64::try_from(cfg.retry_interval.as_micros()).unwrap_or(u64::MAX),
        Ordering::Relaxed,
    );
    SENDFILE_CHUNK.store(cfg.sendfile_chunk as u64, Ordering::Relaxed);
}

/// The process configuration, reading the environment on first call.
///
/// Returns the problems found only to the caller that performed the
/// resolution; every later call gets an empty list.
pub fn resolve() -> (Config, Vec<ConfigError>) {
    match STATE.load(Ordering::Acquire) {
        RESOLVED => return (load(), Vec::new()),
        RESOLVING => return (Config::default(), Vec::new()),
        _ => {}
    }
    if STATE
        .compare_exchange(UNRESOLVED, RESOLVING, Ordering::SeqCst, Ordering::Acquire)
        .is_err()
    {
        let cfg = if STATE.load(Ordering::Acquire) == RESOLVED {
            load()
        } else {
            Config::default()
        };
        return (cfg, Vec::new());
    }
    let (cfg, errors) = Config::from_env();
    publish(&cfg);
    STATE.store(RESOLVED, Ordering::Release);
    (cfg, errors)
}

/// The process configuration (see [`resolve`]).
#[must_use]
pub fn current() -> Config {
    resolve().0
}

/// Replace the process configuration, bypassing the environment.
pub fn override_config(cfg: &Config) {
    publish(cfg);
    STATE.store(RESOLVED, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let (cfg, errors) = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg, Config::default());
        assert!(errors.is_empty());
        assert_eq!(cfg.poll_interval, Duration::from_millis(1));
        assert_eq!(cfg.sendfile_chunk, 16384);
    }

    #[test]
    fn all_knobs_parse() {
        let (cfg, errors) = Config::from_lookup(lookup(&[
            (ENV_LOG, "DEBUG"),
            (ENV_LOG_FD, "7"),
            (ENV_POLL_INTERVAL_US, "250"),
            (ENV_RETRY_INTERVAL_US, "0"),
            (ENV_SENDFILE_CHUNK, "65536"),
        ]));
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.log_fd, 7);
        assert_eq!(cfg.poll_interval, Duration::from_micros(250));
        assert_eq!(cfg.retry_interval, Duration::ZERO);
        assert_eq!(cfg.sendfile_chunk, 65536);
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let (cfg, errors) = Config::from_lookup(lookup(&[
            (ENV_LOG, "loud"),
            (ENV_LOG_FD, "-1"),
            (ENV_POLL_INTERVAL_US, "soon"),
        ]));
        assert_eq!(cfg, Config::default());
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], ConfigError::Malformed { var: ENV_LOG, .. }));
        assert!(errors[2].to_string().contains(ENV_POLL_INTERVAL_US));
    }

    #[test]
    fn sendfile_chunk_is_clamped() {
        let (cfg, errors) = Config::from_lookup(lookup(&[(ENV_SENDFILE_CHUNK, "16")]));
        assert_eq!(cfg.sendfile_chunk, MIN_SENDFILE_CHUNK);
        assert_eq!(
            errors,
            vec![ConfigError::OutOfRange {
                var: ENV_SENDFILE_CHUNK,
                value: 16,
                min: 512,
                max: 1 << 20,
            }]
        );
        let (cfg, _) = Config::from_lookup(lookup(&[(ENV_SENDFILE_CHUNK, "99999999")]));
        assert_eq!(cfg.sendfile_chunk, MAX_SENDFILE_CHUNK);
    }

    #[test]
    fn level_ordering_and_round_trip() {
        assert!(LogLevel::Off < LogLevel::Error);
        assert!(LogLevel::Warn < LogLevel::Debug);
        for level in [
            LogLevel::Off,
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
        ] {
            assert_eq!(LogLevel::from_u8(level.to_u8()), level);
        }
        assert_eq!(serde_json::to_string(&LogLevel::Info).unwrap(), "\"info\"");
    }
}
