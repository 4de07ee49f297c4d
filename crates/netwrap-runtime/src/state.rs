//! Process readiness and the descriptor boundary.
//!
//! The state starts not-ready. Bootstrap asks the fast-path stack for its
//! descriptor offset and, once it gets one, publishes the offset and flips the
//! ready flag. The flip happens once; every entry point reads it afresh, so a
//! caller racing bootstrap simply sees "not ready" and takes the libc path.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use netwrap_core::Partition;
use netwrap_core::fd::is_fastpath;
use parking_lot::Mutex;

/// Why bootstrap left the process not-ready.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("fast-path stack is not configured yet")]
    NotAttached,
    #[error("fast-path descriptor offset {0} does not fit the descriptor range")]
    OffsetOutOfRange(u32),
    #[error("fast-path stack unavailable: {0}")]
    StackUnavailable(String),
}

/// Readiness flag plus descriptor offset.
pub struct ProcessState {
    ready: AtomicBool,
    offset: AtomicU32,
    bootstrap: Mutex<()>,
}

impl ProcessState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            offset: AtomicU32::new(0),
            bootstrap: parking_lot::const_mutex(()),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Published offset; meaningful only once ready.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset.load(Ordering::Relaxed)
    }

    /// The descriptor partition, or `None` while not ready.
    #[must_use]
    pub fn partition(&self) -> Option<Partition> {
        self.is_ready().then(|| Partition::new(self.offset()))
    }

    #[must_use]
    pub fn is_fastpath(&self, fd: i32) -> bool {
        is_fastpath(self.is_ready(), self.offset(), fd)
    }

    /// Run bootstrap once. `query` reports the stack's descriptor offset, or
    /// `None` while the stack is not attached; it is not called when the
    /// process is already ready.
    pub fn initialize<F>(&self, query: F) -> Result<Partition, BootstrapError>
    where
        F: FnOnce() -> Result<Option<u32>, BootstrapError>,
    {
        if let Some(p) = self.partition() {
            return Ok(p);
        }
        let _guard = self.bootstrap.lock();
        if let Some(p) = self.partition() {
            return Ok(p);
        }
        let offset = query()?.ok_or(BootstrapError::NotAttached)?;
        if i32::try_from(offset).is_err() {
            return Err(BootstrapError::OffsetOutOfRange(offset));
        }
        self.offset.store(offset, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
        Ok(Partition::new(offset))
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_STATE: ProcessState = ProcessState::new();

/// The process-wide state.
#[must_use]
pub fn global_state() -> &'static ProcessState {
    &GLOBAL_STATE
}
