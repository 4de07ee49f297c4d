//! Process-wide wiring for the exported entry points.
//!
//! Holds the installed fast-path stack and runs bootstrap: configuration,
//! trace sink, resolver preflight, stack discovery, readiness flip.

use std::ffi::c_int;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use netwrap_core::{FastPathStack, Partition};
use netwrap_runtime::config::{self, LogLevel};
use netwrap_runtime::trace::{self, TraceEvent, TraceSink};
use netwrap_runtime::{BootstrapError, ShimEvent, global_counters, global_state};

use crate::facade::Netwrap;
use crate::kernel::{NEXT_LIBC, NextLibc};
use crate::ofp_backend::OfpBackend;
use crate::resolver;

// ---------------------------------------------------------------------------
// Installed stack
// ---------------------------------------------------------------------------

const STATE_UNINIT: u8 = 0;
const STATE_INSTALLING: u8 = 1;
const STATE_READY: u8 = 2;

// Installed once and leaked. `dyn` pointers are fat, so the trait object is
// boxed a second time to fit an AtomicPtr.
static STACK_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);
static STACK_PTR: AtomicPtr<Box<dyn FastPathStack>> = AtomicPtr::new(std::ptr::null_mut());

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InstallError {
    #[error("a fast-path stack is already installed")]
    AlreadyInstalled,
}

/// Install the process-wide fast-path stack. Only the first call succeeds.
pub fn install_stack(stack: Box<dyn FastPathStack>) -> Result<(), InstallError> {
    if STACK_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INSTALLING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return Err(InstallError::AlreadyInstalled);
    }
    let ptr = Box::into_raw(Box::new(stack));
    STACK_PTR.store(ptr, Ordering::Release);
    STACK_STATE.store(STATE_READY, Ordering::Release);
    Ok(())
}

/// The installed stack, if any.
#[must_use]
pub fn installed_stack() -> Option<&'static dyn FastPathStack> {
    if STACK_STATE.load(Ordering::Acquire) != STATE_READY {
        return None;
    }
    // SAFETY: once READY, STACK_PTR is valid and never freed.
    let boxed = unsafe { &*STACK_PTR.load(Ordering::Acquire) };
    Some(boxed.as_ref())
}

// ---------------------------------------------------------------------------
// Trace sink
// ---------------------------------------------------------------------------

/// Writes trace lines to a descriptor with a raw `write(2)`, so tracing never
/// goes through the interposed `write`.
#[derive(Debug, Clone, Copy)]
pub struct FdSink {
    fd: c_int,
}

impl FdSink {
    #[must_use]
    pub const fn new(fd: c_int) -> Self {
        Self { fd }
    }
}

impl TraceSink for FdSink {
    fn write_line(&self, line: &[u8]) {
        // SAFETY: `line` is readable for its length. Short writes are dropped.
        let _ = unsafe { libc::syscall(libc::SYS_write, self.fd, line.as_ptr(), line.len()) };
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Bring the process to ready.
///
/// Safe to call repeatedly: once ready it returns the published partition
/// without touching the stack. While the stack is not yet configured it
/// returns [`BootstrapError::NotAttached`] and a later call may succeed.
pub fn initialize() -> Result<Partition, BootstrapError> {
    let (cfg, problems) = config::resolve();
    if !trace::has_sink() {
        trace::set_sink(Box::new(FdSink::new(cfg.log_fd)));
    }
    for problem in &problems {
        trace::emit(&TraceEvent::new(LogLevel::Warn, "config_error").detail(problem.to_string()));
    }

    if let Err(e) = resolver::preflight() {
        global_counters().record(ShimEvent::ResolverFailure);
        trace::emit(&TraceEvent::new(LogLevel::Error, "resolver_preflight").detail(e.to_string()));
    }

    let stack = match installed_stack() {
        Some(stack) => stack,
        None => {
            let backend =
                OfpBackend::load().map_err(|e| BootstrapError::StackUnavailable(e.to_string()))?;
            // Losing an install race leaves the winner's stack in place.
            let _ = install_stack(Box::new(backend));
            installed_stack().ok_or_else(|| {
                BootstrapError::StackUnavailable("stack installation in progress".to_owned())
            })?
        }
    };

    let result = global_state().initialize(|| Ok(stack.params().map(|p| p.descriptor_offset)));
    match &result {
        Ok(p) => trace::emit(
            &TraceEvent::new(LogLevel::Info, "bootstrap").detail(format!("offset={}", p.offset())),
        ),
        Err(e) => trace::emit(
            &TraceEvent::new(LogLevel::Info, "bootstrap_deferred").detail(e.to_string()),
        ),
    }
    result
}

// First-call bootstrap: attempted once; later attempts go through
// `netwrap_initialize`. A reentrant call made while it runs passes through.
static AUTO_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);

fn bootstrap_once() {
    if AUTO_STATE.load(Ordering::Acquire) != STATE_UNINIT {
        return;
    }
    if AUTO_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INSTALLING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_ok()
    {
        let _ = initialize();
        AUTO_STATE.store(STATE_READY, Ordering::Release);
    }
}

/// The facade the exported symbols dispatch through.
#[must_use]
pub fn process() -> Netwrap<'static, NextLibc> {
    bootstrap_once();
    let nw = Netwrap::new(&NEXT_LIBC, global_state()).with_config(config::current());
    match installed_stack() {
        Some(stack) => nw.with_stack(stack),
        None => nw,
    }
}
