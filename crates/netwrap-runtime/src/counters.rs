//! Shim event counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Something worth counting on the call path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShimEvent {
    /// A call served by the fast-path stack.
    FastPath,
    /// A call forwarded to the original libc symbol.
    Passthrough,
    /// An argument the fast path cannot express (ioctl, option, how).
    TranslationReject,
    /// Would-block waits taken inside an emulated transfer.
    WouldBlockRetries(u64),
    /// An original symbol could not be resolved.
    ResolverFailure,
    /// A descriptor landed on the wrong side of the offset.
    DescriptorCollision,
}

/// Relaxed atomic counters.
pub struct ShimCounters {
    pub fast_path_calls: AtomicU64,
    pub passthrough_calls: AtomicU64,
    pub translation_rejects: AtomicU64,
    pub would_block_retries: AtomicU64,
    pub resolver_failures: AtomicU64,
    pub descriptor_collisions: AtomicU64,
}

/// Point-in-time copy of [`ShimCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub fast_path_calls: u64,
    pub passthrough_calls: u64,
    pub translation_rejects: u64,
    pub would_block_retries: u64,
    pub resolver_failures: u64,
    pub descriptor_collisions: u64,
}

impl ShimCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fast_path_calls: AtomicU64::new(0),
            passthrough_calls: AtomicU64::new(0),
            translation_rejects: AtomicU64::new(0),
            would_block_retries: AtomicU64::new(0),
            resolver_failures: AtomicU64::new(0),
            descriptor_collisions: AtomicU64::new(0),
        }
    }

    pub fn record(&self, event: ShimEvent) {
        let (counter, n) = match event {
            ShimEvent::FastPath => (&self.fast_path_calls, 1),
            ShimEvent::Passthrough => (&self.passthrough_calls, 1),
            ShimEvent::TranslationReject => (&self.translation_rejects, 1),
            ShimEvent::WouldBlockRetries(n) => (&self.would_block_retries, n),
            ShimEvent::ResolverFailure => (&self.resolver_failures, 1),
            ShimEvent::DescriptorCollision => (&self.descriptor_collisions, 1),
        };
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            fast_path_calls: self.fast_path_calls.load(Ordering::Relaxed),
            passthrough_calls: self.passthrough_calls.load(Ordering::Relaxed),
            translation_rejects: self.translation_rejects.load(Ordering::Relaxed),
            would_block_retries: self.would_block_retries.load(Ordering::Relaxed),
            resolver_failures: self.resolver_failures.load(Ordering::Relaxed),
            descriptor_collisions: self.descriptor_collisions.load(Ordering::Relaxed),
        }
    }
}

impl Default for ShimCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CountersSnapshot {
    /// Per-field difference `self - earlier`, saturating at zero.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            fast_path_calls: self.fast_path_calls.saturating_sub(earlier.fast_path_calls),
            passthrough_calls: self
                .passthrough_calls
                .saturating_sub(earlier.passthrough_calls),
            translation_rejects: self
                .translation_rejects
                .saturating_sub(earlier.translation_rejects),
            would_block_retries: self
                .would_block_retries
                .saturating_sub(earlier.would_block_retries),
            resolver_failures: self
                .resolver_failures
                .saturating_sub(earlier.resolver_failures),
            descriptor_collisions: self
                .descriptor_collisions
                .saturating_sub(earlier.descriptor_collisions),
        }
    }
}

static GLOBAL_COUNTERS: ShimCounters = ShimCounters::new();

#[must_use]
pub fn global_counters() -> &'static ShimCounters {
    &GLOBAL_COUNTERS
}
