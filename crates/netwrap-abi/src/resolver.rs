//! Lookup of the libc definitions the shim forwards to.
//!
//! Each interposed name resolves through `dlsym(RTLD_NEXT, name)` the first
//! time its fallback path runs. Successful lookups are cached per symbol and
//! never repeated; failures are not cached, so a later call retries.

use std::ffi::{CStr, c_void};
use std::ptr::{NonNull, null_mut};
use std::sync::atomic::{AtomicPtr, Ordering};

/// A symbol the shim forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Socket,
    Bind,
    Connect,
    Listen,
    Accept,
    Accept4,
    Shutdown,
    Close,
    Read,
    Write,
    Recv,
    Send,
    Writev,
    Sendfile64,
    Setsockopt,
    Getsockopt,
    Ioctl,
    Select,
    EpollCreate,
    EpollCtl,
    EpollWait,
    Lseek64,
}

const SYMBOL_COUNT: usize = 22;

impl Symbol {
    pub const ALL: [Symbol; SYMBOL_COUNT] = [
        Self::Socket,
        Self::Bind,
        Self::Connect,
        Self::Listen,
        Self::Accept,
        Self::Accept4,
        Self::Shutdown,
        Self::Close,
        Self::Read,
        Self::Write,
        Self::Recv,
        Self::Send,
        Self::Writev,
        Self::Sendfile64,
        Self::Setsockopt,
        Self::Getsockopt,
        Self::Ioctl,
        Self::Select,
        Self::EpollCreate,
        Self::EpollCtl,
        Self::EpollWait,
        Self::Lseek64,
    ];

    #[must_use]
    pub const fn c_name(self) -> &'static CStr {
        match self {
            Self::Socket => c"socket",
            Self::Bind => c"bind",
            Self::Connect => c"connect",
            Self::Listen => c"listen",
            Self::Accept => c"accept",
            Self::Accept4 => c"accept4",
            Self::Shutdown => c"shutdown",
            Self::Close => c"close",
            Self::Read => c"read",
            Self::Write => c"write",
            Self::Recv => c"recv",
            Self::Send => c"send",
            Self::Writev => c"writev",
            Self::Sendfile64 => c"sendfile64",
            Self::Setsockopt => c"setsockopt",
            Self::Getsockopt => c"getsockopt",
            Self::Ioctl => c"ioctl",
            Self::Select => c"select",
            Self::EpollCreate => c"epoll_create",
            Self::EpollCtl => c"epoll_ctl",
            Self::EpollWait => c"epoll_wait",
            Self::Lseek64 => c"lseek64",
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.c_name().to_str().unwrap_or("?")
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// A libc definition to forward to could not be found.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no definition of `{0}` after the shim in symbol lookup order")]
    Missing(&'static str),
    #[error("{} original symbol(s) missing: {}", .0.len(), .0.join(", "))]
    Incomplete(Vec<&'static str>),
}

static CACHE: [AtomicPtr<c_void>; SYMBOL_COUNT] =
    [const { AtomicPtr::new(null_mut()) }; SYMBOL_COUNT];

/// The cached pointer for `sym`, if it was resolved before.
#[must_use]
pub fn cached(sym: Symbol) -> Option<NonNull<c_void>> {
    NonNull::new(CACHE[sym.index()].load(Ordering::Acquire))
}

/// Resolve `sym`, consulting the cache first.
pub fn resolve(sym: Symbol) -> Result<NonNull<c_void>, ResolveError> {
    if let Some(p) = cached(sym) {
        return Ok(p);
    }
    // SAFETY: dlsym with a NUL-terminated name; RTLD_NEXT is a valid pseudo-handle.
    let raw = unsafe { libc::dlsym(libc::RTLD_NEXT, sym.c_name().as_ptr()) };
    let p = NonNull::new(raw).ok_or(ResolveError::Missing(sym.name()))?;
    // Racing resolvers store the same address.
    CACHE[sym.index()].store(p.as_ptr(), Ordering::Release);
    Ok(p)
}

/// Resolve every forwarded symbol up front, reporting all that are missing.
pub fn preflight() -> Result<(), ResolveError> {
    let missing: Vec<&'static str> = Symbol::ALL
        .iter()
        .filter(|&&sym| resolve(sym).is_err())
        .map(|sym| sym.name())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ResolveError::Incomplete(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_distinct_and_indexed_in_order() {
        for (i, sym) in Symbol::ALL.iter().enumerate() {
            assert_eq!(sym.index(), i);
        }
        let mut names: Vec<_> = Symbol::ALL.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SYMBOL_COUNT);
    }

    #[test]
    fn incomplete_error_lists_names() {
        let e = ResolveError::Incomplete(vec!["socket", "ioctl"]);
        assert_eq!(e.to_string(), "2 original symbol(s) missing: socket, ioctl");
    }
}
