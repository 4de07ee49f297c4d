//! Error type shared by the emulation loops.

use crate::errno::FpErrno;

/// Result of a fast-path stack operation.
pub type FpResult<T> = Result<T, FpErrno>;

/// A failure that originated either on the host side (source file reads,
/// kernel select) or inside the fast-path stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    #[error("host call failed with errno {0}")]
    Host(i32),
    #[error("fast-path call failed with errno {0}")]
    FastPath(FpErrno),
}

impl NetError {
    /// The errno value to surface to the C caller.
    #[must_use]
    pub fn host_errno(self) -> i32 {
        match self {
            Self::Host(e) => e,
            Self::FastPath(e) => e.to_host(),
        }
    }
}

impl From<FpErrno> for NetError {
    fn from(e: FpErrno) -> Self {
        Self::FastPath(e)
    }
}
