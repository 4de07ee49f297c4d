//! Shared internal helpers for the ABI adapters.

use std::ffi::{c_int, c_void};
use std::time::Duration;

use netwrap_core::errno;

/// Store `val` in the calling thread's `errno`.
#[inline]
pub fn set_abi_errno(val: c_int) {
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe { *libc::__errno_location() = val };
}

/// The calling thread's `errno`, or `default_errno` if it cannot be read.
#[inline]
pub fn last_host_errno(default_errno: c_int) -> c_int {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(default_errno)
}

#[inline]
pub fn fail_int(errno: c_int) -> c_int {
    set_abi_errno(errno);
    -1
}

#[inline]
pub fn fail_size(errno: c_int) -> isize {
    set_abi_errno(errno);
    -1
}

/// Borrow `len` bytes at `ptr`. A null pointer is only accepted for `len == 0`.
///
/// # Safety
///
/// A non-null `ptr` must be valid for reads of `len` bytes for `'b`.
pub unsafe fn bytes<'b>(ptr: *const c_void, len: usize) -> Result<&'b [u8], c_int> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(errno::EFAULT);
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) })
}

/// Mutable counterpart of [`bytes`].
///
/// # Safety
///
/// A non-null `ptr` must be valid for writes of `len` bytes for `'b`.
pub unsafe fn bytes_mut<'b>(ptr: *mut c_void, len: usize) -> Result<&'b mut [u8], c_int> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(errno::EFAULT);
    }
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len) })
}

/// `timeval` to `Duration`; negative fields are rejected.
pub fn timeval_to_duration(tv: &libc::timeval) -> Option<Duration> {
    let secs = u64::try_from(tv.tv_sec).ok()?;
    let micros = u64::try_from(tv.tv_usec).ok()?;
    Some(Duration::from_secs(secs) + Duration::from_micros(micros))
}

pub fn duration_to_timeval(d: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: libc::time_t::try_from(d.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_usec: libc::suseconds_t::from(d.subsec_micros() as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trip() {
        assert_eq!(fail_int(errno::EMFILE), -1);
        assert_eq!(last_host_errno(0), errno::EMFILE);
        assert_eq!(fail_size(errno::EBADF), -1);
        assert_eq!(last_host_errno(0), errno::EBADF);
    }

    #[test]
    fn null_buffers_only_for_empty_ranges() {
        // SAFETY: null with zero length is never dereferenced.
        unsafe {
            assert_eq!(bytes(std::ptr::null(), 0), Ok(&[][..]));
            assert_eq!(bytes(std::ptr::null(), 4), Err(errno::EFAULT));
            assert!(bytes_mut(std::ptr::null_mut(), 1).is_err());
        }
        let data = [1u8, 2, 3];
        // SAFETY: `data` outlives the borrow.
        let view = unsafe { bytes(data.as_ptr().cast(), 3) }.unwrap();
        assert_eq!(view, &data);
    }

    #[test]
    fn timeval_conversions() {
        let tv = duration_to_timeval(Duration::from_micros(2_500_123));
        assert_eq!(tv.tv_sec, 2);
        assert_eq!(tv.tv_usec, 500_123);
        assert_eq!(timeval_to_duration(&tv), Some(Duration::from_micros(2_500_123)));
        let neg = libc::timeval {
            tv_sec: -1,
            tv_usec: 0,
        };
        assert_eq!(timeval_to_duration(&neg), None);
    }
}
