//! Descriptor classification.
//!
//! Applications see one integer namespace. The fast-path stack numbers its
//! sockets from a configured offset upwards, so a single boundary splits the
//! space: `[0, offset)` belongs to the kernel, `[offset, ∞)` to the fast path.
//! Once classified, a fast-path descriptor travels as [`FastPathFd`] and can
//! only be handed to a [`crate::FastPathStack`]; kernel descriptors stay plain
//! integers and only ever reach libc.

use std::fmt;

/// Descriptor issued by the fast-path stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FastPathFd(i32);

impl FastPathFd {
    /// Wrap a number produced by a fast-path stack implementation.
    ///
    /// Callers outside a stack implementation obtain handles through
    /// [`Partition::classify`].
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The number as seen by the application.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for FastPathFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fp:{}", self.0)
    }
}

/// Outcome of classifying a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Kernel(i32),
    FastPath(FastPathFd),
}

/// Pure readiness/offset rule: `ready && fd >= offset`.
#[inline]
#[must_use]
pub fn is_fastpath(ready: bool, offset: u32, fd: i32) -> bool {
    ready && fd >= 0 && fd as u32 >= offset
}

/// The descriptor boundary of a ready process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    offset: u32,
}

impl Partition {
    #[must_use]
    pub const fn new(offset: u32) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(self) -> u32 {
        self.offset
    }

    #[inline]
    #[must_use]
    pub fn classify(self, fd: i32) -> Descriptor {
        if is_fastpath(true, self.offset, fd) {
            Descriptor::FastPath(FastPathFd(fd))
        } else {
            Descriptor::Kernel(fd)
        }
    }

    /// Whether a descriptor freshly issued by the fast-path stack lies inside
    /// the fast-path range.
    #[must_use]
    pub fn admits_fast(self, fd: FastPathFd) -> bool {
        is_fastpath(true, self.offset, fd.0)
    }

    /// Whether a descriptor freshly issued by the kernel lies outside the
    /// fast-path range.
    #[must_use]
    pub fn admits_kernel(self, fd: i32) -> bool {
        !is_fastpath(true, self.offset, fd)
    }
}

// ---------------------------------------------------------------------------
// Descriptor bitmap
// ---------------------------------------------------------------------------

/// Growable descriptor bitmap used to carry `select` sets between the host
/// `fd_set` layout and the fast-path one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdBitmap {
    words: Vec<u64>,
}

impl FdBitmap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bitmap with room for descriptors `0..nfds` without reallocating.
    #[must_use]
    pub fn with_capacity(nfds: i32) -> Self {
        let words = (nfds.max(0) as usize).div_ceil(64);
        Self {
            words: vec![0; words],
        }
    }

    pub fn insert(&mut self, fd: i32) {
        if fd < 0 {
            return;
        }
        let (word, bit) = (fd as usize / 64, fd as usize % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << bit;
    }

    pub fn remove(&mut self, fd: i32) {
        if fd < 0 {
            return;
        }
        let (word, bit) = (fd as usize / 64, fd as usize % 64);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1u64 << bit);
        }
    }

    #[must_use]
    pub fn contains(&self, fd: i32) -> bool {
        if fd < 0 {
            return false;
        }
        let (word, bit) = (fd as usize / 64, fd as usize % 64);
        self.words.get(word).is_some_and(|w| w & (1u64 << bit) != 0)
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Highest member plus one, or 0 when empty.
    #[must_use]
    pub fn nfds(&self) -> i32 {
        self.iter().last().map_or(0, |fd| fd + 1)
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64)
                .filter(move |b| w & (1u64 << b) != 0)
                .map(move |b| (i * 64 + b) as i32)
        })
    }

    /// Split into `(kernel, fast_path)` parts around `partition`.
    #[must_use]
    pub fn split(&self, partition: Partition) -> (FdBitmap, FdBitmap) {
        let mut kernel = FdBitmap::new();
        let mut fast = FdBitmap::new();
        for fd in self.iter() {
            match partition.classify(fd) {
                Descriptor::Kernel(k) => kernel.insert(k),
                Descriptor::FastPath(f) => fast.insert(f.raw()),
            }
        }
        (kernel, fast)
    }

    /// Union of two bitmaps.
    #[must_use]
    pub fn union(&self, other: &FdBitmap) -> FdBitmap {
        let len = self.words.len().max(other.words.len());
        let words = (0..len)
            .map(|i| {
                self.words.get(i).copied().unwrap_or(0) | other.words.get(i).copied().unwrap_or(0)
            })
            .collect();
        FdBitmap { words }
    }
}

impl FromIterator<i32> for FdBitmap {
    fn from_iter<T: IntoIterator<Item = i32>>(iter: T) -> Self {
        let mut set = FdBitmap::new();
        for fd in iter {
            set.insert(fd);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Classification -----------------------------------------------------

    #[test]
    fn below_offset_is_never_fastpath() {
        for fd in 0..20 {
            assert!(!is_fastpath(false, 20, fd));
            assert!(!is_fastpath(true, 20, fd));
        }
    }

    #[test]
    fn at_or_above_offset_follows_readiness() {
        for fd in [20, 21, 500, i32::MAX] {
            assert!(is_fastpath(true, 20, fd));
            assert!(!is_fastpath(false, 20, fd));
        }
    }

    #[test]
    fn negative_descriptors_are_kernel() {
        assert!(!is_fastpath(true, 0, -1));
        assert_eq!(Partition::new(0).classify(-1), Descriptor::Kernel(-1));
    }

    #[test]
    fn partition_classifies_both_sides() {
        let p = Partition::new(100);
        assert_eq!(p.classify(3), Descriptor::Kernel(3));
        assert_eq!(
            p.classify(100),
            Descriptor::FastPath(FastPathFd::from_raw(100))
        );
    }

    #[test]
    fn admission_detects_collisions() {
        let p = Partition::new(64);
        assert!(p.admits_fast(FastPathFd::from_raw(64)));
        assert!(!p.admits_fast(FastPathFd::from_raw(63)));
        assert!(p.admits_kernel(63));
        assert!(!p.admits_kernel(64));
    }

    // -- Bitmap -------------------------------------------------------------

    #[test]
    fn bitmap_insert_remove_contains() {
        let mut set = FdBitmap::with_capacity(10);
        set.insert(3);
        set.insert(130);
        assert!(set.contains(3));
        assert!(set.contains(130));
        assert!(!set.contains(4));
        assert_eq!(set.len(), 2);
        assert_eq!(set.nfds(), 131);
        set.remove(130);
        assert!(!set.contains(130));
        assert_eq!(set.nfds(), 4);
        set.remove(9999);
        set.insert(-5);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn bitmap_split_and_union() {
        let set: FdBitmap = [1, 5, 64, 65, 200].into_iter().collect();
        let (kernel, fast) = set.split(Partition::new(64));
        assert_eq!(kernel.iter().collect::<Vec<_>>(), vec![1, 5]);
        assert_eq!(fast.iter().collect::<Vec<_>>(), vec![64, 65, 200]);
        assert_eq!(kernel.union(&fast), set);
    }

    #[test]
    fn empty_bitmap() {
        let mut set = FdBitmap::with_capacity(128);
        assert!(set.is_empty());
        assert_eq!(set.nfds(), 0);
        set.insert(7);
        set.clear();
        assert!(set.is_empty());
    }
}
