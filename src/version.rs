//! Monotonic, process-wide version numbers (spec §3, §4.13).

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT: AtomicU64 = AtomicU64::new(1);

/// Opaque monotonic token, process-wide and globally comparable. Two
/// accessors that observe the same producer event observe the same
/// `VersionNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber(u64);

impl VersionNumber {
    /// Allocate a fresh, strictly-greater-than-anything-so-far version.
    /// Called on every successful write and on every state change at a
    /// source (VARIABLE write, interrupt arrival, device open).
    pub fn new() -> Self {
        VersionNumber(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// `max(own, producer)`, used by the read path (spec §4.13): the
    /// accessor's version becomes the later of its own and the value it
    /// just observed.
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }
}

impl Default for VersionNumber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_increasing() {
        let a = VersionNumber::new();
        let b = VersionNumber::new();
        assert!(b > a);
    }

    #[test]
    fn combine_picks_the_larger() {
        let a = VersionNumber::new();
        let b = VersionNumber::new();
        assert_eq!(a.combine(b), b);
        assert_eq!(b.combine(a), b);
    }
}
