//! # Version Allocator
//!
//! Produces strictly increasing, globally comparable [`Version`]s.
//!
//! Versions are time-based: the high bits hold the wall clock in
//! microseconds, the low bits a tie-break sequence. The allocator keeps the
//! last value it handed out and never goes backwards, so two writes in the
//! same microsecond (or a clock that steps back) still get ordered versions.

use crate::Version;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock microseconds.
pub type Clock = fn() -> u64;

/// Microseconds since the unix epoch, or 0 if the clock is before it.
pub fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Lock-free allocator shared by every writer of a store.
#[derive(Debug)]
pub struct VersionAllocator {
    last: AtomicU64,
    clock: Clock,
}

impl Default for VersionAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionAllocator {
    /// Allocator driven by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(system_clock)
    }

    /// Allocator driven by a custom clock.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            last: AtomicU64::new(0),
            clock,
        }
    }

    /// Allocate the next version.
    pub fn allocate(&self) -> Version {
        self.allocate_after(Version(0))
    }

    /// Allocate a version strictly greater than both `floor` and every
    /// version previously allocated here.
    pub fn allocate_after(&self, floor: Version) -> Version {
        let now = Version::from_parts((self.clock)(), 0).value();
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let next = now
                .max(current.saturating_add(1))
                .max(floor.value().saturating_add(1));
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Version(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Raise the floor to a version observed elsewhere (e.g. read from disk).
    pub fn observe(&self, version: Version) {
        self.last.fetch_max(version.value(), Ordering::AcqRel);
    }

    /// The most recently allocated or observed version.
    #[must_use]
    pub fn last(&self) -> Version {
        Version(self.last.load(Ordering::Acquire))
    }
}
