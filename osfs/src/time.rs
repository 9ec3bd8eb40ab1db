use core::sync::atomic::{AtomicU64, Ordering};

const NSEC_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: u32,
}

impl TimeSpec {
    pub const ZERO: Self = Self { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self {
            sec: (nanos / NSEC_PER_SEC) as i64,
            nsec: (nanos % NSEC_PER_SEC) as u32,
        }
    }
}

/// Source of inode timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeSpec;
}

/// A clock that only moves when told to, one nanosecond per reading by
/// default. Gives reproducible timestamps for images and tests.
pub struct ManualClock {
    nanos: AtomicU64,
    step: u64,
}

impl ManualClock {
    pub fn new(start: TimeSpec) -> Self {
        Self::with_step(start, 1)
    }

    pub fn with_step(start: TimeSpec, step: u64) -> Self {
        let nanos = start.sec as u64 * NSEC_PER_SEC + start.nsec as u64;
        Self {
            nanos: AtomicU64::new(nanos),
            step,
        }
    }

    pub fn advance(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeSpec {
        TimeSpec::from_nanos(self.nanos.fetch_add(self.step, Ordering::Relaxed))
    }
}
