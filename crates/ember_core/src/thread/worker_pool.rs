//! # Worker Pool Donation
//!
//! The core thread reserves one CPU slot for itself. While it is parked
//! waiting for commands it hands that slot back to a companion task pool,
//! and takes it again on wake.

use std::sync::atomic::{AtomicIsize, Ordering};

/// A scheduler the core thread lends its CPU slot to while idle.
pub trait WorkerPool: Send + Sync {
    /// The core thread is about to run; the pool should drop one worker.
    fn reserve_slot(&self);

    /// The core thread is parking; the pool may add a worker back.
    fn release_slot(&self);
}

/// Pool that ignores donations. Used when no task scheduler exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopWorkerPool;

impl WorkerPool for NoopWorkerPool {
    #[inline]
    fn reserve_slot(&self) {}

    #[inline]
    fn release_slot(&self) {}
}

/// Counts worker slots available to a task scheduler.
///
/// A scheduler polls [`WorkerSlots::available`] to size its active workers.
#[derive(Debug)]
pub struct WorkerSlots {
    total: usize,
    available: AtomicIsize,
}

impl WorkerSlots {
    /// Creates a counter with `total` slots, all available.
    ///
    /// # Panics
    ///
    /// Panics if `total` does not fit in an `isize`.
    #[must_use]
    pub fn new(total: usize) -> Self {
        let available = isize::try_from(total).expect("slot count fits in isize");
        Self {
            total,
            available: AtomicIsize::new(available),
        }
    }

    /// Total number of slots.
    #[inline]
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Slots not currently reserved.
    #[inline]
    #[must_use]
    pub fn available(&self) -> isize {
        self.available.load(Ordering::Acquire)
    }
}

impl WorkerPool for WorkerSlots {
    fn reserve_slot(&self) {
        self.available.fetch_sub(1, Ordering::AcqRel);
    }

    fn release_slot(&self) {
        self.available.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_balance() {
        let slots = WorkerSlots::new(4);
        slots.reserve_slot();
        assert_eq!(slots.available(), 3);
        slots.release_slot();
        assert_eq!(slots.available(), 4);
        assert_eq!(slots.total(), 4);
    }
}
