//! Spin-based synchronization primitives.
//!
//! All waits in this crate are expected to last a handful of instructions
//! (linking one child, granting one allocation batch), so both primitives
//! busy-wait instead of parking. [`Backoff`] bounds the busy phase: it widens
//! the pause exponentially and falls back to yielding the time slice, which
//! keeps oversubscribed machines from livelocking.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// One-byte test-and-set lock.
///
/// The unlocked state is the all-zero byte, so a lock materialized inside
/// freshly committed (zero-filled) arena memory is valid and unlocked.
pub(crate) struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub(crate) const fn new() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire the lock, spinning with backoff until it is free.
    #[inline]
    pub(crate) fn lock(&self) -> SpinGuard<'_> {
        if self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_slow();
        }
        SpinGuard { lock: self }
    }

    #[cold]
    fn lock_slow(&self) {
        let mut backoff = Backoff::new();
        loop {
            // Spin on loads only; the CAS is retried once the byte reads free.
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    #[inline]
    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// RAII guard for [`SpinLock`]; releases on drop.
pub(crate) struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Bounded exponential backoff for spin waits.
///
/// Early calls issue a growing number of `spin_loop` hints; once the budget
/// is spent, every further call yields to the scheduler instead.
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    /// Beyond `2^SPIN_LIMIT` pause hints per call, yield instead of spinning.
    const SPIN_LIMIT: u32 = 6;

    #[inline]
    pub(crate) fn new() -> Self {
        Backoff { step: 0 }
    }

    /// Wait a little longer than last time.
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                hint::spin_loop();
            }
            self.step += 1;
        } else {
            thread::yield_now();
        }
    }
}
