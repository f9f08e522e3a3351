//! Real-time clock access and the clock-busy guard.
//!
//! The clock device cannot tolerate interleaved transactions, so every reader
//! and writer first takes a [`ClockLease`] from the shared [`ClockGuard`]. A
//! contending caller does not wait: it gets [`ClockError::Busy`] and skips its
//! work for this round.

use core::fmt;

use portable_atomic::{AtomicBool, Ordering};

use crate::calendar::DateTime;

/// Failure to read or set the wall clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockError {
    /// Another task holds the clock guard.
    Busy,
    /// The device did not answer or returned garbage.
    Unavailable,
    /// The value to set is not a calendar date/time.
    InvalidTime,
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::Busy => f.write_str("clock busy"),
            ClockError::Unavailable => f.write_str("clock unavailable"),
            ClockError::InvalidTime => f.write_str("invalid date/time"),
        }
    }
}

/// Wall-clock device.
pub trait Clock {
    /// Reads the current date and time.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Unavailable`] when the device cannot be read.
    fn now(&mut self) -> Result<DateTime, ClockError>;

    /// Replaces the current date and time.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Unavailable`] when the device rejects the write.
    fn set(&mut self, value: &DateTime) -> Result<(), ClockError>;
}

impl<T: Clock + ?Sized> Clock for &mut T {
    fn now(&mut self) -> Result<DateTime, ClockError> {
        (**self).now()
    }

    fn set(&mut self, value: &DateTime) -> Result<(), ClockError> {
        (**self).set(value)
    }
}

/// Coarse "clock transaction in progress" flag shared between tasks.
#[derive(Debug)]
pub struct ClockGuard {
    busy: AtomicBool,
}

impl ClockGuard {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Claims the guard, or returns `None` when a transaction is running.
    #[must_use]
    pub fn try_lock(&self) -> Option<ClockLease<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ClockLease { guard: self })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Default for ClockGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Held while a clock transaction runs; releases the guard on drop.
#[must_use]
#[derive(Debug)]
pub struct ClockLease<'a> {
    guard: &'a ClockGuard,
}

impl Drop for ClockLease<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

/// Reads the clock under the guard.
///
/// # Errors
///
/// Returns [`ClockError::Busy`] without touching the device when the guard is
/// already held, or the device error otherwise.
pub fn read_guarded<C: Clock + ?Sized>(
    guard: &ClockGuard,
    clock: &mut C,
) -> Result<DateTime, ClockError> {
    let _lease = guard.try_lock().ok_or(ClockError::Busy)?;
    clock.now()
}

/// Validates and writes a new date/time under the guard.
///
/// # Errors
///
/// Returns [`ClockError::InvalidTime`] for out-of-range fields,
/// [`ClockError::Busy`] when the guard is held, or the device error.
pub fn set_guarded<C: Clock + ?Sized>(
    guard: &ClockGuard,
    clock: &mut C,
    value: &DateTime,
) -> Result<(), ClockError> {
    if !value.is_valid() {
        return Err(ClockError::InvalidTime);
    }
    let _lease = guard.try_lock().ok_or(ClockError::Busy)?;
    clock.set(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock {
        now: DateTime,
        reads: usize,
    }

    impl Clock for FixedClock {
        fn now(&mut self) -> Result<DateTime, ClockError> {
            self.reads += 1;
            Ok(self.now)
        }

        fn set(&mut self, value: &DateTime) -> Result<(), ClockError> {
            self.now = *value;
            Ok(())
        }
    }

    #[test]
    fn contended_read_is_skipped() {
        let guard = ClockGuard::new();
        let mut clock = FixedClock {
            now: DateTime::new(8, 0, 0, 1, 6, 25, 7),
            reads: 0,
        };

        let lease = guard.try_lock().expect("first lease");
        assert!(guard.is_busy());
        assert_eq!(read_guarded(&guard, &mut clock), Err(ClockError::Busy));
        assert_eq!(clock.reads, 0);

        drop(lease);
        assert!(!guard.is_busy());
        assert_eq!(read_guarded(&guard, &mut clock), Ok(clock.now));
        assert_eq!(clock.reads, 1);
        assert!(!guard.is_busy());
    }

    #[test]
    fn invalid_time_is_rejected_before_locking() {
        let guard = ClockGuard::new();
        let mut clock = FixedClock {
            now: DateTime::new(8, 0, 0, 1, 6, 25, 7),
            reads: 0,
        };
        let bogus = DateTime::new(25, 0, 0, 1, 6, 25, 7);
        assert_eq!(
            set_guarded(&guard, &mut clock, &bogus),
            Err(ClockError::InvalidTime)
        );

        let fresh = DateTime::new(9, 30, 0, 2, 6, 25, 1);
        assert_eq!(set_guarded(&guard, &mut clock, &fresh), Ok(()));
        assert_eq!(clock.now, fresh);
    }
}
