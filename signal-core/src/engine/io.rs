//! Hardware seams used by the engine: output ports and watchdog-safe waits.

use crate::store::PortFrame;

/// Drives the five output ports.
pub trait SignalOutputs {
    fn apply(&mut self, frame: &PortFrame);
}

impl<T: SignalOutputs + ?Sized> SignalOutputs for &mut T {
    fn apply(&mut self, frame: &PortFrame) {
        (**self).apply(frame);
    }
}

/// Blocking wait used by the startup ceremony.
///
/// Implementations must keep the watchdog serviced for the whole wait.
pub trait Pacer {
    fn pause_ms(&mut self, millis: u32);
}

/// Hardware watchdog that must be fed at least once per millisecond of waiting.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Busy-wait of exactly one millisecond.
pub trait MillisecondDelay {
    fn delay_1ms(&mut self);
}

/// [`Pacer`] that waits in one-millisecond slices, feeding the watchdog
/// before each slice.
#[derive(Debug)]
pub struct WatchdogPacer<W, D> {
    watchdog: W,
    delay: D,
}

impl<W, D> WatchdogPacer<W, D>
where
    W: Watchdog,
    D: MillisecondDelay,
{
    #[must_use]
    pub const fn new(watchdog: W, delay: D) -> Self {
        Self { watchdog, delay }
    }

    pub fn watchdog_mut(&mut self) -> &mut W {
        &mut self.watchdog
    }
}

impl<W, D> Pacer for WatchdogPacer<W, D>
where
    W: Watchdog,
    D: MillisecondDelay,
{
    fn pause_ms(&mut self, millis: u32) {
        for _ in 0..millis {
            self.watchdog.feed();
            self.delay.delay_1ms();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingWatchdog(u32);

    impl Watchdog for CountingWatchdog {
        fn feed(&mut self) {
            self.0 += 1;
        }
    }

    #[derive(Default)]
    struct CountingDelay(u32);

    impl MillisecondDelay for CountingDelay {
        fn delay_1ms(&mut self) {
            self.0 += 1;
        }
    }

    #[test]
    fn watchdog_is_fed_every_millisecond() {
        let mut pacer = WatchdogPacer::new(CountingWatchdog::default(), CountingDelay::default());
        pacer.pause_ms(500);
        assert_eq!(pacer.watchdog.0, 500);
        assert_eq!(pacer.delay.0, 500);
    }
}
