//! Independent watchdog and the busy-wait delay used while pacing blocking
//! lamp sequences.

use embassy_stm32::peripherals::IWDG;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_time::{Duration, block_for};
use signal_core::engine::{MillisecondDelay, Watchdog, WatchdogPacer};

/// Reset timeout. Must exceed the longest gap between feeds in the control
/// loop (one half-second tick).
pub const WATCHDOG_TIMEOUT_US: u32 = 2_000_000;

pub struct IwdgWatchdog {
    inner: IndependentWatchdog<'static, IWDG>,
}

impl IwdgWatchdog {
    /// Starts the watchdog. It cannot be stopped again.
    pub fn start(mut inner: IndependentWatchdog<'static, IWDG>) -> Self {
        inner.unleash();
        Self { inner }
    }
}

impl Watchdog for IwdgWatchdog {
    fn feed(&mut self) {
        self.inner.pet();
    }
}

pub struct BlockingDelay;

impl MillisecondDelay for BlockingDelay {
    fn delay_1ms(&mut self) {
        block_for(Duration::from_millis(1));
    }
}

pub type BoardPacer = WatchdogPacer<IwdgWatchdog, BlockingDelay>;
