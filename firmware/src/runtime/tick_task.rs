use embassy_time::{Duration, Ticker};
use signal_core::inputs::{TickDivider, TickFlags};

use super::TickSignal;

const HALF_SECOND_MS: u64 = 500;

/// Raises the half-second flag every 500 ms and the one-second flag on every
/// second of those, then wakes the control loop.
#[embassy_executor::task]
pub async fn run(flags: &'static TickFlags, wake: &'static TickSignal) -> ! {
    let mut divider = TickDivider::new();
    let mut ticker = Ticker::every(Duration::from_millis(HALF_SECOND_MS));
    loop {
        ticker.next().await;
        divider.on_half_second(flags);
        wake.signal(());
    }
}
