use embassy_stm32::gpio::Input;
use embassy_time::{Duration, Ticker};
use signal_core::inputs::{
    DEMAND_INPUTS, DebounceConfig, DemandLatch, DemandScanner, MaintenanceSwitch,
};

use super::SwitchQueue;

const SCAN_PERIOD_MS: u64 = 10;

/// Scans the active-low demand detectors and the maintenance switch.
///
/// Debounced demand edges go straight into the shared latch; switch
/// transitions are queued for the control loop.
#[embassy_executor::task]
pub async fn run(
    demands: [Input<'static>; DEMAND_INPUTS],
    maintenance: Input<'static>,
    latch: &'static DemandLatch,
    actions: &'static SwitchQueue,
) -> ! {
    let config = DebounceConfig::default();
    let mut scanner = DemandScanner::new(config);
    let mut switch = MaintenanceSwitch::new(config);
    let mut ticker = Ticker::every(Duration::from_millis(SCAN_PERIOD_MS));

    loop {
        ticker.next().await;
        scanner.scan(demands.each_ref().map(Input::is_low), latch);
        if let Some(action) = switch.scan(maintenance.is_low()) {
            defmt::info!("inputs: maintenance switch {}", action);
            actions.send(action).await;
        }
    }
}
