use embassy_futures::select::{Either3, select3};
use signal_core::controller::Controller;
use signal_core::engine::Watchdog;
use signal_core::protocol::{Frame, FrameSink};
use signal_core::store;

use super::{CLOCK_GUARD, DEMANDS, REQUESTS, RESPONSES, SWITCH_ACTIONS, TICK_WAKE, TICKS};
use crate::hw::clock::RtcClock;
use crate::hw::outputs::ShiftRegisterOutputs;
use crate::hw::store::{FlashPage, ShadowStore};
use crate::hw::watchdog::BoardPacer;
use crate::telemetry::{self, FirmwareInstant, FirmwareTelemetry};

type BoardController = Controller<ShiftRegisterOutputs, BoardPacer>;
type BoardStore = ShadowStore<FlashPage<'static>>;

/// Everything the control loop owns exclusively.
pub struct ControlParts {
    pub controller: BoardController,
    pub store: BoardStore,
    /// False when the flash page could not be read; the shadow is then
    /// blank and must never be written back.
    pub store_readable: bool,
    pub clock: RtcClock,
    pub recorder: &'static mut FirmwareTelemetry,
}

/// Queues responses for the UART task without blocking the control loop.
struct ResponseSink;

impl FrameSink for ResponseSink {
    fn send(&mut self, frame: &Frame) {
        if RESPONSES.try_send(frame.clone()).is_err() {
            defmt::warn!("control: response queue full, dropping {=u8:#x}", frame.command);
        }
    }
}

/// Boots the controller, then serves the switch, the command link and the
/// tick flags in that order of priority.
#[embassy_executor::task]
pub async fn run(parts: ControlParts) -> ! {
    let ControlParts {
        mut controller,
        mut store,
        store_readable,
        mut clock,
        recorder,
    } = parts;

    if store_readable {
        let mask = store::output_enable_mask(&mut store);
        controller.engine_mut().outputs_mut().set_enable_mask(mask);

        let report = controller.boot(
            &mut store,
            &mut clock,
            &CLOCK_GUARD,
            &mut recorder.at(FirmwareInstant::now()),
        );
        defmt::info!(
            "control: booted id={} store={} decision={}",
            store::controller_id(&mut store),
            report.store,
            report.decision
        );
        persist(&mut store);
    } else {
        controller.boot_without_store(&mut store, &mut recorder.at(FirmwareInstant::now()));
        defmt::warn!("control: booted without configuration, flashing red until reset");
    }
    let mut cursor = telemetry::drain(recorder, 0);

    loop {
        let event = select3(
            SWITCH_ACTIONS.receive(),
            REQUESTS.receive(),
            TICK_WAKE.wait(),
        )
        .await;
        let mut sink = recorder.at(FirmwareInstant::now());
        match event {
            Either3::First(action) => controller.on_switch(action, &mut store, &mut sink),
            Either3::Second(frame) => {
                controller.handle_frame(
                    &frame,
                    &mut store,
                    &mut clock,
                    &CLOCK_GUARD,
                    &mut ResponseSink,
                    &mut sink,
                );
                if !controller.has_store_fault() {
                    persist(&mut store);
                }
            }
            Either3::Third(()) => {
                let ticks = TICKS.take();
                if !ticks.is_idle() {
                    controller.step(
                        &mut store,
                        &mut clock,
                        &CLOCK_GUARD,
                        &DEMANDS,
                        ticks,
                        &mut sink,
                    );
                }
            }
        }
        cursor = telemetry::drain(recorder, cursor);

        if controller.is_halted() {
            defmt::warn!("control: maintenance switch released, waiting for watchdog reset");
            loop {
                cortex_m::asm::nop();
            }
        }
        controller.engine_mut().pacer_mut().watchdog_mut().feed();
    }
}

fn persist(store: &mut BoardStore) {
    match store.flush() {
        Ok(true) => defmt::debug!("store: page written"),
        Ok(false) => {}
        Err(error) => defmt::warn!("store: flush failed: {}", defmt::Debug2Format(&error)),
    }
}
