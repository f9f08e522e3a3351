use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::rtc::{Rtc, RtcConfig};
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use signal_core::clock::ClockGuard;
use signal_core::controller::Controller;
use signal_core::engine::{EngineConfig, WatchdogPacer};
use signal_core::inputs::{DemandLatch, SwitchAction, TickFlags};
use signal_core::protocol::Frame;
use static_cell::StaticCell;

use crate::hw::clock::RtcClock;
use crate::hw::outputs::ShiftRegisterOutputs;
use crate::hw::store::{FlashPage, ShadowStore};
use crate::hw::watchdog::{BlockingDelay, IwdgWatchdog, WATCHDOG_TIMEOUT_US};
use crate::telemetry::FirmwareTelemetry;

mod control_task;
mod input_task;
mod tick_task;
mod uart_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Command frames waiting in either direction.
pub(super) const FRAME_QUEUE_DEPTH: usize = 4;

pub(super) type FrameQueue = Channel<CriticalSectionRawMutex, Frame, FRAME_QUEUE_DEPTH>;
pub(super) type SwitchQueue = Channel<CriticalSectionRawMutex, SwitchAction, 2>;
pub(super) type TickSignal = Signal<CriticalSectionRawMutex, ()>;

pub(super) static TICKS: TickFlags = TickFlags::new();
pub(super) static TICK_WAKE: TickSignal = Signal::new();
pub(super) static DEMANDS: DemandLatch = DemandLatch::new();
pub(super) static CLOCK_GUARD: ClockGuard = ClockGuard::new();
pub(super) static SWITCH_ACTIONS: SwitchQueue = Channel::new();
pub(super) static REQUESTS: FrameQueue = Channel::new();
pub(super) static RESPONSES: FrameQueue = Channel::new();

static TELEMETRY: StaticCell<FirmwareTelemetry> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA4,
        PA5,
        PA6,
        PA7,
        PB0,
        PB1,
        PB3,
        PB4,
        PB5,
        PB6,
        PB7,
        USART5,
        RTC,
        IWDG,
        FLASH,
        ..
    } = hal::init(config);

    let outputs = ShiftRegisterOutputs::new(
        Output::new(PA6, Level::Low, Speed::Low),
        Output::new(PA5, Level::Low, Speed::Low),
        Output::new(PA4, Level::Low, Speed::Low),
        Output::new(PA7, Level::High, Speed::Low),
    );
    let watchdog = IwdgWatchdog::start(IndependentWatchdog::new(IWDG, WATCHDOG_TIMEOUT_US));
    let controller = Controller::new(
        outputs,
        WatchdogPacer::new(watchdog, BlockingDelay),
        EngineConfig::default(),
    );

    let mut store = ShadowStore::blank(FlashPage::new(Flash::new_blocking(FLASH)));
    let store_readable = match store.reload() {
        Ok(()) => true,
        Err(error) => {
            defmt::error!(
                "store: flash read failed, configuration left untouched: {}",
                defmt::Debug2Format(&error)
            );
            false
        }
    };

    let parts = control_task::ControlParts {
        controller,
        store,
        store_readable,
        clock: RtcClock::new(Rtc::new(RTC, RtcConfig::default())),
        recorder: TELEMETRY.init(FirmwareTelemetry::new()),
    };

    spawner
        .spawn(tick_task::run(&TICKS, &TICK_WAKE))
        .expect("failed to spawn tick task");
    spawner
        .spawn(input_task::run(
            [
                Input::new(PB3, Pull::Up),
                Input::new(PB4, Pull::Up),
                Input::new(PB5, Pull::Up),
                Input::new(PB6, Pull::Up),
            ],
            Input::new(PB7, Pull::Up),
            &DEMANDS,
            &SWITCH_ACTIONS,
        ))
        .expect("failed to spawn input task");
    spawner
        .spawn(uart_task::run(&REQUESTS, &RESPONSES, USART5, PB0, PB1))
        .expect("failed to spawn command UART task");
    spawner
        .spawn(control_task::run(parts))
        .expect("failed to spawn control task");

    core::future::pending::<()>().await;
}
