mod common;

use common::{Rig, movement};
use signal_core::calendar::{DateTime, DayType};
use signal_core::engine::EngineState;
use signal_core::inputs::{DebounceConfig, MaintenanceSwitch, SwitchAction};
use signal_core::protocol::{Frame, NackCode};
use signal_core::store::{
    self, EMPTY, NvStore, Plan, PortFrame, Sequence, SequenceKind, StoreStatus,
};
use signal_core::telemetry::{ControllerEvent, FallbackReason};

const MONDAY_8AM: DateTime = DateTime::new(8, 0, 0, 3, 3, 25, 1);

#[test]
fn empty_store_flashes_red_every_half_second() {
    let mut rig = Rig::new(MONDAY_8AM);
    rig.boot();

    assert!(
        rig.events
            .contains(&ControllerEvent::StoreInitialized(StoreStatus::Seeded))
    );
    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);
    assert_eq!(
        rig.controller.engine().fallback_reason(),
        Some(FallbackReason::NoConfiguration)
    );

    for half in 0..12 {
        rig.half_second();
        let expected = if half % 2 == 0 {
            PortFrame::ALL_RED
        } else {
            PortFrame::OFF
        };
        assert_eq!(rig.output(), expected, "half-second {half}");
    }
}

#[test]
fn unreadable_store_is_never_seeded_or_scheduled() {
    let mut rig = Rig::new(MONDAY_8AM);
    rig.controller
        .boot_without_store(&mut rig.store, &mut rig.events);

    assert!(rig.controller.has_store_fault());
    assert_eq!(
        rig.controller.engine().fallback_reason(),
        Some(FallbackReason::StoreUnavailable)
    );
    assert_eq!(rig.store.read(0x000), EMPTY, "no sentinel written");

    let sent = rig.send(0x10, &[7]);
    assert_eq!(sent, [Frame::nack(0x10, NackCode::ExecutionFailed)]);
    assert_eq!(store::controller_id(&mut rig.store), EMPTY);

    rig.seconds(61);
    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);
    assert_eq!(
        rig.controller.engine().fallback_reason(),
        Some(FallbackReason::StoreUnavailable)
    );
    rig.half_second();
    let first = rig.output();
    rig.half_second();
    assert_ne!(first, rig.output());
    assert!([PortFrame::ALL_RED, PortFrame::OFF].contains(&first));
}

#[test]
fn boot_ceremony_flashes_movement_zero_then_red_then_amber() {
    let mut rig = Rig::new(MONDAY_8AM);
    store::ensure_initialized(&mut rig.store);
    let lamp = movement(0x24, 3);
    rig.put(0, &lamp);

    rig.boot();

    let frames = &rig.controller.engine().outputs().frames;
    assert_eq!(frames.len(), 23, "off at power-up plus eleven on/off pairs");
    assert_eq!(frames[0], PortFrame::OFF);
    for pair in 0..5 {
        assert_eq!(frames[1 + pair * 2], lamp.ports);
        assert_eq!(frames[2 + pair * 2], PortFrame::OFF);
    }
    for pair in 0..3 {
        assert_eq!(frames[11 + pair * 2], PortFrame::ALL_RED);
        assert_eq!(frames[17 + pair * 2], PortFrame::ALL_AMBER);
    }
    assert_eq!(frames[22], PortFrame::OFF);

    let pacer = rig.controller.engine_mut().pacer_mut();
    assert_eq!(pacer.pauses, 22);
    assert_eq!(pacer.total_ms, 11_000);
}

#[test]
fn malformed_sequence_falls_back_instead_of_running() {
    let mut rig = Rig::new(MONDAY_8AM);
    store::ensure_initialized(&mut rig.store);
    let mut broken = Sequence::EMPTY;
    broken.kind = SequenceKind::Automatic.to_raw();
    broken.count = 0;
    rig.put(3, &broken);
    rig.put(0, &Plan::new(DayType::Everyday, 3, 0, 0, 0));

    rig.boot();

    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);
    assert_eq!(
        rig.controller.engine().fallback_reason(),
        Some(FallbackReason::MalformedSequence)
    );
    rig.half_second();
    assert_eq!(rig.output(), PortFrame::ALL_RED);
}

#[test]
fn empty_movement_in_sequence_falls_back() {
    let mut rig = Rig::new(MONDAY_8AM);
    store::ensure_initialized(&mut rig.store);
    rig.put(1, &movement(0x01, 2));
    let sequence = Sequence::new(SequenceKind::Automatic, 0, &[1, 7]).expect("sequence");
    rig.put(0, &sequence);
    rig.put(0, &Plan::new(DayType::Everyday, 0, 0, 0, 0));

    rig.boot();
    rig.half_second();
    assert_eq!(rig.current_movement(), Some(1));

    rig.seconds(2);
    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);
    assert!(
        rig.events
            .contains(&ControllerEvent::FallbackEntered(FallbackReason::EmptyMovement))
    );
}

#[test]
fn maintenance_switch_latches_manual_flash_then_halts() {
    let mut rig = Rig::new(MONDAY_8AM);
    store::ensure_initialized(&mut rig.store);
    let lamp = movement(0x49, 4);
    rig.put(0, &lamp);
    rig.put(0, &Plan::new(DayType::Everyday, 0, 0, 0, 0));
    rig.boot();
    rig.seconds(3);
    assert_eq!(rig.controller.engine().state(), EngineState::RunningSequence);

    let mut switch = MaintenanceSwitch::new(DebounceConfig::default());
    let engaged: Vec<SwitchAction> = (0..60).filter_map(|_| switch.scan(true)).collect();
    assert_eq!(engaged, [SwitchAction::EngageManualFlash]);
    rig.controller
        .on_switch(engaged[0], &mut rig.store, &mut rig.events);
    assert_eq!(rig.controller.engine().state(), EngineState::ManualFlash);

    assert!(rig.send(0x11, &[]).is_empty(), "commands are ignored");
    let mut seen = Vec::new();
    for _ in 0..4 {
        rig.half_second();
        seen.push(rig.output());
    }
    assert!(seen.contains(&lamp.ports));
    assert!(seen.contains(&PortFrame::OFF));
    assert_eq!(rig.controller.engine().state(), EngineState::ManualFlash);

    let released: Vec<SwitchAction> = (0..60).filter_map(|_| switch.scan(false)).collect();
    assert_eq!(released, [SwitchAction::Halt]);
    rig.controller
        .on_switch(released[0], &mut rig.store, &mut rig.events);
    assert!(rig.controller.is_halted());
}
