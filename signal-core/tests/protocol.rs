mod common;

use common::{Rig, SentFrames};
use signal_core::calendar::DateTime;
use signal_core::engine::{EngineState, PlanChange};
use signal_core::protocol::{Frame, FrameError, FrameReceiver, reject};
use signal_core::store::{self, EMPTY, Plan, read_record};
use signal_core::telemetry::{ControllerEvent, FallbackReason};

const MONDAY_0759: DateTime = DateTime::new(7, 59, 0, 3, 3, 25, 1);

fn receive(receiver: &mut FrameReceiver, bytes: &[u8]) -> Result<Frame, FrameError> {
    bytes
        .iter()
        .find_map(|byte| receiver.push(*byte))
        .expect("frame completes")
}

#[test]
fn wire_bytes_in_wire_bytes_out() {
    let mut rig = Rig::new(MONDAY_0759);
    rig.boot();

    let request = [0x43, 0x53, 0x4F, 0x40, 0x06, 0x00, 0x07, 0x01, 0x00, 0x08, 0x00, 0x56, 0x03, 0xFF];
    let mut receiver = FrameReceiver::new();
    let frame = receive(&mut receiver, &request).expect("valid frame");

    let mut sent = SentFrames::default();
    assert!(rig.controller.handle_frame(
        &frame,
        &mut rig.store,
        &mut rig.clock,
        &rig.guard,
        &mut sent,
        &mut rig.events,
    ));
    assert_eq!(sent.0.len(), 1);
    assert_eq!(
        sent.0[0].encode().as_slice(),
        &[0x43, 0x53, 0x4F, 0x06, 0x01, 0x40, 0x47, 0x03, 0xFF]
    );
    let plan: Plan = read_record(&mut rig.store, 0).expect("plan 0");
    assert_eq!((plan.day_type, plan.sequence, plan.hour), (7, 1, 8));
}

#[test]
fn corrupted_frame_is_nacked_without_touching_the_store() {
    let mut rig = Rig::new(MONDAY_0759);
    rig.boot();
    let before = *rig.store.as_bytes();

    let request = [0x43, 0x53, 0x4F, 0x10, 0x01, 0x2A, 0x00, 0x03, 0xFF];
    let mut receiver = FrameReceiver::new();
    let error = receive(&mut receiver, &request).expect_err("bad checksum");
    assert_eq!(error, FrameError::Checksum { command: 0x10 });

    let nack = reject(error).expect("checksum errors are answered");
    assert_eq!(
        nack.encode().as_slice(),
        &[0x43, 0x53, 0x4F, 0x15, 0x02, 0x10, 0x01, 0x28, 0x03, 0xFF]
    );
    assert_eq!(rig.store.as_bytes(), &before);
}

#[test]
fn configuration_sent_over_the_wire_takes_effect_at_the_next_minute() {
    let mut rig = Rig::new(MONDAY_0759);
    rig.boot();
    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);

    let acks = [
        rig.send(0x23, &[1, 0x24, 0x00, 0x00, 0x00, 0x00, 9, 9, 9, 9, 9]),
        rig.send(0x30, &[1, 0, 0, 1, 1, EMPTY, EMPTY, EMPTY, EMPTY, EMPTY, EMPTY, EMPTY, EMPTY, EMPTY, EMPTY, EMPTY]),
        rig.send(0x40, &[0, 7, 1, 0, 8, 0]),
    ];
    for (sent, command) in acks.iter().zip([0x23, 0x30, 0x40]) {
        assert_eq!(sent.as_slice(), &[Frame::ack(command)]);
    }
    assert_eq!(rig.controller.scheduler().plans()[0].sequence, 1);
    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);

    rig.seconds(60);
    assert_eq!(rig.controller.engine().state(), EngineState::RunningSequence);
    assert_eq!(rig.controller.engine().running_plan(), Some(0));
    assert_eq!(rig.current_movement(), Some(1));
}

#[test]
fn factory_reset_acknowledges_and_returns_to_fallback() {
    let mut rig = Rig::new(MONDAY_0759);
    store::ensure_initialized(&mut rig.store);
    rig.put(0, &Plan::new(signal_core::calendar::DayType::Everyday, 0, 0, 0, 0));
    rig.boot();
    rig.seconds(2);
    assert_eq!(rig.controller.engine().state(), EngineState::RunningSequence);

    let sent = rig.send(0xF0, &[]);
    assert_eq!(sent, [Frame::ack(0xF0)]);
    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);
    assert!(
        rig.events
            .contains(&ControllerEvent::FallbackEntered(FallbackReason::Commanded))
    );
    let plan: Plan = read_record(&mut rig.store, 0).expect("plan 0");
    assert_eq!(plan, Plan::EMPTY);

    rig.seconds(60);
    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);
    assert_eq!(
        rig.controller.engine().fallback_reason(),
        Some(FallbackReason::NoConfiguration)
    );
}

#[test]
fn factory_reset_drops_a_pending_plan_change() {
    let mut rig = Rig::new(MONDAY_0759);
    store::ensure_initialized(&mut rig.store);
    rig.put(0, &Plan::new(signal_core::calendar::DayType::Everyday, 0, 0, 0, 0));
    rig.boot();
    rig.controller
        .engine_mut()
        .request_plan_change(PlanChange::new(0, 1, Some(0)), &mut rig.events);

    rig.send(0xF0, &[]);
    assert_eq!(rig.controller.engine().pending_change(), None);

    rig.half_second();
    assert_eq!(rig.controller.engine().state(), EngineState::Fallback);
    assert_eq!(rig.current_movement(), None);
}

#[test]
fn read_time_reports_the_clock() {
    let mut rig = Rig::new(MONDAY_0759);
    rig.boot();
    let sent = rig.send(0x21, &[]);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].command, 0x21);
    assert_eq!(sent[0].payload.as_slice(), &[7, 59, 0, 3, 3, 25, 1]);
}
