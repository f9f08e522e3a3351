mod common;

use common::{Rig, movement};
use signal_core::calendar::{DateTime, DayType};
use signal_core::store::{
    self, FlowAction, FlowRule, IntermittenceRule, Movement, Plan, PortFrame, Sequence,
    SequenceKind,
};
use signal_core::telemetry::ControllerEvent;

const MONDAY_8AM: DateTime = DateTime::new(8, 0, 0, 3, 3, 25, 1);

/// Demand sequence 0 visits movements 0..=5 in order, five seconds each,
/// under plan 1.
fn demand_rig() -> Rig {
    let mut rig = Rig::new(MONDAY_8AM);
    store::ensure_initialized(&mut rig.store);
    for index in 0..6u8 {
        rig.put(usize::from(index), &movement(1 << index, 5));
    }
    let sequence =
        Sequence::new(SequenceKind::Demand, 0, &[0, 1, 2, 3, 4, 5]).expect("sequence");
    rig.put(0, &sequence);
    rig.put(1, &Plan::new(DayType::Everyday, 0, 0, 0, 0));
    rig
}

#[test]
fn latched_demand_takes_the_decision_point() {
    let mut rig = demand_rig();
    rig.put(
        0,
        &FlowRule::new(0, 1, FlowAction::DecisionPoint, 0b0100, 5),
    );
    rig.boot();

    rig.seconds(4);
    assert_eq!(rig.current_movement(), Some(0));
    rig.demands.set(2);
    rig.demands.set(0);

    rig.seconds(1);
    assert_eq!(rig.current_movement(), Some(1));
    assert_eq!(
        rig.demands.snapshot(),
        0,
        "demands are consumed when the movement loads"
    );
    assert!(rig.events.contains(&ControllerEvent::DecisionPoint {
        movement: 1,
        taken: true
    }));

    rig.seconds(5);
    assert_eq!(rig.current_movement(), Some(5));
}

#[test]
fn decision_point_without_matching_demand_continues_in_order() {
    let mut rig = demand_rig();
    rig.put(
        0,
        &FlowRule::new(0, 1, FlowAction::DecisionPoint, 0b0100, 5),
    );
    rig.boot();

    rig.seconds(4);
    rig.demands.set(3);
    rig.seconds(1);
    assert_eq!(rig.current_movement(), Some(1));
    assert_eq!(rig.demands.snapshot(), 0);
    assert!(rig.events.contains(&ControllerEvent::DecisionPoint {
        movement: 1,
        taken: false
    }));

    rig.seconds(5);
    assert_eq!(rig.current_movement(), Some(2));
}

#[test]
fn demand_arriving_during_the_decision_movement_waits_for_the_next_pass() {
    let mut rig = demand_rig();
    rig.put(
        0,
        &FlowRule::new(0, 1, FlowAction::DecisionPoint, 0b0100, 5),
    );
    rig.boot();

    rig.seconds(6);
    assert_eq!(rig.current_movement(), Some(1));
    rig.demands.set(2);

    rig.seconds(4);
    assert_eq!(rig.current_movement(), Some(2));
    assert_eq!(rig.demands.snapshot(), 0b0100, "still latched");

    // 2, 3, 4 and 5 run their full five seconds before movement 1 returns.
    rig.seconds(25);
    assert_eq!(rig.current_movement(), Some(1));
    assert_eq!(rig.demands.snapshot(), 0);
    assert!(rig.events.contains(&ControllerEvent::DecisionPoint {
        movement: 1,
        taken: true
    }));
    rig.seconds(5);
    assert_eq!(rig.current_movement(), Some(5));
}

#[test]
fn goto_rule_jumps_unconditionally_on_demand_sequences() {
    let mut rig = demand_rig();
    rig.put(0, &FlowRule::new(0, 2, FlowAction::Goto, 0, 0));
    rig.boot();

    rig.half_second();
    let mut visited = vec![rig.current_movement()];
    for _ in 0..6 {
        rig.seconds(5);
        visited.push(rig.current_movement());
    }
    assert_eq!(
        visited,
        [Some(0), Some(1), Some(2), Some(0), Some(1), Some(2), Some(0)]
    );
}

#[test]
fn automatic_sequences_ignore_flow_rules() {
    let mut rig = demand_rig();
    let sequence =
        Sequence::new(SequenceKind::Automatic, 0, &[0, 1, 2, 3, 4, 5]).expect("sequence");
    rig.put(0, &sequence);
    rig.put(0, &FlowRule::new(0, 2, FlowAction::Goto, 0, 0));
    rig.boot();

    rig.seconds(15);
    assert_eq!(rig.current_movement(), Some(3));
}

#[test]
fn intermittence_blinks_only_the_masked_lamps() {
    let mut rig = Rig::new(MONDAY_8AM);
    store::ensure_initialized(&mut rig.store);
    rig.put(
        1,
        &Movement::new(PortFrame::new([0x80, 0x00, 0x00], [0x12, 0x00]), [30; 5]),
    );
    rig.put(
        0,
        &Sequence::new(SequenceKind::Automatic, 0, &[1]).expect("sequence"),
    );
    rig.put(4, &Plan::new(DayType::Everyday, 0, 0, 0, 0));
    rig.put(0, &IntermittenceRule::new(4, 1, [0x01, 0x00, 0x00]));
    rig.boot();

    let lit = PortFrame::new([0x81, 0x00, 0x00], [0x12, 0x00]);
    let dark = PortFrame::new([0x80, 0x00, 0x00], [0x12, 0x00]);
    for half in 0..8 {
        rig.half_second();
        let expected = if half % 2 == 0 { lit } else { dark };
        assert_eq!(rig.output(), expected, "half-second {half}");
    }
}

#[test]
fn intermittence_is_keyed_by_the_running_plan() {
    let mut rig = Rig::new(MONDAY_8AM);
    store::ensure_initialized(&mut rig.store);
    rig.put(1, &movement(0x80, 30));
    rig.put(
        0,
        &Sequence::new(SequenceKind::Automatic, 0, &[1]).expect("sequence"),
    );
    rig.put(4, &Plan::new(DayType::Everyday, 0, 0, 0, 0));
    rig.put(0, &IntermittenceRule::new(3, 1, [0x80, 0x00, 0x00]));
    rig.boot();

    for _ in 0..4 {
        rig.half_second();
        assert_eq!(rig.output(), PortFrame::new([0x80, 0, 0], [0, 0]));
    }
}
