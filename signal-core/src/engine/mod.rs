//! Sequence execution engine.
//!
//! The engine owns the output ports and turns the running plan's sequence
//! into port values, one main-loop tick at a time. It never reads the clock:
//! the scheduler decides *what* runs, the engine decides *when* it switches.
//!
//! Plan changes requested while a sequence runs are parked in a depth-1
//! mailbox and applied only when the sequence is about to load its anchor
//! step, so a running cycle is never cut in the middle of a movement.

use core::fmt;

use crate::inputs::{DemandLatch, TickSnapshot};
use crate::scheduler::PlanExecutor;
use crate::store::layout::{MAX_MOVEMENTS, MAX_SEQUENCES};
use crate::store::{
    self, FlowAction, Movement, NvStore, PortFrame, Sequence, SequenceKind, read_record,
};
use crate::telemetry::{ControllerEvent, EventSink, FallbackReason};

pub mod io;
pub mod mailbox;

pub use io::{MillisecondDelay, Pacer, SignalOutputs, Watchdog, WatchdogPacer};
pub use mailbox::{PlanChange, PlanMailbox};

/// Timing of the blocking startup flash ceremony.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    pub flash_on_ms: u32,
    pub flash_off_ms: u32,
    /// Flashes of Movement 0 (or all-red when it is empty).
    pub movement_flashes: u8,
    pub red_flashes: u8,
    pub amber_flashes: u8,
}

impl EngineConfig {
    #[must_use]
    pub const fn new(flash_on_ms: u32, flash_off_ms: u32) -> Self {
        Self {
            flash_on_ms,
            flash_off_ms,
            movement_flashes: 5,
            red_flashes: 3,
            amber_flashes: 3,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(500, 500)
    }
}

/// Engine state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineState {
    /// Outputs forced off.
    Inactive,
    RunningSequence,
    /// All-red flashing until a valid plan change arrives.
    Fallback,
    /// Movement 0 flashing; latched until reset.
    ManualFlash,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EngineState::Inactive => "inactive",
            EngineState::RunningSequence => "running",
            EngineState::Fallback => "fallback",
            EngineState::ManualFlash => "manual-flash",
        };
        f.write_str(label)
    }
}

/// Movement currently asserted on the outputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadedMovement {
    /// Movement table index.
    pub index: u8,
    /// Position of the movement within the running sequence.
    pub step: usize,
    /// Position loaded when this movement ends, fixed by any flow rule at load time.
    pub next: usize,
    pub ports: PortFrame,
    /// Intermittence mask for the main ports, if a rule matched.
    pub blink: Option<[u8; 3]>,
}

impl LoadedMovement {
    /// Port values for the given blink phase.
    #[must_use]
    pub fn frame(&self, blink_on: bool) -> PortFrame {
        match self.blink {
            Some(mask) => self.ports.with_blink(mask, blink_on),
            None => self.ports,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Cursor {
    sequence_id: u8,
    sequence: Sequence,
    step_count: usize,
    selector: u8,
}

/// Light-pattern state machine driving a [`SignalOutputs`] implementation.
pub struct SequenceEngine<O, P> {
    outputs: O,
    pacer: P,
    config: EngineConfig,
    state: EngineState,
    fallback_reason: Option<FallbackReason>,
    blink_on: bool,
    countdown: u16,
    cursor: Option<Cursor>,
    current: Option<LoadedMovement>,
    mailbox: PlanMailbox,
    running_plan: Option<u8>,
    manual_frame: PortFrame,
}

impl<O, P> SequenceEngine<O, P>
where
    O: SignalOutputs,
    P: Pacer,
{
    /// Creates the engine in [`EngineState::Fallback`] with every output off.
    #[must_use]
    pub fn new(outputs: O, pacer: P, config: EngineConfig) -> Self {
        let mut engine = Self {
            outputs,
            pacer,
            config,
            state: EngineState::Fallback,
            fallback_reason: Some(FallbackReason::Commanded),
            blink_on: false,
            countdown: 0,
            cursor: None,
            current: None,
            mailbox: PlanMailbox::new(),
            running_plan: None,
            manual_frame: PortFrame::ALL_RED,
        };
        engine.outputs.apply(&PortFrame::OFF);
        engine
    }

    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub const fn fallback_reason(&self) -> Option<FallbackReason> {
        self.fallback_reason
    }

    /// Plan slot whose sequence is actually running.
    #[must_use]
    pub const fn running_plan(&self) -> Option<u8> {
        self.running_plan
    }

    #[must_use]
    pub fn pending_change(&self) -> Option<PlanChange> {
        self.mailbox.peek().copied()
    }

    #[must_use]
    pub const fn blink_on(&self) -> bool {
        self.blink_on
    }

    /// Seconds left on the current movement.
    #[must_use]
    pub const fn countdown(&self) -> u16 {
        self.countdown
    }

    #[must_use]
    pub const fn current_movement(&self) -> Option<&LoadedMovement> {
        self.current.as_ref()
    }

    /// Sequence, selector and plan currently running.
    #[must_use]
    pub fn running_change(&self) -> Option<PlanChange> {
        self.cursor
            .map(|cursor| PlanChange::new(cursor.sequence_id, cursor.selector, self.running_plan))
    }

    #[must_use]
    pub const fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut O {
        &mut self.outputs
    }

    pub fn pacer_mut(&mut self) -> &mut P {
        &mut self.pacer
    }

    /// Blocking boot-time lamp test.
    ///
    /// Flashes Movement 0 (all-red if it is empty), then all-red, then
    /// all-amber. Every wait goes through the [`Pacer`], which keeps the
    /// watchdog fed.
    pub fn run_startup_ceremony<S: NvStore + ?Sized>(&mut self, store: &mut S) {
        let first = movement_zero_frame(store);
        self.flash(first, self.config.movement_flashes);
        self.flash(PortFrame::ALL_RED, self.config.red_flashes);
        self.flash(PortFrame::ALL_AMBER, self.config.amber_flashes);
    }

    fn flash(&mut self, frame: PortFrame, times: u8) {
        for _ in 0..times {
            self.outputs.apply(&frame);
            self.pacer.pause_ms(self.config.flash_on_ms);
            self.outputs.apply(&PortFrame::OFF);
            self.pacer.pause_ms(self.config.flash_off_ms);
        }
    }

    /// Starts `change` immediately, discarding any pending change.
    ///
    /// Falls back when the sequence slot does not exist or its step count is
    /// unusable. Ignored while manual flash is latched.
    pub fn start<S, E>(&mut self, store: &mut S, change: PlanChange, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        if self.state == EngineState::ManualFlash {
            return;
        }
        self.mailbox.clear();
        self.current = None;
        self.countdown = 0;

        let index = usize::from(change.sequence);
        if index >= MAX_SEQUENCES {
            self.enter_fallback(FallbackReason::MissingSequence, sink);
            return;
        }
        let Ok(sequence) = read_record::<Sequence, S>(store, index) else {
            self.enter_fallback(FallbackReason::MissingSequence, sink);
            return;
        };
        let Some(step_count) = sequence.step_count() else {
            self.enter_fallback(FallbackReason::MalformedSequence, sink);
            return;
        };

        self.cursor = Some(Cursor {
            sequence_id: change.sequence,
            sequence,
            step_count,
            selector: change.selector,
        });
        self.running_plan = change.plan;
        self.fallback_reason = None;
        self.state = EngineState::RunningSequence;
        sink.record(ControllerEvent::PlanChangeApplied {
            plan: change.plan,
            sequence: change.sequence,
        });
    }

    /// Parks `change` until the running sequence reaches its anchor step.
    ///
    /// A later request replaces an earlier one that has not been applied.
    pub fn request_plan_change<E: EventSink + ?Sized>(&mut self, change: PlanChange, sink: &mut E) {
        if self.state == EngineState::ManualFlash {
            return;
        }
        self.mailbox.post(change);
        sink.record(ControllerEvent::PlanChangeDeferred { plan: change.plan });
    }

    /// Forces every output off and forgets the running and pending plans.
    pub fn stop<E: EventSink + ?Sized>(&mut self, sink: &mut E) {
        if self.state == EngineState::ManualFlash {
            return;
        }
        self.mailbox.clear();
        self.clear_sequence();
        self.outputs.apply(&PortFrame::OFF);
        if self.state != EngineState::Inactive {
            self.state = EngineState::Inactive;
            sink.record(ControllerEvent::EngineStopped);
        }
    }

    /// Switches to all-red flashing. A pending plan change is kept so the
    /// next tick can recover.
    pub fn enter_fallback<E: EventSink + ?Sized>(&mut self, reason: FallbackReason, sink: &mut E) {
        if self.state == EngineState::ManualFlash {
            return;
        }
        self.clear_sequence();
        let changed =
            self.state != EngineState::Fallback || self.fallback_reason != Some(reason);
        self.state = EngineState::Fallback;
        self.fallback_reason = Some(reason);
        if changed {
            sink.record(ControllerEvent::FallbackEntered(reason));
        }
    }

    /// Latches manual flash of Movement 0 (all-red when it is empty).
    pub fn enter_manual_flash<S, E>(&mut self, store: &mut S, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        if self.state == EngineState::ManualFlash {
            return;
        }
        self.mailbox.clear();
        self.clear_sequence();
        self.fallback_reason = None;
        self.manual_frame = movement_zero_frame(store);
        self.state = EngineState::ManualFlash;
        self.outputs.apply(&self.manual_frame);
        sink.record(ControllerEvent::ManualFlashEngaged);
    }

    /// Advances the engine by one main-loop tick.
    ///
    /// Each half-second flag toggles the blink phase; each one-second flag
    /// counts the running movement down. Both may be set in one call.
    pub fn run<S, E>(
        &mut self,
        store: &mut S,
        demands: &DemandLatch,
        ticks: TickSnapshot,
        sink: &mut E,
    ) where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        if ticks.is_idle() {
            return;
        }
        if ticks.half_second {
            self.blink_on = !self.blink_on;
        }

        match self.state {
            EngineState::RunningSequence => {
                if ticks.one_second {
                    self.countdown = self.countdown.saturating_sub(1);
                }
                self.run_sequence(store, demands, sink);
            }
            EngineState::Fallback | EngineState::Inactive => {
                if let Some(change) = self.mailbox.take() {
                    self.start(store, change, sink);
                    if self.state == EngineState::RunningSequence {
                        self.run_sequence(store, demands, sink);
                        return;
                    }
                }
                self.drive_idle();
            }
            EngineState::ManualFlash => {
                let frame = if self.blink_on {
                    self.manual_frame
                } else {
                    PortFrame::OFF
                };
                self.outputs.apply(&frame);
            }
        }
    }

    fn drive_idle(&mut self) {
        let frame = match self.state {
            EngineState::Fallback if self.blink_on => PortFrame::ALL_RED,
            _ => PortFrame::OFF,
        };
        self.outputs.apply(&frame);
    }

    fn run_sequence<S, E>(&mut self, store: &mut S, demands: &DemandLatch, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        if self.countdown == 0 {
            self.load_next(store, demands, sink);
        }
        if self.state != EngineState::RunningSequence {
            self.drive_idle();
            return;
        }
        if let Some(current) = self.current {
            self.outputs.apply(&current.frame(self.blink_on));
        }
    }

    fn load_next<S, E>(&mut self, store: &mut S, demands: &DemandLatch, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        let Some(cursor) = self.cursor else {
            self.enter_fallback(FallbackReason::MalformedSequence, sink);
            return;
        };

        let mut step = self.current.map_or(0, |current| current.next);

        if step == cursor.sequence.anchor_position()
            && let Some(change) = self.mailbox.take()
        {
            if self.running_plan == Some(0) {
                self.run_startup_ceremony(store);
            }
            self.start(store, change, sink);
            if self.state != EngineState::RunningSequence {
                return;
            }
            step = 0;
        }

        self.load_step(store, step, demands, sink);
    }

    fn load_step<S, E>(&mut self, store: &mut S, step: usize, demands: &DemandLatch, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        let Some(cursor) = self.cursor else {
            return;
        };
        let Some(index) = cursor.sequence.movement_at(step) else {
            self.enter_fallback(FallbackReason::StepOutOfRange, sink);
            return;
        };
        if usize::from(index) >= MAX_MOVEMENTS {
            self.enter_fallback(FallbackReason::MovementOutOfRange, sink);
            return;
        }
        let movement = match read_record::<Movement, S>(store, usize::from(index)) {
            Ok(movement) if movement.is_valid() => movement,
            Ok(_) => {
                self.enter_fallback(FallbackReason::EmptyMovement, sink);
                return;
            }
            Err(_) => {
                self.enter_fallback(FallbackReason::MovementOutOfRange, sink);
                return;
            }
        };

        let blink = self
            .running_plan
            .and_then(|plan| store::find_intermittence(store, plan, index))
            .map(|rule| rule.mask);

        let next = next_step(store, &cursor, index, step, demands, sink);

        self.countdown = movement.duration_secs(cursor.selector);
        self.current = Some(LoadedMovement {
            index,
            step,
            next,
            ports: movement.ports,
            blink,
        });
    }

    fn clear_sequence(&mut self) {
        self.cursor = None;
        self.current = None;
        self.countdown = 0;
        self.running_plan = None;
    }
}

/// Step that follows movement `index` at position `step`, after any
/// flow-control rule for it. Decision points consume the demand latch.
fn next_step<S, E>(
    store: &mut S,
    cursor: &Cursor,
    index: u8,
    step: usize,
    demands: &DemandLatch,
    sink: &mut E,
) -> usize
where
    S: NvStore + ?Sized,
    E: EventSink + ?Sized,
{
    let sequential = (step + 1) % cursor.step_count;
    if cursor.sequence.kind() != SequenceKind::Demand {
        return sequential;
    }
    let Some(rule) = store::find_flow_rule(store, cursor.sequence_id, index) else {
        return sequential;
    };
    match rule.action() {
        Some(FlowAction::Goto) => usize::from(rule.destination),
        Some(FlowAction::DecisionPoint) => {
            let taken = demands.any_in(rule.demand_mask);
            demands.clear_all();
            sink.record(ControllerEvent::DecisionPoint {
                movement: index,
                taken,
            });
            if taken {
                usize::from(rule.destination)
            } else {
                sequential
            }
        }
        None => sequential,
    }
}

fn movement_zero_frame<S: NvStore + ?Sized>(store: &mut S) -> PortFrame {
    match read_record::<Movement, S>(store, 0) {
        Ok(movement) if movement.is_valid() => movement.ports,
        _ => PortFrame::ALL_RED,
    }
}

impl<O, P> PlanExecutor for SequenceEngine<O, P>
where
    O: SignalOutputs,
    P: Pacer,
{
    fn start_plan<S, E>(&mut self, store: &mut S, change: PlanChange, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        self.start(store, change, sink);
    }

    fn request_plan_change<E: EventSink + ?Sized>(&mut self, change: PlanChange, sink: &mut E) {
        SequenceEngine::request_plan_change(self, change, sink);
    }

    fn stop<E: EventSink + ?Sized>(&mut self, sink: &mut E) {
        SequenceEngine::stop(self, sink);
    }

    fn enter_fallback<E: EventSink + ?Sized>(&mut self, reason: FallbackReason, sink: &mut E) {
        SequenceEngine::enter_fallback(self, reason, sink);
    }

    fn cancel_plan_change(&mut self) {
        self.mailbox.clear();
    }

    fn running_change(&self) -> Option<PlanChange> {
        SequenceEngine::running_change(self)
    }

    fn pending_change(&self) -> Option<PlanChange> {
        SequenceEngine::pending_change(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RamStore, write_record};
    use crate::telemetry::NullSink;

    #[derive(Default)]
    struct LastFrame(Option<PortFrame>);

    impl SignalOutputs for LastFrame {
        fn apply(&mut self, frame: &PortFrame) {
            self.0 = Some(*frame);
        }
    }

    #[derive(Default)]
    struct NoWait(u32);

    impl Pacer for NoWait {
        fn pause_ms(&mut self, millis: u32) {
            self.0 += millis;
        }
    }

    fn engine() -> SequenceEngine<LastFrame, NoWait> {
        SequenceEngine::new(LastFrame::default(), NoWait::default(), EngineConfig::default())
    }

    #[test]
    fn starts_in_fallback_with_outputs_off() {
        let engine = engine();
        assert_eq!(engine.state(), EngineState::Fallback);
        assert_eq!(engine.outputs().0, Some(PortFrame::OFF));
    }

    #[test]
    fn ceremony_waits_one_second_per_flash() {
        let mut store = RamStore::<{ store::layout::STORE_SIZE }>::new();
        let mut engine = engine();
        engine.run_startup_ceremony(&mut store);
        assert_eq!(engine.pacer_mut().0, (5 + 3 + 3) * 1000);
        assert_eq!(engine.outputs().0, Some(PortFrame::OFF));
    }

    #[test]
    fn empty_movement_falls_back() {
        let mut store = RamStore::<{ store::layout::STORE_SIZE }>::new();
        let sequence = Sequence::new(SequenceKind::Automatic, 0, &[3]).expect("sequence");
        write_record(&mut store, 0, &sequence).expect("write sequence");
        let mut engine = engine();
        let demands = DemandLatch::new();

        engine.start(&mut store, PlanChange::new(0, 0, Some(0)), &mut NullSink);
        assert_eq!(engine.state(), EngineState::RunningSequence);
        engine.run(&mut store, &demands, TickSnapshot::HALF, &mut NullSink);
        assert_eq!(engine.state(), EngineState::Fallback);
        assert_eq!(engine.fallback_reason(), Some(FallbackReason::EmptyMovement));
    }

    #[test]
    fn manual_flash_ignores_other_commands() {
        let mut store = RamStore::<{ store::layout::STORE_SIZE }>::new();
        let mut engine = engine();
        engine.enter_manual_flash(&mut store, &mut NullSink);
        assert_eq!(engine.outputs().0, Some(PortFrame::ALL_RED));

        engine.stop(&mut NullSink);
        engine.enter_fallback(FallbackReason::Commanded, &mut NullSink);
        engine.start(&mut store, PlanChange::new(0, 0, None), &mut NullSink);
        assert_eq!(engine.state(), EngineState::ManualFlash);
    }
}
