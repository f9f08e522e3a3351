//! Main-loop glue shared between the firmware and the emulator.
//!
//! [`Controller`] owns the engine and the scheduler and runs them in the
//! order the hardware loop needs: boot once, then on every iteration feed
//! the maintenance switch, handle queued command frames, let the scheduler
//! look at the clock on one-second ticks and finally advance the engine.
//! Everything else (timers, UART, GPIO) stays with the caller.

use crate::clock::{Clock, ClockError, ClockGuard};
use crate::engine::{EngineConfig, EngineState, Pacer, SequenceEngine, SignalOutputs};
use crate::inputs::{DemandLatch, SwitchAction, TickSnapshot};
use crate::protocol::{CommandContext, Frame, FrameSink, NackCode, dispatch};
use crate::scheduler::{Decision, PlanScheduler, TickOutcome};
use crate::store::{self, NvStore, StoreStatus};
use crate::telemetry::{ControllerEvent, EventSink, FallbackReason};

/// What happened during [`Controller::boot`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootReport {
    pub store: StoreStatus,
    /// Scheduler decision, or the clock error that prevented one.
    pub decision: Result<Decision, ClockError>,
}

/// Engine plus scheduler, driven one main-loop iteration at a time.
pub struct Controller<O, P> {
    engine: SequenceEngine<O, P>,
    scheduler: PlanScheduler,
    halted: bool,
    store_fault: bool,
}

impl<O, P> Controller<O, P>
where
    O: SignalOutputs,
    P: Pacer,
{
    #[must_use]
    pub fn new(outputs: O, pacer: P, config: EngineConfig) -> Self {
        Self {
            engine: SequenceEngine::new(outputs, pacer, config),
            scheduler: PlanScheduler::new(),
            halted: false,
            store_fault: false,
        }
    }

    #[must_use]
    pub const fn engine(&self) -> &SequenceEngine<O, P> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SequenceEngine<O, P> {
        &mut self.engine
    }

    #[must_use]
    pub const fn scheduler(&self) -> &PlanScheduler {
        &self.scheduler
    }

    /// Set once the maintenance switch has been released after manual
    /// flash. The caller must stop feeding the watchdog.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Lamp test, store initialisation and the first scheduling decision.
    pub fn boot<S, C, E>(
        &mut self,
        store: &mut S,
        clock: &mut C,
        guard: &ClockGuard,
        sink: &mut E,
    ) -> BootReport
    where
        S: NvStore + ?Sized,
        C: Clock + ?Sized,
        E: EventSink + ?Sized,
    {
        self.engine.run_startup_ceremony(store);
        let status = store::ensure_initialized(store);
        sink.record(ControllerEvent::StoreInitialized(status));

        let decision = self.reschedule(store, clock, guard, sink);
        BootReport {
            store: status,
            decision,
        }
    }

    /// Boot path for a store whose backing memory could not be read.
    ///
    /// Nothing is seeded or scheduled. The engine flashes red and command
    /// frames are refused until the next reset. The caller must not persist
    /// `store`.
    pub fn boot_without_store<S, E>(&mut self, store: &mut S, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        self.store_fault = true;
        self.engine.run_startup_ceremony(store);
        self.engine.enter_fallback(FallbackReason::StoreUnavailable, sink);
    }

    /// Set by [`Controller::boot_without_store`].
    #[must_use]
    pub const fn has_store_fault(&self) -> bool {
        self.store_fault
    }

    /// Applies a debounced maintenance-switch transition.
    pub fn on_switch<S, E>(&mut self, action: SwitchAction, store: &mut S, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized,
    {
        match action {
            SwitchAction::EngageManualFlash => self.engine.enter_manual_flash(store, sink),
            SwitchAction::Halt => self.halted = true,
        }
    }

    /// Handles one command frame. Frames are ignored during manual flash.
    ///
    /// Returns `true` when the frame was dispatched.
    pub fn handle_frame<S, C, F, E>(
        &mut self,
        frame: &Frame,
        store: &mut S,
        clock: &mut C,
        guard: &ClockGuard,
        out: &mut F,
        sink: &mut E,
    ) -> bool
    where
        S: NvStore + ?Sized,
        C: Clock + ?Sized,
        F: FrameSink + ?Sized,
        E: EventSink + ?Sized,
    {
        if self.engine.state() == EngineState::ManualFlash {
            return false;
        }
        if self.store_fault {
            let code = NackCode::ExecutionFailed;
            out.send(&Frame::nack(frame.command, code));
            sink.record(ControllerEvent::CommandRejected {
                command: frame.command,
                code: code.to_raw(),
            });
            return true;
        }
        let mut ctx = CommandContext {
            store,
            clock,
            guard,
            scheduler: &mut self.scheduler,
            executor: &mut self.engine,
        };
        dispatch(frame, &mut ctx, out, sink);
        true
    }

    /// One main-loop iteration for an already snapshotted set of ticks.
    ///
    /// Returns the scheduler outcome when a one-second tick made it run.
    pub fn step<S, C, E>(
        &mut self,
        store: &mut S,
        clock: &mut C,
        guard: &ClockGuard,
        demands: &DemandLatch,
        ticks: TickSnapshot,
        sink: &mut E,
    ) -> Option<TickOutcome>
    where
        S: NvStore + ?Sized,
        C: Clock + ?Sized,
        E: EventSink + ?Sized,
    {
        let mut outcome = None;
        if ticks.one_second
            && !self.store_fault
            && self.engine.state() != EngineState::ManualFlash
        {
            outcome = Some(
                self.scheduler
                    .tick(store, clock, guard, &mut self.engine, sink),
            );
        }
        self.engine.run(store, demands, ticks, sink);
        outcome
    }

    /// Reloads the plan table and starts the winning plan immediately.
    ///
    /// Falls back when no plan ended up running.
    ///
    /// # Errors
    ///
    /// Returns the clock error when the time could not be read.
    pub fn reschedule<S, C, E>(
        &mut self,
        store: &mut S,
        clock: &mut C,
        guard: &ClockGuard,
        sink: &mut E,
    ) -> Result<Decision, ClockError>
    where
        S: NvStore + ?Sized,
        C: Clock + ?Sized,
        E: EventSink + ?Sized,
    {
        let decision = self
            .scheduler
            .init(store, clock, guard, &mut self.engine, sink);
        if self.engine.running_change().is_none() && self.engine.state() != EngineState::Fallback
        {
            self.engine.enter_fallback(FallbackReason::Commanded, sink);
        }
        decision
    }
}
