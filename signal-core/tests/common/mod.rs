#![allow(dead_code)]

use signal_core::calendar::{DateTime, SUNDAY, days_in_month};
use signal_core::clock::{Clock, ClockError, ClockGuard};
use signal_core::controller::Controller;
use signal_core::engine::{EngineConfig, Pacer, SignalOutputs};
use signal_core::inputs::{DemandLatch, TickDivider, TickFlags};
use signal_core::protocol::{Frame, FrameSink};
use signal_core::store::{PortFrame, RamStore, Record, write_record};
use signal_core::telemetry::{ControllerEvent, EventSink};

/// Clock that only moves when told to.
pub struct MockClock {
    pub now: DateTime,
    pub fault: Option<ClockError>,
}

impl MockClock {
    pub fn at(now: DateTime) -> Self {
        Self { now, fault: None }
    }

    /// Advances one second, rolling minutes, hours, days, months and years.
    pub fn advance_second(&mut self) {
        let now = &mut self.now;
        now.second += 1;
        if now.second < 60 {
            return;
        }
        now.second = 0;
        now.minute += 1;
        if now.minute < 60 {
            return;
        }
        now.minute = 0;
        now.hour += 1;
        if now.hour < 24 {
            return;
        }
        now.hour = 0;
        now.weekday = if now.weekday == SUNDAY { 1 } else { now.weekday + 1 };
        now.day += 1;
        if now.day <= days_in_month(now.month, now.year) {
            return;
        }
        now.day = 1;
        now.month += 1;
        if now.month <= 12 {
            return;
        }
        now.month = 1;
        now.year = (now.year + 1) % 100;
    }
}

impl Clock for MockClock {
    fn now(&mut self) -> Result<DateTime, ClockError> {
        match self.fault {
            Some(error) => Err(error),
            None => Ok(self.now),
        }
    }

    fn set(&mut self, value: &DateTime) -> Result<(), ClockError> {
        self.now = *value;
        Ok(())
    }
}

/// Remembers every frame written to the ports.
#[derive(Default)]
pub struct RecordingOutputs {
    pub frames: Vec<PortFrame>,
}

impl RecordingOutputs {
    pub fn last(&self) -> PortFrame {
        self.frames.last().copied().unwrap_or(PortFrame::OFF)
    }
}

impl SignalOutputs for RecordingOutputs {
    fn apply(&mut self, frame: &PortFrame) {
        self.frames.push(*frame);
    }
}

/// Counts blocking pauses instead of sleeping.
#[derive(Default)]
pub struct CountingPacer {
    pub pauses: usize,
    pub total_ms: u64,
}

impl Pacer for CountingPacer {
    fn pause_ms(&mut self, millis: u32) {
        self.pauses += 1;
        self.total_ms += u64::from(millis);
    }
}

#[derive(Default)]
pub struct EventLog(pub Vec<ControllerEvent>);

impl EventLog {
    pub fn contains(&self, event: &ControllerEvent) -> bool {
        self.0.contains(event)
    }
}

impl EventSink for EventLog {
    fn record(&mut self, event: ControllerEvent) {
        self.0.push(event);
    }
}

#[derive(Default)]
pub struct SentFrames(pub Vec<Frame>);

impl FrameSink for SentFrames {
    fn send(&mut self, frame: &Frame) {
        self.0.push(frame.clone());
    }
}

/// A complete controller wired to in-memory peripherals.
pub struct Rig {
    pub store: RamStore,
    pub clock: MockClock,
    pub guard: ClockGuard,
    pub demands: DemandLatch,
    pub flags: TickFlags,
    pub divider: TickDivider,
    pub controller: Controller<RecordingOutputs, CountingPacer>,
    pub events: EventLog,
}

impl Rig {
    pub fn new(now: DateTime) -> Self {
        Self {
            store: RamStore::new(),
            clock: MockClock::at(now),
            guard: ClockGuard::new(),
            demands: DemandLatch::new(),
            flags: TickFlags::new(),
            divider: TickDivider::new(),
            controller: Controller::new(
                RecordingOutputs::default(),
                CountingPacer::default(),
                EngineConfig::default(),
            ),
            events: EventLog::default(),
        }
    }

    pub fn put<T: Record>(&mut self, index: usize, record: &T) {
        write_record(&mut self.store, index, record).expect("record slot");
    }

    pub fn boot(&mut self) {
        self.controller
            .boot(&mut self.store, &mut self.clock, &self.guard, &mut self.events);
    }

    /// One half-second of wall time: the clock moves on every second tick.
    pub fn half_second(&mut self) {
        self.divider.on_half_second(&self.flags);
        let ticks = self.flags.take();
        if ticks.one_second {
            self.clock.advance_second();
        }
        self.controller.step(
            &mut self.store,
            &mut self.clock,
            &self.guard,
            &self.demands,
            ticks,
            &mut self.events,
        );
    }

    pub fn seconds(&mut self, seconds: u32) {
        for _ in 0..seconds * 2 {
            self.half_second();
        }
    }

    pub fn output(&self) -> PortFrame {
        self.controller.engine().outputs().last()
    }

    pub fn current_movement(&self) -> Option<u8> {
        self.controller
            .engine()
            .current_movement()
            .map(|current| current.index)
    }

    pub fn send(&mut self, command: u8, payload: &[u8]) -> Vec<Frame> {
        let frame = Frame::new(command, payload).expect("request frame");
        let mut sent = SentFrames::default();
        self.controller.handle_frame(
            &frame,
            &mut self.store,
            &mut self.clock,
            &self.guard,
            &mut sent,
            &mut self.events,
        );
        sent.0
    }
}

/// A movement that lights only `bits` on the first main port.
pub fn movement(bits: u8, seconds: u8) -> signal_core::store::Movement {
    signal_core::store::Movement::new(PortFrame::new([bits, 0, 0], [0, 0]), [seconds; 5])
}
