//! Controller event catalog and the fixed-size telemetry ring.
//!
//! The scheduler, engine and command dispatcher report what they do through
//! the [`EventSink`] trait. Targets keep a [`TelemetryRecorder`] and hand the
//! core a timestamped view of it ([`TelemetryRecorder::at`]) each loop; the
//! firmware drains the ring over defmt and the emulator prints it.

use core::{fmt, time::Duration};

use heapless::HistoryBuf;

use crate::store::StoreStatus;

/// Monotonic identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Why the engine fell back to flashing red.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FallbackReason {
    /// The plan table is empty.
    NoConfiguration,
    /// A plan referenced a sequence slot that does not exist.
    MissingSequence,
    /// The sequence record has an unusable step count.
    MalformedSequence,
    /// A flow rule sent the sequence to a step it does not have.
    StepOutOfRange,
    /// A step referenced a movement slot that does not exist.
    MovementOutOfRange,
    /// A step referenced a movement that was never written.
    EmptyMovement,
    /// Requested explicitly (boot, factory reset).
    Commanded,
    /// The configuration store could not be read at boot.
    StoreUnavailable,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FallbackReason::NoConfiguration => "no-configuration",
            FallbackReason::MissingSequence => "missing-sequence",
            FallbackReason::MalformedSequence => "malformed-sequence",
            FallbackReason::StepOutOfRange => "step-out-of-range",
            FallbackReason::MovementOutOfRange => "movement-out-of-range",
            FallbackReason::EmptyMovement => "empty-movement",
            FallbackReason::Commanded => "commanded",
            FallbackReason::StoreUnavailable => "store-unavailable",
        };
        f.write_str(label)
    }
}

/// Discriminated controller events shared across all targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerEvent {
    /// The scheduler picked a new winning plan.
    PlanSelected { plan: u8 },
    /// A plan change is waiting for the running sequence to reach its anchor.
    PlanChangeDeferred { plan: Option<u8> },
    /// A sequence started running.
    PlanChangeApplied { plan: Option<u8>, sequence: u8 },
    EngineStopped,
    FallbackEntered(FallbackReason),
    ManualFlashEngaged,
    /// A decision-point rule was evaluated; demands were cleared.
    DecisionPoint { movement: u8, taken: bool },
    /// A clock read was skipped because another task held the guard.
    ClockBusy,
    /// The clock could not be read.
    ClockFault,
    StoreInitialized(StoreStatus),
    CommandAccepted { command: u8 },
    CommandRejected { command: u8, code: u8 },
}

impl fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerEvent::PlanSelected { plan } => write!(f, "plan-selected {plan}"),
            ControllerEvent::PlanChangeDeferred { plan } => {
                f.write_str("plan-change-deferred ")?;
                write_plan(f, *plan)
            }
            ControllerEvent::PlanChangeApplied { plan, sequence } => {
                f.write_str("plan-change-applied ")?;
                write_plan(f, *plan)?;
                write!(f, " sequence {sequence}")
            }
            ControllerEvent::EngineStopped => f.write_str("engine-stopped"),
            ControllerEvent::FallbackEntered(reason) => write!(f, "fallback {reason}"),
            ControllerEvent::ManualFlashEngaged => f.write_str("manual-flash"),
            ControllerEvent::DecisionPoint { movement, taken } => {
                write!(f, "decision-point movement {movement} taken={taken}")
            }
            ControllerEvent::ClockBusy => f.write_str("clock-busy"),
            ControllerEvent::ClockFault => f.write_str("clock-fault"),
            ControllerEvent::StoreInitialized(status) => write!(f, "store {status}"),
            ControllerEvent::CommandAccepted { command } => {
                write!(f, "command 0x{command:02X} accepted")
            }
            ControllerEvent::CommandRejected { command, code } => {
                write!(f, "command 0x{command:02X} rejected code 0x{code:02X}")
            }
        }
    }
}

fn write_plan(f: &mut fmt::Formatter<'_>, plan: Option<u8>) -> fmt::Result {
    match plan {
        Some(plan) => write!(f, "plan {plan}"),
        None => f.write_str("unscheduled"),
    }
}

/// Destination for controller events.
pub trait EventSink {
    fn record(&mut self, event: ControllerEvent);
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn record(&mut self, event: ControllerEvent) {
        (**self).record(event);
    }
}

/// Sink that drops every event.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&mut self, _event: ControllerEvent) {}
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: ControllerEvent,
    /// Time since the previous record, if any.
    pub since_previous: Option<Duration>,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records controller events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Records an event observed at `timestamp`.
    pub fn record(&mut self, event: ControllerEvent, timestamp: TInstant) -> EventId {
        let since_previous = self
            .ring
            .recent()
            .map(|previous| timestamp.saturating_duration_since(previous.timestamp));
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            since_previous,
        });
        id
    }

    /// Borrows the recorder as an [`EventSink`] stamping every event with `timestamp`.
    pub fn at(&mut self, timestamp: TInstant) -> StampedSink<'_, TInstant, CAPACITY> {
        StampedSink {
            recorder: self,
            timestamp,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<TInstant>> + '_ {
        self.ring.oldest_ordered()
    }

    /// Records with an id at or after `cursor`, oldest first.
    pub fn since(
        &self,
        cursor: EventId,
    ) -> impl Iterator<Item = &TelemetryRecord<TInstant>> + '_ {
        self.oldest_first().filter(move |record| record.id >= cursor)
    }

    /// Id the next recorded event will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

/// [`EventSink`] view of a recorder with a fixed timestamp.
pub struct StampedSink<'a, TInstant, const CAPACITY: usize>
where
    TInstant: Copy,
{
    recorder: &'a mut TelemetryRecorder<TInstant, CAPACITY>,
    timestamp: TInstant,
}

impl<TInstant, const CAPACITY: usize> EventSink for StampedSink<'_, TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn record(&mut self, event: ControllerEvent) {
        self.recorder.record(event, self.timestamp);
    }
}
