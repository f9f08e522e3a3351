//! Persisted record types and their byte codecs.
//!
//! Fields are stored as plain bytes with `0xFF` meaning "never written". The
//! codecs are deliberately lossless for every valid record so a record read
//! back from the store matches what was written.

use core::fmt;

use crate::calendar::DayType;
use crate::store::layout::{
    self, FLOW_RULES, HOLIDAYS, INTERMITTENCE_RULES, MOVEMENTS, PLANS, SEQUENCES, Table, TableId,
};

/// Erased byte value of the backing store.
pub const EMPTY: u8 = 0xFF;

pub const MAIN_PORTS: usize = 3;
pub const AUX_PORTS: usize = 2;
pub const DURATION_PROFILES: usize = 5;
pub const MAX_SEQUENCE_STEPS: usize = 12;

/// Pins that exist on the two auxiliary ports; other bits are dropped on write.
pub const AUX_VALID_PINS: [u8; AUX_PORTS] = [0x1B, 0x1E];

/// Largest record size across every table.
pub const MAX_RECORD_SIZE: usize = 15;

/// A fixed-size record stored in one of the [`layout`] tables.
pub trait Record: Sized {
    const TABLE: Table;

    /// Builds the record from exactly `TABLE.record_size` bytes.
    fn decode(bytes: &[u8]) -> Self;

    /// Writes exactly `TABLE.record_size` bytes into `out`.
    fn encode(&self, out: &mut [u8]);
}

/// Values of the five output ports: three main groups plus two auxiliary ports.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortFrame {
    pub main: [u8; MAIN_PORTS],
    pub aux: [u8; AUX_PORTS],
}

impl PortFrame {
    /// Every lamp dark.
    pub const OFF: Self = Self::new([0x00; MAIN_PORTS], [0x00; AUX_PORTS]);
    /// Red lamps of every approach.
    pub const ALL_RED: Self = Self::new([0x92, 0x49, 0x24], [0x12, 0x14]);
    /// Amber lamps of every approach.
    pub const ALL_AMBER: Self = Self::new([0x49, 0x24, 0x92], [0x00, 0x00]);

    #[must_use]
    pub const fn new(main: [u8; MAIN_PORTS], aux: [u8; AUX_PORTS]) -> Self {
        Self { main, aux }
    }

    /// Applies a blink mask to the main ports for the given phase.
    ///
    /// Masked bits are forced on during the on phase and off during the off
    /// phase; unmasked bits and the auxiliary ports are left untouched.
    #[must_use]
    pub fn with_blink(self, mask: [u8; MAIN_PORTS], on: bool) -> Self {
        let mut frame = self;
        for (port, bits) in frame.main.iter_mut().zip(mask) {
            *port = if on { *port | bits } else { *port & !bits };
        }
        frame
    }

    /// Port values in wire order: three main ports then the auxiliary pair.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; MAIN_PORTS + AUX_PORTS] {
        [
            self.main[0],
            self.main[1],
            self.main[2],
            self.aux[0],
            self.aux[1],
        ]
    }
}

/// One light pattern plus its five duration profiles (seconds).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Movement {
    pub ports: PortFrame,
    pub durations: [u8; DURATION_PROFILES],
}

impl Movement {
    pub const EMPTY: Self = Self {
        ports: PortFrame::new([EMPTY; MAIN_PORTS], [EMPTY; AUX_PORTS]),
        durations: [EMPTY; DURATION_PROFILES],
    };

    /// Movement 0 written when the store is seeded.
    pub const FACTORY_DEFAULT: Self = Self {
        ports: PortFrame::new([0x92, 0x49, 0x24], [0x00, 0x00]),
        durations: [1, 2, 3, 4, 5],
    };

    #[must_use]
    pub const fn new(ports: PortFrame, durations: [u8; DURATION_PROFILES]) -> Self {
        Self { ports, durations }
    }

    /// A movement is invalid only when every byte still reads erased.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.ports
            .to_bytes()
            .iter()
            .chain(self.durations.iter())
            .any(|byte| *byte != EMPTY)
    }

    /// Seconds to hold this movement under the given duration selector.
    ///
    /// Unknown selectors and stored zeroes both yield one second.
    #[must_use]
    pub fn duration_secs(&self, selector: u8) -> u16 {
        let raw = self
            .durations
            .get(usize::from(selector))
            .copied()
            .unwrap_or(1);
        u16::from(raw.max(1))
    }
}

impl Record for Movement {
    const TABLE: Table = MOVEMENTS;

    fn decode(bytes: &[u8]) -> Self {
        let mut movement = Self::EMPTY;
        movement.ports.main.copy_from_slice(&bytes[..MAIN_PORTS]);
        movement
            .ports
            .aux
            .copy_from_slice(&bytes[MAIN_PORTS..MAIN_PORTS + AUX_PORTS]);
        movement
            .durations
            .copy_from_slice(&bytes[MAIN_PORTS + AUX_PORTS..Self::TABLE.record_size]);
        movement
    }

    fn encode(&self, out: &mut [u8]) {
        out[..MAIN_PORTS].copy_from_slice(&self.ports.main);
        for (slot, (value, valid)) in out[MAIN_PORTS..MAIN_PORTS + AUX_PORTS]
            .iter_mut()
            .zip(self.ports.aux.iter().zip(AUX_VALID_PINS))
        {
            *slot = value & valid;
        }
        out[MAIN_PORTS + AUX_PORTS..Self::TABLE.record_size].copy_from_slice(&self.durations);
    }
}

/// How a sequence picks its next step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequenceKind {
    /// Steps advance in order and wrap.
    Automatic,
    /// Flow-control rules may redirect the next step.
    Demand,
}

impl SequenceKind {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            SequenceKind::Automatic => 0,
            SequenceKind::Demand => 1,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SequenceKind::Automatic),
            1 => Some(SequenceKind::Demand),
            _ => None,
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceKind::Automatic => f.write_str("automatic"),
            SequenceKind::Demand => f.write_str("demand"),
        }
    }
}

/// Ordered list of movement indices with an anchor step for plan changes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sequence {
    /// Raw type tag; see [`Sequence::kind`].
    pub kind: u8,
    pub anchor: u8,
    pub count: u8,
    pub steps: [u8; MAX_SEQUENCE_STEPS],
}

impl Sequence {
    pub const EMPTY: Self = Self {
        kind: EMPTY,
        anchor: EMPTY,
        count: EMPTY,
        steps: [EMPTY; MAX_SEQUENCE_STEPS],
    };

    /// Sequence 0 written when the store is seeded: Movement 0 on its own.
    pub const FACTORY_DEFAULT: Self = {
        let mut steps = [EMPTY; MAX_SEQUENCE_STEPS];
        steps[0] = 0;
        Self {
            kind: SequenceKind::Automatic.to_raw(),
            anchor: 0,
            count: 1,
            steps,
        }
    };

    /// Builds a sequence from its movement list.
    ///
    /// Returns `None` when the list is empty or longer than
    /// [`MAX_SEQUENCE_STEPS`].
    #[must_use]
    pub fn new(kind: SequenceKind, anchor: u8, movements: &[u8]) -> Option<Self> {
        if movements.is_empty() || movements.len() > MAX_SEQUENCE_STEPS {
            return None;
        }
        let mut steps = [EMPTY; MAX_SEQUENCE_STEPS];
        steps[..movements.len()].copy_from_slice(movements);
        Some(Self {
            kind: kind.to_raw(),
            anchor,
            count: u8::try_from(movements.len()).ok()?,
            steps,
        })
    }

    /// Type tag; unknown tags run as automatic sequences.
    #[must_use]
    pub fn kind(&self) -> SequenceKind {
        SequenceKind::from_raw(self.kind).unwrap_or(SequenceKind::Automatic)
    }

    /// Number of steps, or `None` when the stored count is not usable.
    #[must_use]
    pub fn step_count(&self) -> Option<usize> {
        let count = usize::from(self.count);
        (1..=MAX_SEQUENCE_STEPS).contains(&count).then_some(count)
    }

    /// The populated part of the step list.
    #[must_use]
    pub fn movements(&self) -> Option<&[u8]> {
        self.step_count().map(|count| &self.steps[..count])
    }

    /// Movement index at a step position.
    #[must_use]
    pub fn movement_at(&self, position: usize) -> Option<u8> {
        self.movements()?.get(position).copied()
    }

    /// Step position at which plan changes are applied.
    ///
    /// An anchor outside the step list falls back to the first step so a plan
    /// change can never be postponed forever.
    #[must_use]
    pub fn anchor_position(&self) -> usize {
        let anchor = usize::from(self.anchor);
        match self.step_count() {
            Some(count) if anchor < count => anchor,
            _ => 0,
        }
    }

    /// Checks the step list against the movement table bounds.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Malformed`] when the count, anchor, type tag or
    /// any populated movement index is out of range.
    pub fn validate(&self) -> Result<(), layout::RecordError> {
        let malformed = layout::RecordError::Malformed(TableId::Sequences);
        let movements = self.movements().ok_or(malformed)?;
        if SequenceKind::from_raw(self.kind).is_none() || usize::from(self.anchor) >= movements.len()
        {
            return Err(malformed);
        }
        if movements
            .iter()
            .any(|index| usize::from(*index) >= layout::MAX_MOVEMENTS)
        {
            return Err(malformed);
        }
        Ok(())
    }

    /// Decodes a schema version 1 record: a count followed by 12 indices.
    ///
    /// Legacy sequences carried no type or anchor; they become automatic
    /// sequences anchored at their first step. Unusable counts decode as
    /// [`Sequence::EMPTY`].
    #[must_use]
    pub fn decode_legacy(bytes: &[u8]) -> Self {
        let mut steps = [EMPTY; MAX_SEQUENCE_STEPS];
        steps.copy_from_slice(&bytes[1..=MAX_SEQUENCE_STEPS]);
        let candidate = Self {
            kind: SequenceKind::Automatic.to_raw(),
            anchor: 0,
            count: bytes[0],
            steps,
        };
        if candidate.step_count().is_some() {
            candidate
        } else {
            Self::EMPTY
        }
    }
}

impl Record for Sequence {
    const TABLE: Table = SEQUENCES;

    fn decode(bytes: &[u8]) -> Self {
        let mut steps = [EMPTY; MAX_SEQUENCE_STEPS];
        steps.copy_from_slice(&bytes[3..3 + MAX_SEQUENCE_STEPS]);
        Self {
            kind: bytes[0],
            anchor: bytes[1],
            count: bytes[2],
            steps,
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0] = self.kind;
        out[1] = self.anchor;
        out[2] = self.count;
        out[3..3 + MAX_SEQUENCE_STEPS].copy_from_slice(&self.steps);
    }
}

/// Schedule entry: run a sequence from a start time on matching days.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Plan {
    /// Raw day-type classifier; see [`DayType`].
    pub day_type: u8,
    pub sequence: u8,
    pub selector: u8,
    pub hour: u8,
    pub minute: u8,
}

impl Plan {
    pub const EMPTY: Self = Self {
        day_type: EMPTY,
        sequence: EMPTY,
        selector: EMPTY,
        hour: EMPTY,
        minute: EMPTY,
    };

    #[must_use]
    pub const fn new(day_type: DayType, sequence: u8, selector: u8, hour: u8, minute: u8) -> Self {
        Self {
            day_type: day_type.to_raw(),
            sequence,
            selector,
            hour,
            minute,
        }
    }

    /// Parsed classifier; unknown values never match any day.
    #[must_use]
    pub const fn classifier(&self) -> Option<DayType> {
        DayType::from_raw(self.day_type)
    }

    /// A plan takes part in scheduling only with a recognised classifier.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.classifier().is_some()
    }

    /// Start time as minutes since midnight.
    #[must_use]
    pub fn start_minute(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

impl Record for Plan {
    const TABLE: Table = PLANS;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            day_type: bytes[0],
            sequence: bytes[1],
            selector: bytes[2],
            hour: bytes[3],
            minute: bytes[4],
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[..Self::TABLE.record_size].copy_from_slice(&[
            self.day_type,
            self.sequence,
            self.selector,
            self.hour,
            self.minute,
        ]);
    }
}

/// Calendar date treated as a holiday every year.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Holiday {
    pub day: u8,
    pub month: u8,
}

impl Holiday {
    pub const EMPTY: Self = Self {
        day: EMPTY,
        month: EMPTY,
    };

    #[must_use]
    pub const fn new(day: u8, month: u8) -> Self {
        Self { day, month }
    }

    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.day != EMPTY && self.month != EMPTY
    }

    #[must_use]
    pub const fn matches(&self, day: u8, month: u8) -> bool {
        self.is_set() && self.day == day && self.month == month
    }
}

impl Record for Holiday {
    const TABLE: Table = HOLIDAYS;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            day: bytes[0],
            month: bytes[1],
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0] = self.day;
        out[1] = self.month;
    }
}

/// Blink mask applied to one movement while a given plan runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IntermittenceRule {
    pub plan: u8,
    pub movement: u8,
    pub mask: [u8; MAIN_PORTS],
}

impl IntermittenceRule {
    pub const EMPTY: Self = Self {
        plan: EMPTY,
        movement: EMPTY,
        mask: [EMPTY; MAIN_PORTS],
    };

    #[must_use]
    pub const fn new(plan: u8, movement: u8, mask: [u8; MAIN_PORTS]) -> Self {
        Self {
            plan,
            movement,
            mask,
        }
    }

    #[must_use]
    pub const fn applies_to(&self, plan: u8, movement: u8) -> bool {
        self.plan == plan && self.movement == movement
    }
}

impl Record for IntermittenceRule {
    const TABLE: Table = INTERMITTENCE_RULES;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            plan: bytes[0],
            movement: bytes[1],
            mask: [bytes[2], bytes[3], bytes[4]],
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0] = self.plan;
        out[1] = self.movement;
        out[2..2 + MAIN_PORTS].copy_from_slice(&self.mask);
    }
}

/// Action taken by a flow-control rule.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowAction {
    /// Always jump to the destination step.
    Goto,
    /// Jump only when a masked demand is latched, then clear every demand.
    DecisionPoint,
}

impl FlowAction {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            FlowAction::Goto => 0,
            FlowAction::DecisionPoint => 1,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(FlowAction::Goto),
            1 => Some(FlowAction::DecisionPoint),
            _ => None,
        }
    }
}

/// Redirects a demand sequence after a given movement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlowRule {
    pub sequence: u8,
    /// Movement index the rule is attached to.
    pub origin: u8,
    /// Raw action tag; see [`FlowRule::action`].
    pub action: u8,
    pub demand_mask: u8,
    /// Step position loaded next when the rule fires.
    pub destination: u8,
}

impl FlowRule {
    pub const EMPTY: Self = Self {
        sequence: EMPTY,
        origin: EMPTY,
        action: EMPTY,
        demand_mask: EMPTY,
        destination: EMPTY,
    };

    #[must_use]
    pub const fn new(
        sequence: u8,
        origin: u8,
        action: FlowAction,
        demand_mask: u8,
        destination: u8,
    ) -> Self {
        Self {
            sequence,
            origin,
            action: action.to_raw(),
            demand_mask,
            destination,
        }
    }

    #[must_use]
    pub const fn action(&self) -> Option<FlowAction> {
        FlowAction::from_raw(self.action)
    }

    #[must_use]
    pub const fn applies_to(&self, sequence: u8, movement: u8) -> bool {
        self.sequence == sequence && self.origin == movement
    }
}

impl Record for FlowRule {
    const TABLE: Table = FLOW_RULES;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            sequence: bytes[0],
            origin: bytes[1],
            action: bytes[2],
            demand_mask: bytes[3],
            destination: bytes[4],
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[..5].copy_from_slice(&[
            self.sequence,
            self.origin,
            self.action,
            self.demand_mask,
            self.destination,
        ]);
        out[5] = EMPTY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_movement_is_invalid() {
        assert!(!Movement::EMPTY.is_valid());

        let mut bytes = [EMPTY; 10];
        bytes[9] = 0x00;
        assert!(Movement::decode(&bytes).is_valid());
    }

    #[test]
    fn duration_selector_falls_back_to_one_second() {
        let movement = Movement::new(PortFrame::OFF, [0, 7, 9, 11, 13]);
        assert_eq!(movement.duration_secs(0), 1);
        assert_eq!(movement.duration_secs(1), 7);
        assert_eq!(movement.duration_secs(4), 13);
        assert_eq!(movement.duration_secs(5), 1);
        assert_eq!(movement.duration_secs(EMPTY), 1);
    }

    #[test]
    fn auxiliary_ports_are_masked_on_encode() {
        let movement = Movement::new(PortFrame::new([1, 2, 3], [0xFF, 0xFF]), [1; 5]);
        let mut bytes = [0u8; 10];
        movement.encode(&mut bytes);
        assert_eq!(&bytes[3..5], &[0x1B, 0x1E]);
    }

    #[test]
    fn blink_forces_masked_bits() {
        let frame = PortFrame::new([0b1010_0000, 0x0F, 0x00], [0x12, 0x14]);
        let mask = [0b0000_1010, 0x0F, 0x00];
        assert_eq!(
            frame.with_blink(mask, true),
            PortFrame::new([0b1010_1010, 0x0F, 0x00], [0x12, 0x14])
        );
        assert_eq!(
            frame.with_blink(mask, false),
            PortFrame::new([0b1010_0000, 0x00, 0x00], [0x12, 0x14])
        );
    }

    #[test]
    fn sequence_step_count_is_bounded() {
        let mut sequence = Sequence::EMPTY;
        assert_eq!(sequence.step_count(), None);
        sequence.count = 0;
        assert_eq!(sequence.step_count(), None);
        sequence.count = 13;
        assert_eq!(sequence.step_count(), None);
        sequence.count = 12;
        assert_eq!(sequence.step_count(), Some(12));
    }

    #[test]
    fn anchor_outside_list_resolves_to_first_step() {
        let sequence = Sequence::new(SequenceKind::Automatic, 7, &[1, 2, 3]).expect("sequence");
        assert_eq!(sequence.anchor_position(), 0);
        assert!(sequence.validate().is_err());

        let sequence = Sequence::new(SequenceKind::Automatic, 2, &[1, 2, 3]).expect("sequence");
        assert_eq!(sequence.anchor_position(), 2);
        assert!(sequence.validate().is_ok());
    }

    #[test]
    fn legacy_sequence_becomes_automatic() {
        let mut bytes = [EMPTY; 13];
        bytes[0] = 2;
        bytes[1] = 4;
        bytes[2] = 9;
        let sequence = Sequence::decode_legacy(&bytes);
        assert_eq!(sequence.kind(), SequenceKind::Automatic);
        assert_eq!(sequence.anchor, 0);
        assert_eq!(sequence.movements(), Some(&[4u8, 9][..]));

        assert_eq!(Sequence::decode_legacy(&[EMPTY; 13]), Sequence::EMPTY);
    }

    #[test]
    fn flow_rule_reserved_byte_is_erased() {
        let rule = FlowRule::new(1, 2, FlowAction::DecisionPoint, 0b0100, 5);
        let mut bytes = [0u8; 6];
        rule.encode(&mut bytes);
        assert_eq!(bytes, [1, 2, 1, 0b0100, 5, EMPTY]);
        assert_eq!(FlowRule::decode(&bytes), rule);
    }
}
