//! Command codes, NACK codes and typed request decoding.

use core::fmt;

use crate::calendar::{DateTime, DayType};
use crate::store::layout::{
    MAX_FLOW_RULES, MAX_HOLIDAYS, MAX_INTERMITTENCE_RULES, MAX_MOVEMENTS, MAX_PLANS,
    MAX_SEQUENCES,
};
use crate::store::records::{DURATION_PROFILES, MAX_SEQUENCE_STEPS};
use crate::store::{
    EMPTY, FlowAction, FlowRule, Holiday, IntermittenceRule, Movement, Plan, PortFrame, Sequence,
    SequenceKind,
};

/// Request codes understood by the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandCode {
    SaveControllerId,
    ReadControllerId,
    ReadTime,
    SetTime,
    SaveMovement,
    ReadMovement,
    SaveSequence,
    ReadSequence,
    SavePlan,
    ReadPlan,
    SaveIntermittence,
    ReadIntermittence,
    SaveHoliday,
    ReadHolidays,
    SaveFlowRule,
    ReadFlowRule,
    FactoryReset,
}

impl CommandCode {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            CommandCode::SaveControllerId => 0x10,
            CommandCode::ReadControllerId => 0x11,
            CommandCode::ReadTime => 0x21,
            CommandCode::SetTime => 0x22,
            CommandCode::SaveMovement => 0x23,
            CommandCode::ReadMovement => 0x24,
            CommandCode::SaveSequence => 0x30,
            CommandCode::ReadSequence => 0x31,
            CommandCode::SavePlan => 0x40,
            CommandCode::ReadPlan => 0x41,
            CommandCode::SaveIntermittence => 0x50,
            CommandCode::ReadIntermittence => 0x51,
            CommandCode::SaveHoliday => 0x60,
            CommandCode::ReadHolidays => 0x61,
            CommandCode::SaveFlowRule => 0x70,
            CommandCode::ReadFlowRule => 0x71,
            CommandCode::FactoryReset => 0xF0,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x10 => CommandCode::SaveControllerId,
            0x11 => CommandCode::ReadControllerId,
            0x21 => CommandCode::ReadTime,
            0x22 => CommandCode::SetTime,
            0x23 => CommandCode::SaveMovement,
            0x24 => CommandCode::ReadMovement,
            0x30 => CommandCode::SaveSequence,
            0x31 => CommandCode::ReadSequence,
            0x40 => CommandCode::SavePlan,
            0x41 => CommandCode::ReadPlan,
            0x50 => CommandCode::SaveIntermittence,
            0x51 => CommandCode::ReadIntermittence,
            0x60 => CommandCode::SaveHoliday,
            0x61 => CommandCode::ReadHolidays,
            0x70 => CommandCode::SaveFlowRule,
            0x71 => CommandCode::ReadFlowRule,
            0xF0 => CommandCode::FactoryReset,
            _ => return None,
        })
    }

    /// Exact payload length the request must carry.
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            CommandCode::ReadControllerId
            | CommandCode::ReadTime
            | CommandCode::ReadHolidays
            | CommandCode::FactoryReset => 0,
            CommandCode::SaveControllerId
            | CommandCode::ReadMovement
            | CommandCode::ReadSequence
            | CommandCode::ReadPlan
            | CommandCode::ReadIntermittence
            | CommandCode::ReadFlowRule => 1,
            CommandCode::SaveHoliday => 3,
            CommandCode::SavePlan | CommandCode::SaveIntermittence | CommandCode::SaveFlowRule => {
                6
            }
            CommandCode::SetTime => 7,
            CommandCode::SaveMovement => 11,
            CommandCode::SaveSequence => 4 + MAX_SEQUENCE_STEPS,
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.to_raw())
    }
}

/// Error codes carried in a NACK.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NackCode {
    Checksum,
    UnknownCommand,
    InvalidLength,
    InvalidData,
    ExecutionFailed,
}

impl NackCode {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            NackCode::Checksum => 0x01,
            NackCode::UnknownCommand => 0x02,
            NackCode::InvalidLength => 0x03,
            NackCode::InvalidData => 0x04,
            NackCode::ExecutionFailed => 0x05,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(NackCode::Checksum),
            0x02 => Some(NackCode::UnknownCommand),
            0x03 => Some(NackCode::InvalidLength),
            0x04 => Some(NackCode::InvalidData),
            0x05 => Some(NackCode::ExecutionFailed),
            _ => None,
        }
    }
}

impl fmt::Display for NackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NackCode::Checksum => "checksum",
            NackCode::UnknownCommand => "unknown-command",
            NackCode::InvalidLength => "invalid-length",
            NackCode::InvalidData => "invalid-data",
            NackCode::ExecutionFailed => "execution-failed",
        };
        f.write_str(label)
    }
}

/// A validated request. Slot indices are guaranteed in range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Request {
    SaveControllerId(u8),
    ReadControllerId,
    ReadTime,
    SetTime(DateTime),
    SaveMovement { index: u8, movement: Movement },
    ReadMovement(u8),
    SaveSequence { index: u8, sequence: Sequence },
    ReadSequence(u8),
    SavePlan { index: u8, plan: Plan },
    ReadPlan(u8),
    SaveIntermittence { index: u8, rule: IntermittenceRule },
    ReadIntermittence(u8),
    SaveHoliday { index: u8, holiday: Holiday },
    ReadHolidays,
    SaveFlowRule { index: u8, rule: FlowRule },
    ReadFlowRule(u8),
    FactoryReset,
}

impl Request {
    /// Decodes and validates a request payload.
    ///
    /// # Errors
    ///
    /// Returns the NACK code to answer with: unknown command, wrong payload
    /// length, or field values outside their ranges.
    pub fn decode(command: u8, payload: &[u8]) -> Result<Self, NackCode> {
        let code = CommandCode::from_raw(command).ok_or(NackCode::UnknownCommand)?;
        if payload.len() != code.payload_len() {
            return Err(NackCode::InvalidLength);
        }

        let request = match code {
            CommandCode::SaveControllerId => Request::SaveControllerId(payload[0]),
            CommandCode::ReadControllerId => Request::ReadControllerId,
            CommandCode::ReadTime => Request::ReadTime,
            CommandCode::SetTime => Request::SetTime(decode_time(payload)?),
            CommandCode::SaveMovement => Request::SaveMovement {
                index: slot(payload[0], MAX_MOVEMENTS)?,
                movement: decode_movement(&payload[1..]),
            },
            CommandCode::ReadMovement => Request::ReadMovement(slot(payload[0], MAX_MOVEMENTS)?),
            CommandCode::SaveSequence => Request::SaveSequence {
                index: slot(payload[0], MAX_SEQUENCES)?,
                sequence: decode_sequence(&payload[1..])?,
            },
            CommandCode::ReadSequence => Request::ReadSequence(slot(payload[0], MAX_SEQUENCES)?),
            CommandCode::SavePlan => Request::SavePlan {
                index: slot(payload[0], MAX_PLANS)?,
                plan: decode_plan(&payload[1..])?,
            },
            CommandCode::ReadPlan => Request::ReadPlan(slot(payload[0], MAX_PLANS)?),
            CommandCode::SaveIntermittence => Request::SaveIntermittence {
                index: slot(payload[0], MAX_INTERMITTENCE_RULES)?,
                rule: decode_intermittence(&payload[1..])?,
            },
            CommandCode::ReadIntermittence => {
                Request::ReadIntermittence(slot(payload[0], MAX_INTERMITTENCE_RULES)?)
            }
            CommandCode::SaveHoliday => Request::SaveHoliday {
                index: slot(payload[0], MAX_HOLIDAYS)?,
                holiday: decode_holiday(&payload[1..])?,
            },
            CommandCode::ReadHolidays => Request::ReadHolidays,
            CommandCode::SaveFlowRule => Request::SaveFlowRule {
                index: slot(payload[0], MAX_FLOW_RULES)?,
                rule: decode_flow_rule(&payload[1..])?,
            },
            CommandCode::ReadFlowRule => Request::ReadFlowRule(slot(payload[0], MAX_FLOW_RULES)?),
            CommandCode::FactoryReset => Request::FactoryReset,
        };
        Ok(request)
    }

    #[must_use]
    pub const fn code(&self) -> CommandCode {
        match self {
            Request::SaveControllerId(_) => CommandCode::SaveControllerId,
            Request::ReadControllerId => CommandCode::ReadControllerId,
            Request::ReadTime => CommandCode::ReadTime,
            Request::SetTime(_) => CommandCode::SetTime,
            Request::SaveMovement { .. } => CommandCode::SaveMovement,
            Request::ReadMovement(_) => CommandCode::ReadMovement,
            Request::SaveSequence { .. } => CommandCode::SaveSequence,
            Request::ReadSequence(_) => CommandCode::ReadSequence,
            Request::SavePlan { .. } => CommandCode::SavePlan,
            Request::ReadPlan(_) => CommandCode::ReadPlan,
            Request::SaveIntermittence { .. } => CommandCode::SaveIntermittence,
            Request::ReadIntermittence(_) => CommandCode::ReadIntermittence,
            Request::SaveHoliday { .. } => CommandCode::SaveHoliday,
            Request::ReadHolidays => CommandCode::ReadHolidays,
            Request::SaveFlowRule { .. } => CommandCode::SaveFlowRule,
            Request::ReadFlowRule(_) => CommandCode::ReadFlowRule,
            Request::FactoryReset => CommandCode::FactoryReset,
        }
    }
}

fn slot(raw: u8, slots: usize) -> Result<u8, NackCode> {
    if usize::from(raw) < slots {
        Ok(raw)
    } else {
        Err(NackCode::InvalidData)
    }
}

fn check(valid: bool) -> Result<(), NackCode> {
    if valid {
        Ok(())
    } else {
        Err(NackCode::InvalidData)
    }
}

fn decode_time(bytes: &[u8]) -> Result<DateTime, NackCode> {
    let time = DateTime::new(
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6],
    );
    check(time.is_valid())?;
    Ok(time)
}

fn decode_movement(bytes: &[u8]) -> Movement {
    let mut durations = [0; DURATION_PROFILES];
    durations.copy_from_slice(&bytes[5..5 + DURATION_PROFILES]);
    Movement::new(
        PortFrame::new([bytes[0], bytes[1], bytes[2]], [bytes[3], bytes[4]]),
        durations,
    )
}

fn decode_sequence(bytes: &[u8]) -> Result<Sequence, NackCode> {
    let kind = SequenceKind::from_raw(bytes[0]).ok_or(NackCode::InvalidData)?;
    let count = usize::from(bytes[2]);
    check((1..=MAX_SEQUENCE_STEPS).contains(&count))?;
    let sequence =
        Sequence::new(kind, bytes[1], &bytes[3..3 + count]).ok_or(NackCode::InvalidData)?;
    sequence.validate().map_err(|_| NackCode::InvalidData)?;
    Ok(sequence)
}

fn decode_plan(bytes: &[u8]) -> Result<Plan, NackCode> {
    let plan = Plan {
        day_type: bytes[0],
        sequence: bytes[1],
        selector: bytes[2],
        hour: bytes[3],
        minute: bytes[4],
    };
    if plan == Plan::EMPTY {
        return Ok(plan);
    }
    check(
        DayType::from_raw(plan.day_type).is_some()
            && usize::from(plan.sequence) < MAX_SEQUENCES
            && usize::from(plan.selector) < DURATION_PROFILES
            && plan.hour < 24
            && plan.minute < 60,
    )?;
    Ok(plan)
}

fn decode_intermittence(bytes: &[u8]) -> Result<IntermittenceRule, NackCode> {
    let rule = IntermittenceRule::new(bytes[0], bytes[1], [bytes[2], bytes[3], bytes[4]]);
    if rule.plan == EMPTY && rule.movement == EMPTY {
        return Ok(IntermittenceRule::EMPTY);
    }
    check(usize::from(rule.plan) < MAX_PLANS && usize::from(rule.movement) < MAX_MOVEMENTS)?;
    Ok(rule)
}

fn decode_holiday(bytes: &[u8]) -> Result<Holiday, NackCode> {
    let holiday = Holiday::new(bytes[0], bytes[1]);
    if holiday == Holiday::EMPTY {
        return Ok(holiday);
    }
    check((1..=31).contains(&holiday.day) && (1..=12).contains(&holiday.month))?;
    Ok(holiday)
}

fn decode_flow_rule(bytes: &[u8]) -> Result<FlowRule, NackCode> {
    let rule = FlowRule {
        sequence: bytes[0],
        origin: bytes[1],
        action: bytes[2],
        demand_mask: bytes[3],
        destination: bytes[4],
    };
    if rule == FlowRule::EMPTY {
        return Ok(rule);
    }
    check(
        usize::from(rule.sequence) < MAX_SEQUENCES
            && usize::from(rule.origin) < MAX_MOVEMENTS
            && FlowAction::from_raw(rule.action).is_some()
            && usize::from(rule.destination) < MAX_SEQUENCE_STEPS,
    )?;
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_and_bad_length() {
        assert_eq!(Request::decode(0x99, &[]), Err(NackCode::UnknownCommand));
        assert_eq!(Request::decode(0x10, &[]), Err(NackCode::InvalidLength));
        assert_eq!(Request::decode(0x11, &[1]), Err(NackCode::InvalidLength));
    }

    #[test]
    fn command_codes_round_trip() {
        for raw in 0..=u8::MAX {
            if let Some(code) = CommandCode::from_raw(raw) {
                assert_eq!(code.to_raw(), raw);
            }
        }
    }

    #[test]
    fn sequence_payload_is_validated() {
        let mut payload = [EMPTY; 16];
        payload[0] = 2;
        payload[1] = 1;
        payload[2] = 1;
        payload[3] = 3;
        payload[4..7].copy_from_slice(&[4, 5, 6]);
        let request = Request::decode(0x30, &payload).expect("valid sequence");
        let Request::SaveSequence { index, sequence } = request else {
            panic!("unexpected request: {request:?}");
        };
        assert_eq!(index, 2);
        assert_eq!(sequence.kind(), SequenceKind::Demand);
        assert_eq!(sequence.movements(), Some(&[4u8, 5, 6][..]));

        payload[2] = 3;
        assert_eq!(Request::decode(0x30, &payload), Err(NackCode::InvalidData));
        payload[2] = 1;
        payload[5] = 60;
        assert_eq!(Request::decode(0x30, &payload), Err(NackCode::InvalidData));
    }

    #[test]
    fn plan_slot_can_be_cleared() {
        assert_eq!(
            Request::decode(0x40, &[4, EMPTY, EMPTY, EMPTY, EMPTY, EMPTY]),
            Ok(Request::SavePlan {
                index: 4,
                plan: Plan::EMPTY
            })
        );
        assert_eq!(
            Request::decode(0x40, &[4, 15, 0, 0, 6, 0]),
            Err(NackCode::InvalidData)
        );
        assert_eq!(
            Request::decode(0x40, &[20, 7, 0, 0, 6, 0]),
            Err(NackCode::InvalidData)
        );
    }

    #[test]
    fn set_time_requires_calendar_values() {
        assert!(Request::decode(0x22, &[12, 30, 0, 15, 6, 25, 7]).is_ok());
        assert_eq!(
            Request::decode(0x22, &[12, 30, 0, 31, 6, 25, 7]),
            Err(NackCode::InvalidData)
        );
    }
}
