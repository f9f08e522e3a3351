//! Simulated peripherals: a clock that only moves when the session advances
//! it, outputs that remember what was driven, and a pacer that turns blocking
//! pauses into virtual time.

use std::time::Duration;

use signal_core::calendar::{DateTime, SUNDAY, days_in_month};
use signal_core::clock::{Clock, ClockError};
use signal_core::engine::{Pacer, SignalOutputs};
use signal_core::store::PortFrame;
use signal_core::telemetry::TelemetryInstant;

/// Virtual milliseconds since the emulator started.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(pub u64);

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

pub struct SimulatedClock {
    now: DateTime,
    /// When set, every access fails with this error.
    pub fault: Option<ClockError>,
}

impl SimulatedClock {
    pub fn new(now: DateTime) -> Self {
        Self { now, fault: None }
    }

    pub fn current(&self) -> DateTime {
        self.now
    }

    /// Moves forward one second, carrying into minutes, hours, days, months
    /// and two-digit years.
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

impl Clock for SimulatedClock {
    fn now(&mut self) -> Result<DateTime, ClockError> {
        self.fault.map_or(Ok(self.now), Err)
    }

    fn set(&mut self, value: &DateTime) -> Result<(), ClockError> {
        if let Some(error) = self.fault {
            return Err(error);
        }
        if !value.is_valid() {
            return Err(ClockError::InvalidTime);
        }
        self.now = *value;
        Ok(())
    }
}

/// Keeps the most recent frame and how many times the ports were driven.
#[derive(Debug, Default)]
pub struct HostOutputs {
    last: PortFrame,
    writes: usize,
}

impl HostOutputs {
    pub fn last(&self) -> PortFrame {
        self.last
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl SignalOutputs for HostOutputs {
    fn apply(&mut self, frame: &PortFrame) {
        self.last = *frame;
        self.writes += 1;
    }
}

/// Accumulates requested pauses instead of sleeping.
#[derive(Debug, Default)]
pub struct VirtualPacer {
    paused_ms: u64,
}

impl VirtualPacer {
    pub fn paused_ms(&self) -> u64 {
        self.paused_ms
    }
}

impl Pacer for VirtualPacer {
    fn pause_ms(&mut self, millis: u32) {
        self.paused_ms += u64::from(millis);
    }
}

/// Parses `HH:MM:SS DD/MM/YY W`, where `W` is 1 (Monday) through 7 (Sunday).
pub fn parse_date_time(text: &str) -> Result<DateTime, String> {
    let mut fields = text.split_whitespace();
    let (Some(time), Some(date), Some(weekday), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err("expected `HH:MM:SS DD/MM/YY W`".to_string());
    };

    let [hour, minute, second] = split_numbers(time, ':')?;
    let [day, month, year] = split_numbers(date, '/')?;
    let weekday = weekday
        .parse::<u8>()
        .map_err(|_| format!("bad weekday `{weekday}`"))?;

    let value = DateTime::new(hour, minute, second, day, month, year, weekday);
    if value.is_valid() {
        Ok(value)
    } else {
        Err(format!("`{text}` is not a calendar date/time"))
    }
}

fn split_numbers(text: &str, separator: char) -> Result<[u8; 3], String> {
    let mut out = [0u8; 3];
    let mut parts = text.split(separator);
    for slot in &mut out {
        let part = parts
            .next()
            .ok_or_else(|| format!("`{text}` needs three fields"))?;
        *slot = part
            .parse()
            .map_err(|_| format!("bad number `{part}` in `{text}`"))?;
    }
    if parts.next().is_some() {
        return Err(format!("`{text}` has too many fields"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_rolls_over_new_year() {
        let mut clock = SimulatedClock::new(DateTime::new(23, 59, 59, 31, 12, 99, 5));
        clock.advance_second();
        assert_eq!(clock.current(), DateTime::new(0, 0, 0, 1, 1, 0, 6));
    }

    #[test]
    fn clock_rejects_impossible_dates() {
        let mut clock = SimulatedClock::new(DateTime::new(8, 0, 0, 3, 3, 25, 1));
        assert_eq!(
            clock.set(&DateTime::new(8, 0, 0, 30, 2, 25, 7)),
            Err(ClockError::InvalidTime)
        );
    }

    #[test]
    fn date_time_parsing() {
        assert_eq!(
            parse_date_time("07:30:00 29/02/24 4"),
            Ok(DateTime::new(7, 30, 0, 29, 2, 24, 4))
        );
        assert!(parse_date_time("07:30 29/02/24 4").is_err());
        assert!(parse_date_time("07:30:00 30/02/24 4").is_err());
        assert!(parse_date_time("07:30:00 01/03/24 8").is_err());
    }
}
