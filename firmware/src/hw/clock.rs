//! Wall clock on the MCU's calendar RTC.
//!
//! The core keeps two-digit years (2000-2099) and ISO weekdays, which is what
//! the RTC stores internally as well; only the year width differs.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

const CENTURY: u16 = 2000;

#[must_use]
pub const fn full_year(year: u8) -> u16 {
    CENTURY + year as u16
}

/// Two-digit year, or `None` outside 2000-2099.
#[must_use]
pub fn short_year(year: u16) -> Option<u8> {
    year.checked_sub(CENTURY)
        .and_then(|offset| u8::try_from(offset).ok())
        .filter(|offset| *offset < 100)
}

#[cfg(target_os = "none")]
pub use rtc::RtcClock;

#[cfg(target_os = "none")]
mod rtc {
    use embassy_stm32::rtc::{DateTime as RtcDateTime, DayOfWeek, Rtc};
    use signal_core::calendar::DateTime;
    use signal_core::clock::{Clock, ClockError};

    use super::{full_year, short_year};

    pub struct RtcClock {
        rtc: Rtc,
    }

    impl RtcClock {
        pub fn new(rtc: Rtc) -> Self {
            Self { rtc }
        }
    }

    const fn day_of_week(weekday: u8) -> Option<DayOfWeek> {
        Some(match weekday {
            1 => DayOfWeek::Monday,
            2 => DayOfWeek::Tuesday,
            3 => DayOfWeek::Wednesday,
            4 => DayOfWeek::Thursday,
            5 => DayOfWeek::Friday,
            6 => DayOfWeek::Saturday,
            7 => DayOfWeek::Sunday,
            _ => return None,
        })
    }

    const fn weekday(day: DayOfWeek) -> u8 {
        match day {
            DayOfWeek::Monday => 1,
            DayOfWeek::Tuesday => 2,
            DayOfWeek::Wednesday => 3,
            DayOfWeek::Thursday => 4,
            DayOfWeek::Friday => 5,
            DayOfWeek::Saturday => 6,
            DayOfWeek::Sunday => 7,
        }
    }

    impl Clock for RtcClock {
        fn now(&mut self) -> Result<DateTime, ClockError> {
            let now = self.rtc.now().map_err(|_| ClockError::Unavailable)?;
            let year = short_year(now.year()).ok_or(ClockError::Unavailable)?;
            let value = DateTime::new(
                now.hour(),
                now.minute(),
                now.second(),
                now.day(),
                now.month(),
                year,
                weekday(now.day_of_week()),
            );
            if value.is_valid() {
                Ok(value)
            } else {
                Err(ClockError::Unavailable)
            }
        }

        fn set(&mut self, value: &DateTime) -> Result<(), ClockError> {
            let day = day_of_week(value.weekday).ok_or(ClockError::InvalidTime)?;
            let target = RtcDateTime::from(
                full_year(value.year),
                value.month,
                value.day,
                day,
                value.hour,
                value.minute,
                value.second,
                0,
            )
            .map_err(|_| ClockError::InvalidTime)?;
            self.rtc
                .set_datetime(target)
                .map_err(|_| ClockError::Unavailable)
        }
    }
}
