//! Wall-clock date/time and the day-type classifier table.

use core::fmt;

/// Day-of-week numbering used throughout the controller (1 = Monday).
pub const MONDAY: u8 = 1;
pub const FRIDAY: u8 = 5;
pub const SATURDAY: u8 = 6;
pub const SUNDAY: u8 = 7;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Calendar time as kept by the real-time clock.
///
/// `year` holds two digits (2000-based) and `weekday` runs 1 = Monday through
/// 7 = Sunday.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub day: u8,
    pub month: u8,
    pub year: u8,
    pub weekday: u8,
}

impl DateTime {
    #[must_use]
    pub const fn new(
        hour: u8,
        minute: u8,
        second: u8,
        day: u8,
        month: u8,
        year: u8,
        weekday: u8,
    ) -> Self {
        Self {
            hour,
            minute,
            second,
            day,
            month,
            year,
            weekday,
        }
    }

    /// Minutes elapsed since midnight.
    #[must_use]
    pub fn minute_of_day(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }

    /// Whether every field is inside its calendar range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.hour < 24
            && self.minute < 60
            && self.second < 60
            && (1..=12).contains(&self.month)
            && (1..=days_in_month(self.month, self.year)).contains(&self.day)
            && self.year < 100
            && (MONDAY..=SUNDAY).contains(&self.weekday)
    }

    /// The calendar day before this one (time fields are kept).
    ///
    /// Rolls back across month and year boundaries, honouring leap years.
    #[must_use]
    pub fn previous_day(&self) -> Self {
        let mut previous = *self;
        previous.weekday = previous_weekday(self.weekday);
        if self.day > 1 {
            previous.day = self.day - 1;
            return previous;
        }
        if self.month > 1 {
            previous.month = self.month - 1;
        } else {
            previous.month = 12;
            previous.year = if self.year == 0 { 99 } else { self.year - 1 };
        }
        previous.day = days_in_month(previous.month, previous.year);
        previous
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02} {:02}/{:02}/{:02} dow={}",
            self.hour, self.minute, self.second, self.day, self.month, self.year, self.weekday
        )
    }
}

/// Weekday preceding `weekday`, wrapping Monday back to Sunday.
#[must_use]
pub const fn previous_weekday(weekday: u8) -> u8 {
    if weekday <= MONDAY || weekday > SUNDAY {
        SUNDAY
    } else {
        weekday - 1
    }
}

/// Leap year rule for a two-digit year in the 2000s.
#[must_use]
pub const fn is_leap_year(year: u8) -> bool {
    let full = 2000 + year as u16;
    (full % 4 == 0 && full % 100 != 0) || full % 400 == 0
}

#[must_use]
pub const fn days_in_month(month: u8, year: u8) -> u8 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Closed set of plan day-type classifiers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DayType {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Everyday,
    ExceptSunday,
    Weekend,
    Weekdays,
    FridayToSunday,
    MondayToThursday,
    FridayAndSaturday,
    Holiday,
}

impl DayType {
    pub const ALL: [DayType; 15] = [
        DayType::Sunday,
        DayType::Monday,
        DayType::Tuesday,
        DayType::Wednesday,
        DayType::Thursday,
        DayType::Friday,
        DayType::Saturday,
        DayType::Everyday,
        DayType::ExceptSunday,
        DayType::Weekend,
        DayType::Weekdays,
        DayType::FridayToSunday,
        DayType::MondayToThursday,
        DayType::FridayAndSaturday,
        DayType::Holiday,
    ];

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        if (raw as usize) < Self::ALL.len() {
            Some(Self::ALL[raw as usize])
        } else {
            None
        }
    }

    /// Whether a plan with this classifier may run on the given day.
    ///
    /// Holidays are matched only by [`DayType::Holiday`], which in turn never
    /// matches an ordinary day.
    #[must_use]
    pub const fn matches(self, weekday: u8, is_holiday: bool) -> bool {
        if is_holiday {
            return matches!(self, DayType::Holiday);
        }
        match self {
            DayType::Sunday => weekday == SUNDAY,
            DayType::Monday => weekday == 1,
            DayType::Tuesday => weekday == 2,
            DayType::Wednesday => weekday == 3,
            DayType::Thursday => weekday == 4,
            DayType::Friday => weekday == FRIDAY,
            DayType::Saturday => weekday == SATURDAY,
            DayType::Everyday => true,
            DayType::ExceptSunday => weekday != SUNDAY,
            DayType::Weekend => weekday == SATURDAY || weekday == SUNDAY,
            DayType::Weekdays => weekday >= MONDAY && weekday <= FRIDAY,
            DayType::FridayToSunday => weekday >= FRIDAY && weekday <= SUNDAY,
            DayType::MondayToThursday => weekday >= MONDAY && weekday <= 4,
            DayType::FridayAndSaturday => weekday == FRIDAY || weekday == SATURDAY,
            DayType::Holiday => false,
        }
    }
}

impl fmt::Display for DayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DayType::Sunday => "sunday",
            DayType::Monday => "monday",
            DayType::Tuesday => "tuesday",
            DayType::Wednesday => "wednesday",
            DayType::Thursday => "thursday",
            DayType::Friday => "friday",
            DayType::Saturday => "saturday",
            DayType::Everyday => "everyday",
            DayType::ExceptSunday => "except-sunday",
            DayType::Weekend => "weekend",
            DayType::Weekdays => "weekdays",
            DayType::FridayToSunday => "friday-to-sunday",
            DayType::MondayToThursday => "monday-to-thursday",
            DayType::FridayAndSaturday => "friday-and-saturday",
            DayType::Holiday => "holiday",
        };
        f.write_str(label)
    }
}
