//! Firebird DATE, TIME and TIMESTAMP values
//!
//! Firebird transmits dates as a day count since 17 November 1858 (the
//! Modified Julian Day epoch) and times of day as a count of fractions,
//! each fraction being 100 microseconds. These types keep calendar fields
//! client-side and convert to and from those wire units.

use crate::error::{Error, Result};

/// Days between the Modified Julian Day epoch (1858-11-17) and 1970-01-01
const MJD_UNIX_OFFSET: i64 = 40_587;

/// Fractions (100 microsecond units) in one second
pub const FRACTIONS_PER_SECOND: u32 = 10_000;

/// Fractions in one day
pub const FRACTIONS_PER_DAY: u32 = 24 * 60 * 60 * FRACTIONS_PER_SECOND;

/// A Firebird DATE value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FbDate {
    /// Year (e.g. 2024)
    pub year: i32,
    /// Month (1-12)
    pub month: u8,
    /// Day (1-31)
    pub day: u8,
}

impl FbDate {
    /// Create a new date
    pub fn new(year: i32, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Encode to the wire unit: days since the Modified Julian Day epoch
    pub fn to_days(&self) -> i32 {
        let y = i64::from(if self.month <= 2 { self.year - 1 } else { self.year });
        let era = if y >= 0 { y } else { y - 399 } / 400;
        let yoe = y - era * 400;
        let mp = (i64::from(self.month) + 9) % 12;
        let doy = (153 * mp + 2) / 5 + i64::from(self.day) - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        (era * 146_097 + doe - 719_468 + MJD_UNIX_OFFSET) as i32
    }

    /// Decode from the wire unit
    pub fn from_days(days: i32) -> Self {
        let z = i64::from(days) - MJD_UNIX_OFFSET + 719_468;
        let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
        let doe = z - era * 146_097;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let y = yoe + era * 400;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
        let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
        let year = (if month <= 2 { y + 1 } else { y }) as i32;
        Self { year, month, day }
    }
}

impl std::fmt::Display for FbDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A Firebird TIME value with 100-microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FbTime {
    /// Hour (0-23)
    pub hour: u8,
    /// Minute (0-59)
    pub minute: u8,
    /// Second (0-59)
    pub second: u8,
    /// Sub-second fractions in 100 microsecond units (0-9999)
    pub fraction: u16,
}

impl FbTime {
    /// Create a new time of day
    pub fn new(hour: u8, minute: u8, second: u8, fraction: u16) -> Self {
        Self {
            hour,
            minute,
            second,
            fraction,
        }
    }

    /// Encode to the wire unit: fractions since midnight
    pub fn to_fractions(&self) -> u32 {
        (u32::from(self.hour) * 3600 + u32::from(self.minute) * 60 + u32::from(self.second))
            * FRACTIONS_PER_SECOND
            + u32::from(self.fraction)
    }

    /// Decode from the wire unit
    pub fn from_fractions(fractions: u32) -> Result<Self> {
        if fractions >= FRACTIONS_PER_DAY {
            return Err(Error::Internal(format!(
                "time value {} out of range",
                fractions
            )));
        }
        let seconds = fractions / FRACTIONS_PER_SECOND;
        Ok(Self {
            hour: (seconds / 3600) as u8,
            minute: (seconds / 60 % 60) as u8,
            second: (seconds % 60) as u8,
            fraction: (fractions % FRACTIONS_PER_SECOND) as u16,
        })
    }
}

impl std::fmt::Display for FbTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)?;
        if self.fraction != 0 {
            write!(f, ".{:04}", self.fraction)?;
        }
        Ok(())
    }
}

/// A Firebird TIMESTAMP value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FbTimestamp {
    /// Calendar date
    pub date: FbDate,
    /// Time of day
    pub time: FbTime,
}

impl FbTimestamp {
    /// Create a new timestamp
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        year: i32,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        fraction: u16,
    ) -> Self {
        Self {
            date: FbDate::new(year, month, day),
            time: FbTime::new(hour, minute, second, fraction),
        }
    }

    /// Encode to the wire pair of (days, fractions)
    pub fn to_parts(&self) -> (i32, u32) {
        (self.date.to_days(), self.time.to_fractions())
    }

    /// Decode from the wire pair
    pub fn from_parts(days: i32, fractions: u32) -> Result<Self> {
        Ok(Self {
            date: FbDate::from_days(days),
            time: FbTime::from_fractions(fractions)?,
        })
    }
}

impl std::fmt::Display for FbTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.date, self.time)
    }
}
