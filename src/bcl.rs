//! Wire representation of timestamps, compatible with the directory's fixed
//! field layout. Values travel as ticks of 100 ns.
use chrono::{DateTime as ChronoDateTime, TimeZone, Utc};
use thiserror::Error;

/// Ticks between 0001-01-01 and the unix epoch
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Nanoseconds per tick
pub(crate) const NANOS_PER_TICK: i64 = 100;

#[derive(Copy, Clone, Debug, Eq, PartialEq, prost::Enumeration)]
#[repr(i32)]
pub enum TimeSpanScale {
    Days = 0,
    Hours = 1,
    Minutes = 2,
    Seconds = 3,
    Milliseconds = 4,
    Ticks = 5,
    MinMax = 15,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, prost::Enumeration)]
#[repr(i32)]
pub enum DateTimeKind {
    Unspecified = 0,
    Utc = 1,
    Local = 2,
}

#[derive(Copy, Clone, Eq, PartialEq, prost::Message)]
pub struct DateTime {
    #[prost(int64, tag = "1")]
    pub value: i64,

    #[prost(enumeration = "TimeSpanScale", tag = "2")]
    pub scale: i32,

    #[prost(enumeration = "DateTimeKind", tag = "3")]
    pub kind: i32,
}

#[derive(Debug, Error)]
pub enum DateTimeError {
    #[error("unsupported wire scale {0}")]
    UnsupportedScale(i32),

    #[error("timestamp {0} is out of range")]
    OutOfRange(i64),
}

/// Ticks since 0001-01-01 for a UTC timestamp
pub(crate) fn ticks(utc: ChronoDateTime<Utc>) -> i64 {
    let nanos = utc.timestamp() * 1_000_000_000 + i64::from(utc.timestamp_subsec_nanos());
    UNIX_EPOCH_TICKS + nanos / NANOS_PER_TICK
}

/// UTC timestamp for ticks since 0001-01-01
pub(crate) fn from_ticks(ticks: i64) -> Option<ChronoDateTime<Utc>> {
    let nanos = ticks.checked_sub(UNIX_EPOCH_TICKS)?.checked_mul(NANOS_PER_TICK)?;
    let (secs, subsec) = (nanos.div_euclid(1_000_000_000), nanos.rem_euclid(1_000_000_000));
    Utc.timestamp_opt(secs, subsec as u32).single()
}

impl From<ChronoDateTime<Utc>> for DateTime {
    fn from(utc: ChronoDateTime<Utc>) -> Self {
        Self {
            value: ticks(utc),
            scale: TimeSpanScale::Ticks as i32,
            kind: DateTimeKind::Utc as i32,
        }
    }
}

impl TryFrom<DateTime> for ChronoDateTime<Utc> {
    type Error = DateTimeError;

    fn try_from(wire: DateTime) -> Result<Self, Self::Error> {
        let ticks = match TimeSpanScale::try_from(wire.scale) {
            Ok(TimeSpanScale::Ticks) => wire.value,
            Ok(TimeSpanScale::Seconds) => wire.value.saturating_mul(10_000_000),
            Ok(TimeSpanScale::Milliseconds) => wire.value.saturating_mul(10_000),
            _ => return Err(DateTimeError::UnsupportedScale(wire.scale)),
        };

        from_ticks(ticks).ok_or(DateTimeError::OutOfRange(ticks))
    }
}
