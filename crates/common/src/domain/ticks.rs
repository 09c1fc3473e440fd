//! Conversions between `chrono` timestamps and ticks: 100-nanosecond
//! intervals since 0001-01-01T00:00:00Z, the unit heartbeats carry on the wire.

use chrono::{DateTime, TimeZone, Utc};

pub const TICKS_PER_MILLISECOND: i64 = 10_000;
pub const TICKS_PER_SECOND: i64 = 10_000_000;
pub const TICKS_PER_MINUTE: i64 = 60 * TICKS_PER_SECOND;

/// Ticks at 1970-01-01T00:00:00Z.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

const NANOS_PER_TICK: i64 = 100;

/// Ticks for a UTC timestamp.
pub fn ticks_from_datetime(at: DateTime<Utc>) -> i64 {
    let seconds = at.timestamp();
    let sub_ticks = i64::from(at.timestamp_subsec_nanos()) / NANOS_PER_TICK;
    UNIX_EPOCH_TICKS + seconds * TICKS_PER_SECOND + sub_ticks
}

/// Ticks for a count of nanoseconds since the Unix epoch.
pub fn ticks_from_unix_nanos(nanos: i128) -> i64 {
    let ticks = nanos.div_euclid(i128::from(NANOS_PER_TICK)) + i128::from(UNIX_EPOCH_TICKS);
    ticks.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// UTC timestamp for a tick count, `None` when outside chrono's range.
pub fn datetime_from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let seconds = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK;
    Utc.timestamp_opt(seconds, nanos as u32).single()
}
