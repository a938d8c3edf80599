//! Timezone offset reconstruction
//!
//! The reader only knows device-local time. The offset to UTC is anchored at
//! the most recent record, using the user's timezone, and then carried back
//! through the device's clock changes: every change splits the record history
//! into an interval before and after it. Changes are rounded to 15 minutes to
//! get the timezone offset; whatever is left is clock drift.

use crate::builder::{RecordBuilder, TimeChange, UtcInfo, DEVICE_TIME_FORMAT};
use crate::types::{DecoderError, Result};
use chrono::{Duration, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

const OFFSET_GRANULARITY_MINUTES: i64 = 15;

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| DecoderError::InvalidTimezone(name.to_string()))
}

/// UTC offset in minutes of a device-local time in `tz`
///
/// Local times inside a DST gap are moved forward by an hour.
pub fn local_offset_minutes(tz: Tz, local: &NaiveDateTime) -> i32 {
    let resolved = tz
        .from_local_datetime(local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(*local + Duration::hours(1))).earliest());
    match resolved {
        Some(dt) => dt.offset().fix().local_minus_utc() / 60,
        None => 0,
    }
}

/// Offsets in effect before one clock change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Boundary {
    index: u32,
    offset_before: i32,
    drift_before: i64,
}

/// Assigns UTC offsets to records by their position relative to clock changes
#[derive(Debug, Clone)]
pub struct TimezoneOffsetUtil {
    timezone: Tz,
    /// Offset after the last clock change, in minutes
    current_offset: i32,
    /// Drift after the last clock change, in milliseconds
    current_drift: i64,
    /// Sorted by record index
    boundaries: Vec<Boundary>,
}

impl TimezoneOffsetUtil {
    /// Anchor offsets at `most_recent` and walk back through `time_changes`
    ///
    /// The time change events receive their own UTC info along the way.
    pub fn new(
        timezone: Tz,
        most_recent: NaiveDateTime,
        time_changes: &mut [RecordBuilder],
    ) -> Self {
        let current_offset = local_offset_minutes(timezone, &most_recent);
        log::debug!(
            "Most recent record {} is at UTC offset {} min in {}",
            most_recent,
            current_offset,
            timezone
        );

        let mut util = Self {
            timezone,
            current_offset,
            current_drift: 0,
            boundaries: Vec::new(),
        };

        // Stable; equal keys keep the order the caller established
        time_changes.sort_by_key(|change| (change.index(), change.device_time()));

        let mut offset = current_offset;
        let mut drift = 0i64;
        for change in time_changes.iter_mut().rev() {
            change.fill_utc(utc_info(change.device_time(), offset, drift));

            let Some(delta) = change.change().and_then(change_delta) else {
                continue;
            };
            let total_ms = delta.num_milliseconds();
            let step_ms = OFFSET_GRANULARITY_MINUTES * 60_000;
            let rounded_minutes =
                ((total_ms as f64 / step_ms as f64).round() as i64) * OFFSET_GRANULARITY_MINUTES;
            let remainder_ms = total_ms - rounded_minutes * 60_000;

            offset = clamp_minutes(i64::from(offset) - rounded_minutes);
            drift = drift.saturating_sub(remainder_ms);
            util.boundaries.push(Boundary {
                index: change.index(),
                offset_before: offset,
                drift_before: drift,
            });
        }
        util.boundaries.sort_by_key(|b| b.index);

        util
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Offset (minutes) and drift (milliseconds) for a record index
    pub fn offsets_for(&self, index: u32) -> (i32, i64) {
        self.boundaries
            .iter()
            .find(|b| index < b.index)
            .map(|b| (b.offset_before, b.drift_before))
            .unwrap_or((self.current_offset, self.current_drift))
    }

    /// Set `time`, `timezoneOffset`, `conversionOffset` and `clockDriftOffset`
    pub fn fill_in_utc_info(&self, builder: &mut RecordBuilder) {
        let (offset, drift) = self.offsets_for(builder.index());
        builder.fill_utc(utc_info(builder.device_time(), offset, drift));
    }
}

fn clamp_minutes(minutes: i64) -> i32 {
    minutes.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn change_delta(change: &TimeChange) -> Option<Duration> {
    let from = NaiveDateTime::parse_from_str(&change.from, DEVICE_TIME_FORMAT).ok()?;
    let to = NaiveDateTime::parse_from_str(&change.to, DEVICE_TIME_FORMAT).ok()?;
    Some(to - from)
}

fn utc_info(device_time: NaiveDateTime, offset_minutes: i32, drift_ms: i64) -> UtcInfo {
    let utc = device_time
        .checked_sub_signed(Duration::minutes(i64::from(offset_minutes)))
        .and_then(|t| t.checked_sub_signed(Duration::milliseconds(drift_ms)))
        .unwrap_or_else(|| {
            log::warn!(
                "UTC offset {} min out of range for {}; using device time",
                offset_minutes,
                device_time
            );
            device_time
        });
    UtcInfo {
        time: Utc
            .from_utc_datetime(&utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        timezone_offset: offset_minutes,
        conversion_offset: 0,
        clock_drift_offset: (drift_ms != 0).then_some(drift_ms),
    }
}
