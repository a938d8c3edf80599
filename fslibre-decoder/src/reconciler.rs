//! Record reconciliation
//!
//! Turns the decoded database records of one session into output records:
//! orders them by record number, repairs the ordering around clock changes,
//! anchors timezone offsets on the most recent record and builds the time
//! change, cbg, smbg and blood ketone records.

use crate::builder::{format_device_time, Annotation, DomainRecord, RecordBuilder, TimeChange};
use crate::record_decoder::device_time;
use crate::tz::TimezoneOffsetUtil;
use crate::types::{DecodedRecord, DecoderError, RecordBody, Result, ResultType};
use chrono::NaiveDateTime;
use chrono_tz::Tz;

/// Raw ketone magnitudes are mg/dL-like; divide to get mmol/L
pub const KETONE_VALUE_FACTOR: f64 = 18.0;

/// Reportable measurement range of one value type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub step: f64,
    /// Annotation code prefix
    pub tag: &'static str,
}

pub const GLUCOSE_RANGE: ValueRange = ValueRange {
    low: Some(20.0),
    high: Some(500.0),
    step: 1.0,
    tag: "bg",
};

pub const KETONE_RANGE: ValueRange = ValueRange {
    low: None,
    high: Some(8.0),
    step: 1.0 / KETONE_VALUE_FACTOR,
    tag: "ketone",
};

impl ValueRange {
    /// Clamp values at or beyond the displayable limits and annotate them
    pub fn apply(&self, builder: &mut RecordBuilder) {
        let Some(value) = builder.value() else {
            return;
        };

        let (limit, side, threshold) = match (self.low, self.high) {
            (Some(low), _) if value < low + self.step => (low, "low", low + self.step),
            (_, Some(high)) if value > high - self.step => (high, "high", high - self.step),
            _ => return,
        };

        builder.set_value(limit);
        builder.annotate(Annotation {
            code: format!("{}/out-of-range", self.tag),
            value: Some(side.to_string()),
            threshold: Some(threshold),
        });
    }
}

/// A record whose device time is known
#[derive(Debug, Clone)]
struct TimedRecord {
    time: NaiveDateTime,
    record: DecodedRecord,
}

/// Total ordering key; record numbers are rebuilt per table and can collide
type OrderKey = (u32, u8, u8, i32, i16, i32, i16);

impl TimedRecord {
    fn number(&self) -> u32 {
        self.record.record_number()
    }

    fn order_key(&self) -> OrderKey {
        let header = &self.record.header;
        let (old_reader_time, old_user_time_offset) = self
            .record
            .time_change()
            .map(|fields| (fields.old_reader_time, fields.old_user_time_offset))
            .unwrap_or_default();
        (
            header.record_number,
            self.record.table_id,
            u8::from(header.record_type),
            header.reader_time,
            header.user_time_offset,
            old_reader_time,
            old_user_time_offset,
        )
    }
}

/// Builds output records from one session's decoded records
#[derive(Debug, Clone)]
pub struct Reconciler {
    timezone: Tz,
    strict_time_conversion: bool,
}

impl Reconciler {
    pub fn new(timezone: Tz, strict_time_conversion: bool) -> Self {
        Self {
            timezone,
            strict_time_conversion,
        }
    }

    /// Produce the ordered output records
    ///
    /// # Arguments
    /// * `records` - every record the session decoded, in dispatch order
    /// * `time_conversion` - factory time conversion, if a config packet was seen
    ///
    /// # Returns
    /// * `Ok(Vec<DomainRecord>)` - time changes, then cbg, then discrete readings
    /// * `Err(DecoderError::MissingFactoryConfig)` - strict mode and no time conversion
    pub fn reconcile(
        &self,
        records: Vec<DecodedRecord>,
        time_conversion: Option<i32>,
    ) -> Result<Vec<DomainRecord>> {
        if records.is_empty() {
            log::info!("No database records decoded");
            return Ok(Vec::new());
        }

        let mut timed = self.resolve_times(records, time_conversion)?;
        if timed.is_empty() {
            return Ok(Vec::new());
        }

        timed.sort_by_key(TimedRecord::order_key);
        repair_time_change_order(&mut timed);
        timed.sort_by_key(TimedRecord::order_key);

        let most_recent = match timed.last() {
            Some(last) => last.time,
            None => return Ok(Vec::new()),
        };

        let mut time_changes = build_time_changes(&timed, time_conversion);
        let tz_util = TimezoneOffsetUtil::new(self.timezone, most_recent, &mut time_changes);

        let mut builders = time_changes;
        builders.extend(build_cbg(&timed, &tz_util));
        builders.extend(build_measurements(&timed, &tz_util));

        let output = builders
            .into_iter()
            .map(RecordBuilder::finalize)
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Reconciled {} decoded records into {} output records",
            timed.len(),
            output.len()
        );
        Ok(output)
    }

    fn resolve_times(
        &self,
        records: Vec<DecodedRecord>,
        time_conversion: Option<i32>,
    ) -> Result<Vec<TimedRecord>> {
        if time_conversion.is_none() && self.strict_time_conversion {
            return Err(DecoderError::MissingFactoryConfig);
        }

        let total = records.len();
        let timed: Vec<TimedRecord> = records
            .into_iter()
            .filter_map(|record| {
                let time = record.device_time?;
                Some(TimedRecord { time, record })
            })
            .collect();

        if timed.len() < total {
            log::warn!(
                "Dropping {} of {} records without a resolvable device time{}",
                total - timed.len(),
                total,
                if time_conversion.is_none() {
                    " (no factory configuration)"
                } else {
                    ""
                }
            );
        }
        Ok(timed)
    }
}

/// Move the history sample preceding a flagged clock change in front of it
///
/// A history record with the time change flag set follows a clock change. The
/// history record before it was taken on the old clock, so it is renumbered to
/// sort just ahead of the most recent time change record.
fn repair_time_change_order(records: &mut [TimedRecord]) {
    let mut previous_time_change: Option<u32> = None;
    let mut previous_history: Option<usize> = None;

    for i in 0..records.len() {
        let number = records[i].number();
        match &records[i].record.body {
            RecordBody::History(fields) => {
                let flagged = fields.time_change_flag;
                if let (true, Some(change_number), Some(prev)) =
                    (flagged, previous_time_change, previous_history)
                {
                    let renumbered = change_number.saturating_sub(1);
                    log::debug!(
                        "Renumbering history record {} to {} ahead of time change",
                        records[prev].number(),
                        renumbered
                    );
                    records[prev].record.header.record_number = renumbered;
                }
                previous_history = Some(i);
            }
            RecordBody::TimeChange(_) | RecordBody::UserTimeChange(_) => {
                previous_time_change = Some(number);
            }
            RecordBody::Measurement(_) => {}
        }
    }
}

fn build_time_changes(
    records: &[TimedRecord],
    time_conversion: Option<i32>,
) -> Vec<RecordBuilder> {
    let mut builders: Vec<RecordBuilder> = Vec::new();

    for timed in records {
        let Some(fields) = timed.record.time_change() else {
            continue;
        };
        let Some(old_time) = device_time(
            time_conversion,
            fields.old_reader_time,
            fields.old_user_time_offset,
        ) else {
            log::warn!(
                "Time change record {} has no resolvable previous time",
                timed.number()
            );
            continue;
        };

        let change = TimeChange {
            from: format_device_time(&old_time),
            to: format_device_time(&timed.time),
            agent: "manual".to_string(),
        };

        // Reported by more than one table
        if builders.last().and_then(RecordBuilder::change) == Some(&change) {
            log::trace!("Skipping duplicate time change at record {}", timed.number());
            continue;
        }

        builders.push(RecordBuilder::time_change(change, timed.time, timed.number()));
    }

    builders
}

fn build_cbg(records: &[TimedRecord], tz_util: &TimezoneOffsetUtil) -> Vec<RecordBuilder> {
    records
        .iter()
        .filter_map(|timed| {
            let history = timed.record.history()?;
            let mut cbg =
                RecordBuilder::cbg(f64::from(history.glucose_value), timed.time, timed.number());
            GLUCOSE_RANGE.apply(&mut cbg);
            tz_util.fill_in_utc_info(&mut cbg);
            Some(cbg)
        })
        .collect()
}

fn build_measurements(
    records: &[TimedRecord],
    tz_util: &TimezoneOffsetUtil,
) -> Vec<RecordBuilder> {
    records
        .iter()
        .filter_map(|timed| {
            let measurement = timed.record.measurement()?;
            let value = f64::from(measurement.result_value);

            let mut builder = match measurement.result_type {
                ResultType::Glucose => {
                    let mut smbg = RecordBuilder::smbg(value, timed.time, timed.number());
                    GLUCOSE_RANGE.apply(&mut smbg);
                    smbg
                }
                ResultType::Ketone => {
                    let mut ketone = RecordBuilder::blood_ketone(
                        value / KETONE_VALUE_FACTOR,
                        timed.time,
                        timed.number(),
                    );
                    KETONE_RANGE.apply(&mut ketone);
                    ketone
                }
                ResultType::Other(code) => {
                    log::trace!(
                        "Skipping measurement {} with result type {}",
                        timed.number(),
                        code
                    );
                    return None;
                }
            };

            tz_util.fill_in_utc_info(&mut builder);
            Some(builder)
        })
        .collect()
}
