//! Database record decoder
//!
//! Parses one database record from a `GetDatabase` payload:
//!
//! ```text
//! Byte 0:      table id
//! Byte 1-2:    record number (16 bits, wraps)
//! Byte 3:      record type
//! Byte 4:      time valid flag (bit 7, lower 7 bits reserved)
//! Byte 5-8:    reader time (i32)
//! Byte 9-10:   user time offset (i16)
//! Byte 11-...: type-specific fields, CRC16 last
//! ```
//!
//! The CRC16 covers the header and the fields, without the table id and the CRC
//! itself. The 32-bit record number is rebuilt from the table's wrap boundary.

use crate::codec::{read_u16_at, FieldReader};
use crate::crc;
use crate::types::{
    DbTable, DecodedRecord, HistoryFields, MeasurementFields, RecordBody, RecordHeader,
    RecordType, Result, ResultType, TimeChangeFields,
};
use chrono::{DateTime, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;

const RECORD_HEADER_OFFSET: usize = 1;
const RECORD_HEADER_LENGTH: usize = 10;
const RECORD_OFFSET: usize = RECORD_HEADER_OFFSET + RECORD_HEADER_LENGTH;

const TIME_CHANGE_LENGTH: usize = 12;
const USER_TIME_CHANGE_LENGTH: usize = 10;
const HISTORICAL_DATA_LENGTH: usize = 8;

const MEASUREMENT_DATA_QUALITY_OFFSET: usize = 10;
const MEASUREMENT_CRC_OFFSET: usize = 12;

/// Next wrap boundary per database table
///
/// The reader numbers records of each table with 16 bits. The boundary is the
/// multiple of 0x10000 just above the newest record, so that
/// `boundary - (0x10000 - n)` recovers the full number of record `n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrapTable {
    boundaries: BTreeMap<u8, u32>,
}

impl WrapTable {
    pub const WRAP: u32 = 0x10000;

    /// Seed every known table from the device's current record count
    pub fn seeded(record_count: u32) -> Self {
        let next_wrap = Self::round_up(record_count);
        let boundaries = DbTable::ALL
            .iter()
            .map(|table| (table.id(), next_wrap))
            .collect();
        Self { boundaries }
    }

    /// Round up to the next multiple of 0x10000
    pub fn round_up(record_number: u32) -> u32 {
        record_number.div_ceil(Self::WRAP).saturating_mul(Self::WRAP)
    }

    pub fn get(&self, table_id: u8) -> Option<u32> {
        self.boundaries.get(&table_id).copied()
    }

    /// Raise a table's boundary from a wrap marker's next record number
    ///
    /// Boundaries never move down. Returns the boundary now in effect.
    pub fn advance(&mut self, table_id: u8, next_record_number: u32) -> u32 {
        let candidate = Self::round_up(next_record_number);
        let boundary = self.boundaries.entry(table_id).or_insert(candidate);
        if candidate > *boundary {
            *boundary = candidate;
        } else if candidate < *boundary {
            log::debug!(
                "Ignoring wrap marker for table {}: 0x{:X} is below current boundary 0x{:X}",
                table_id,
                candidate,
                boundary
            );
        }
        *boundary
    }

    /// Rebuild the 32-bit number of a record from its 16-bit header value
    pub fn reconstruct(
        &self,
        table_id: u8,
        header_number: u16,
    ) -> std::result::Result<u32, DropReason> {
        let boundary = self
            .get(table_id)
            .ok_or(DropReason::UnknownTable(table_id))?;
        boundary
            .checked_sub(Self::WRAP - u32::from(header_number))
            .ok_or(DropReason::RecordNumberUnderflow {
                boundary,
                header_number,
            })
    }
}

/// Why a well-formed record was not surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    CrcMismatch,
    /// Time change record flagged as not valid
    InvalidTimeChange,
    /// Sample carries data quality error flags
    DataQuality(u16),
    UnknownTable(u8),
    RecordNumberUnderflow { boundary: u32, header_number: u16 },
    /// Record type this decoder does not interpret
    UnsupportedType(u8),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::CrcMismatch => write!(f, "CRC16 mismatch"),
            DropReason::InvalidTimeChange => write!(f, "time change not marked valid"),
            DropReason::DataQuality(flags) => write!(f, "data quality flags 0x{:04X}", flags),
            DropReason::UnknownTable(id) => write!(f, "unknown table {}", id),
            DropReason::RecordNumberUnderflow {
                boundary,
                header_number,
            } => write!(
                f,
                "record number 0x{:04X} underflows wrap boundary 0x{:X}",
                header_number, boundary
            ),
            DropReason::UnsupportedType(t) => write!(f, "unsupported record type 0x{:02X}", t),
        }
    }
}

/// What decoding one database packet produced
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Record(DecodedRecord),
    /// A validated wrap marker; the table's boundary is now `boundary`
    WrapAdvanced { table_id: u8, boundary: u32 },
    Dropped(DropReason),
}

/// Header fields exactly as transmitted
#[derive(Debug, Clone, Copy)]
struct RawHeader {
    record_number: u16,
    record_type: u8,
    time_valid: u8,
    reader_time: i32,
    user_time_offset: i16,
}

type Parsed = std::result::Result<RecordBody, DropReason>;

/// Device-local time of a reader timestamp
///
/// `None` without a time conversion or for out-of-range results.
pub fn device_time(
    time_conversion: Option<i32>,
    reader_time: i32,
    user_time_offset: i16,
) -> Option<NaiveDateTime> {
    let seconds =
        i64::from(time_conversion?) + i64::from(reader_time) + i64::from(user_time_offset);
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc())
}

/// Record decoder - turns database payloads into decoded records
pub struct RecordDecoder;

impl RecordDecoder {
    /// Decode the record in a `GetDatabase` payload
    ///
    /// # Arguments
    /// * `payload` - table id followed by one record
    /// * `wrap_table` - wrap boundaries; updated by wrap markers
    /// * `time_conversion` - factory time conversion, if known
    ///
    /// # Returns
    /// * `Ok(RecordOutcome)` - decoded, wrap marker applied, or dropped
    /// * `Err(DecoderError::Truncated)` - payload shorter than its record type needs
    pub fn decode(
        payload: &[u8],
        wrap_table: &mut WrapTable,
        time_conversion: Option<i32>,
    ) -> Result<RecordOutcome> {
        let mut reader = FieldReader::new(payload);
        let table_id = reader.u8()?;
        let raw = Self::read_header(&mut reader)?;
        let record_type = RecordType::from(raw.record_type);

        let parsed = match record_type {
            RecordType::TimeChangeResult => Self::parse_time_change(payload)?,
            RecordType::UserTimeChange => Self::parse_user_time_change(payload, &raw)?,
            RecordType::HistoricalData => Self::parse_history(payload)?,
            t if t.is_measurement() => Self::parse_measurement(payload)?,
            t => match t.wrap_crc_offset() {
                Some(crc_offset) => {
                    return Self::apply_wrap_marker(payload, table_id, crc_offset, wrap_table)
                }
                None => {
                    log::trace!("Skipping record type 0x{:02X}", raw.record_type);
                    return Ok(RecordOutcome::Dropped(DropReason::UnsupportedType(
                        raw.record_type,
                    )));
                }
            },
        };

        let body = match parsed {
            Ok(body) => body,
            Err(reason) => return Ok(RecordOutcome::Dropped(reason)),
        };

        let record_number = match wrap_table.reconstruct(table_id, raw.record_number) {
            Ok(number) => number,
            Err(reason) => return Ok(RecordOutcome::Dropped(reason)),
        };

        let header = RecordHeader {
            record_number,
            record_type,
            is_time_valid: raw.time_valid & 0x80 != 0,
            reader_time: raw.reader_time,
            user_time_offset: raw.user_time_offset,
        };

        log::trace!(
            "Decoded record {} ({:?}) from table {}",
            record_number,
            record_type,
            table_id
        );

        Ok(RecordOutcome::Record(DecodedRecord {
            table_id,
            device_time: device_time(time_conversion, raw.reader_time, raw.user_time_offset),
            header,
            body,
        }))
    }

    fn read_header(reader: &mut FieldReader<'_>) -> Result<RawHeader> {
        Ok(RawHeader {
            record_number: reader.u16()?,
            record_type: reader.u8()?,
            time_valid: reader.u8()?,
            reader_time: reader.i32()?,
            user_time_offset: reader.i16()?,
        })
    }

    /// Bytes covered by the CRC of a record whose CRC sits at `crc_offset` in the body
    fn protected(payload: &[u8], crc_offset: usize) -> &[u8] {
        &payload[RECORD_HEADER_OFFSET..RECORD_OFFSET + crc_offset]
    }

    fn parse_time_change(payload: &[u8]) -> Result<Parsed> {
        let mut reader = FieldReader::at(payload, RECORD_OFFSET);
        let old_reader_time = reader.i32()?;
        let old_user_time_offset = reader.i16()?;
        let valid = reader.u16()?;
        reader.skip(2)?;
        let crc16 = reader.u16()?;

        if !crc::check16(Self::protected(payload, TIME_CHANGE_LENGTH - 2), crc16) {
            return Ok(Err(DropReason::CrcMismatch));
        }
        if valid == 0 {
            return Ok(Err(DropReason::InvalidTimeChange));
        }

        Ok(Ok(RecordBody::TimeChange(TimeChangeFields {
            old_reader_time,
            old_user_time_offset,
            valid,
        })))
    }

    fn parse_user_time_change(payload: &[u8], raw: &RawHeader) -> Result<Parsed> {
        let mut reader = FieldReader::at(payload, RECORD_OFFSET);
        let old_user_time_offset = reader.i16()?;
        reader.skip(6)?;
        let crc16 = reader.u16()?;

        if !crc::check16(Self::protected(payload, USER_TIME_CHANGE_LENGTH - 2), crc16) {
            return Ok(Err(DropReason::CrcMismatch));
        }

        // The reader clock itself does not move on a user offset change
        Ok(Ok(RecordBody::UserTimeChange(TimeChangeFields {
            old_reader_time: raw.reader_time,
            old_user_time_offset,
            valid: 1,
        })))
    }

    fn parse_history(payload: &[u8]) -> Result<Parsed> {
        let mut reader = FieldReader::at(payload, RECORD_OFFSET);
        let packed = reader.u16()?;
        let life_counter = reader.u16()?;
        let data_quality_error_flags = reader.u16()?;
        let crc16 = reader.u16()?;

        if !crc::check16(Self::protected(payload, HISTORICAL_DATA_LENGTH - 2), crc16) {
            return Ok(Err(DropReason::CrcMismatch));
        }
        if data_quality_error_flags != 0 {
            return Ok(Err(DropReason::DataQuality(data_quality_error_flags)));
        }

        Ok(Ok(RecordBody::History(HistoryFields {
            glucose_value: packed & 0x03FF,
            first_flag: packed & 0x1000 != 0,
            time_change_flag: packed & 0x2000 != 0,
            food_flag: packed & 0x4000 != 0,
            rapid_acting_insulin_flag: packed & 0x8000 != 0,
            life_counter,
            data_quality_error_flags,
        })))
    }

    fn parse_measurement(payload: &[u8]) -> Result<Parsed> {
        let result = read_u16_at(payload, RECORD_OFFSET)?;
        let data_quality_error_flags =
            read_u16_at(payload, RECORD_OFFSET + MEASUREMENT_DATA_QUALITY_OFFSET)?;
        let crc16 = read_u16_at(payload, RECORD_OFFSET + MEASUREMENT_CRC_OFFSET)?;

        if !crc::check16(Self::protected(payload, MEASUREMENT_CRC_OFFSET), crc16) {
            return Ok(Err(DropReason::CrcMismatch));
        }
        if data_quality_error_flags != 0 {
            return Ok(Err(DropReason::DataQuality(data_quality_error_flags)));
        }

        Ok(Ok(RecordBody::Measurement(MeasurementFields {
            result_type: ResultType::from(((result >> 14) & 0x3) as u8),
            result_value: result & 0x03FF,
            data_quality_error_flags,
        })))
    }

    fn apply_wrap_marker(
        payload: &[u8],
        table_id: u8,
        crc_offset: usize,
        wrap_table: &mut WrapTable,
    ) -> Result<RecordOutcome> {
        let crc16 = read_u16_at(payload, RECORD_OFFSET + crc_offset)?;
        if !crc::check16(Self::protected(payload, crc_offset), crc16) {
            return Ok(RecordOutcome::Dropped(DropReason::CrcMismatch));
        }

        // Not always a multiple of 0x10000: it is the number the next record will get
        let next_record_number = FieldReader::at(payload, RECORD_OFFSET).u32()?;
        let boundary = wrap_table.advance(table_id, next_record_number);
        log::debug!(
            "Wrap marker for table {}: next record 0x{:X}, boundary 0x{:X}",
            table_id,
            next_record_number,
            boundary
        );

        Ok(RecordOutcome::WrapAdvanced { table_id, boundary })
    }
}
