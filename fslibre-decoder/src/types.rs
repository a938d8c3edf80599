//! Core types for the FreeStyle Libre decoder library
//!
//! This module defines the packets the decoder consumes, the database records it
//! decodes from them, and the error type shared by every stage of the pipeline.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Truncated data: need {needed} bytes at offset {offset}, only {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unknown compression block type 0x{block_type:02X} at offset {offset}")]
    UnknownBlockType { block_type: u8, offset: usize },

    #[error("Database records found but no factory configuration was decoded")]
    MissingFactoryConfig,

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Required field '{field}' missing on {record_type} record")]
    MissingField {
        record_type: &'static str,
        field: &'static str,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Operation code of an AAP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum OpCode {
    /// One (uncompressed) database record
    GetDatabase,
    /// Device clock
    GetDateTime,
    /// Configuration table contents
    GetCfgData,
    /// Database table schemata
    GetDbSchema,
    /// Configuration table schemata
    GetCfgSchema,
    /// A whole database table, block compressed
    CompressedDatabase,
    /// Error response to a previous command
    Error,
    /// Anything the transport tagged with a code we do not know
    Unknown(u8),
}

impl OpCode {
    pub const GET_DATABASE: u8 = 0x31;
    pub const GET_DATE_TIME: u8 = 0x41;
    pub const GET_CFG_DATA: u8 = 0x51;
    pub const GET_DB_SCHEMA: u8 = 0x52;
    pub const GET_CFG_SCHEMA: u8 = 0x54;
    pub const COMPRESSED_DATABASE: u8 = 0x60;
    pub const ERROR: u8 = 0x14;
}

impl From<u8> for OpCode {
    fn from(value: u8) -> Self {
        match value {
            Self::GET_DATABASE => OpCode::GetDatabase,
            Self::GET_DATE_TIME => OpCode::GetDateTime,
            Self::GET_CFG_DATA => OpCode::GetCfgData,
            Self::GET_DB_SCHEMA => OpCode::GetDbSchema,
            Self::GET_CFG_SCHEMA => OpCode::GetCfgSchema,
            Self::COMPRESSED_DATABASE => OpCode::CompressedDatabase,
            Self::ERROR => OpCode::Error,
            other => OpCode::Unknown(other),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op_code: OpCode) -> Self {
        match op_code {
            OpCode::GetDatabase => OpCode::GET_DATABASE,
            OpCode::GetDateTime => OpCode::GET_DATE_TIME,
            OpCode::GetCfgData => OpCode::GET_CFG_DATA,
            OpCode::GetDbSchema => OpCode::GET_DB_SCHEMA,
            OpCode::GetCfgSchema => OpCode::GET_CFG_SCHEMA,
            OpCode::CompressedDatabase => OpCode::COMPRESSED_DATABASE,
            OpCode::Error => OpCode::ERROR,
            OpCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Unknown(code) => write!(f, "Unknown(0x{:02X})", code),
            other => write!(f, "{:?}(0x{:02X})", other, u8::from(*other)),
        }
    }
}

/// One framed AAP packet as handed over by the transport layer
///
/// In JSON dumps `data` is either a plain byte array or a Node.js buffer object
/// (`{"type": "Buffer", "data": [...]}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPacket {
    pub op_code: OpCode,
    #[serde(deserialize_with = "deserialize_buffer")]
    pub data: Vec<u8>,
    pub data_length: usize,
    pub packet_length: usize,
}

impl RawPacket {
    /// Build a packet whose lengths are derived from its payload
    pub fn new(op_code: OpCode, data: Vec<u8>) -> Self {
        let data_length = data.len();
        Self {
            op_code,
            data,
            data_length,
            // op code byte plus length byte precede the payload on the wire
            packet_length: data_length + 2,
        }
    }

    /// The payload bytes, bounded by the declared data length
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.data_length.min(self.data.len())]
    }
}

fn deserialize_buffer<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BufferRepr {
        Bytes(Vec<u8>),
        Node {
            #[serde(rename = "type")]
            _kind: String,
            data: Vec<u8>,
        },
    }

    Ok(match BufferRepr::deserialize(deserializer)? {
        BufferRepr::Bytes(bytes) => bytes,
        BufferRepr::Node { data, .. } => data,
    })
}

/// Measurement units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    #[serde(rename = "mmol/L")]
    MmolPerL,
    #[serde(rename = "mg/dL")]
    MgPerDl,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::MmolPerL => write!(f, "mmol/L"),
            Units::MgPerDl => write!(f, "mg/dL"),
        }
    }
}

/// Factory configuration of the meter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryConfig {
    /// Display unit setting; `None` if the device reported an unknown code
    pub unit_of_measure: Option<Units>,
    /// Seconds added to reader-relative timestamps to get Unix time
    pub time_conversion: i32,
}

/// Database record type, as stored in the record header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    GlucoseKetoneServing,
    GlucoseKetoneMeal,
    GlucoseKetoneCarbs,
    HistoricalData,
    TimeChangeResult,
    UserTimeChange,
    GlucoseResultWrap,
    RapidActingInsulinWrap,
    HistoricalDataWrap,
    EventWrap,
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => RecordType::GlucoseKetoneServing,
            0x02 => RecordType::GlucoseKetoneMeal,
            0x03 => RecordType::GlucoseKetoneCarbs,
            0x10 => RecordType::HistoricalData,
            0x20 => RecordType::TimeChangeResult,
            0x21 => RecordType::UserTimeChange,
            0xF0 => RecordType::GlucoseResultWrap,
            0xF1 => RecordType::RapidActingInsulinWrap,
            0xF2 => RecordType::HistoricalDataWrap,
            0xF3 => RecordType::EventWrap,
            other => RecordType::Other(other),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(record_type: RecordType) -> Self {
        match record_type {
            RecordType::GlucoseKetoneServing => 0x01,
            RecordType::GlucoseKetoneMeal => 0x02,
            RecordType::GlucoseKetoneCarbs => 0x03,
            RecordType::HistoricalData => 0x10,
            RecordType::TimeChangeResult => 0x20,
            RecordType::UserTimeChange => 0x21,
            RecordType::GlucoseResultWrap => 0xF0,
            RecordType::RapidActingInsulinWrap => 0xF1,
            RecordType::HistoricalDataWrap => 0xF2,
            RecordType::EventWrap => 0xF3,
            RecordType::Other(code) => code,
        }
    }
}

impl RecordType {
    /// Offset of the CRC16 field inside the body of a wrap-marker record
    ///
    /// Returns `None` for record types that are not wrap markers.
    pub fn wrap_crc_offset(self) -> Option<usize> {
        match self {
            RecordType::GlucoseResultWrap => Some(12),
            RecordType::RapidActingInsulinWrap => Some(12),
            RecordType::HistoricalDataWrap => Some(6),
            RecordType::EventWrap => Some(10),
            _ => None,
        }
    }

    pub fn is_measurement(self) -> bool {
        matches!(
            self,
            RecordType::GlucoseKetoneServing
                | RecordType::GlucoseKetoneMeal
                | RecordType::GlucoseKetoneCarbs
        )
    }
}

/// Database tables of the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DbTable {
    GlucoseResult,
    RapidActingInsulin,
    HistoricalData,
    Event,
}

impl DbTable {
    /// Every table that carries wrapping record numbers
    pub const ALL: [DbTable; 4] = [
        DbTable::GlucoseResult,
        DbTable::RapidActingInsulin,
        DbTable::HistoricalData,
        DbTable::Event,
    ];

    pub fn id(self) -> u8 {
        match self {
            DbTable::GlucoseResult => 0,
            DbTable::RapidActingInsulin => 1,
            DbTable::HistoricalData => 2,
            DbTable::Event => 3,
        }
    }
}

/// Kind of a discrete measurement result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Glucose,
    Ketone,
    /// Remaining 2-bit codes, which carry no value we emit
    Other(u8),
}

impl From<u8> for ResultType {
    fn from(value: u8) -> Self {
        match value {
            0 => ResultType::Glucose,
            1 => ResultType::Ketone,
            other => ResultType::Other(other),
        }
    }
}

/// Fixed header in front of every database record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Reconstructed 32-bit record number
    pub record_number: u32,
    pub record_type: RecordType,
    pub is_time_valid: bool,
    /// Seconds on the reader clock
    pub reader_time: i32,
    /// Seconds the user shifted the displayed clock by
    pub user_time_offset: i16,
}

/// Fields of a time change record (TIME_CHANGE_RESULT or USER_TIME_CHANGE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeChangeFields {
    pub old_reader_time: i32,
    pub old_user_time_offset: i16,
    /// Validity word of a TIME_CHANGE_RESULT; records with 0 are dropped while
    /// decoding. USER_TIME_CHANGE carries no such word and reports 1.
    pub valid: u16,
}

/// Fields of a historical (continuous) glucose sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryFields {
    /// 10-bit glucose magnitude in mg/dL
    pub glucose_value: u16,
    pub first_flag: bool,
    pub time_change_flag: bool,
    pub food_flag: bool,
    pub rapid_acting_insulin_flag: bool,
    pub life_counter: u16,
    pub data_quality_error_flags: u16,
}

/// Fields of a discrete glucose or ketone measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementFields {
    pub result_type: ResultType,
    /// 10-bit magnitude
    pub result_value: u16,
    pub data_quality_error_flags: u16,
}

/// Type-specific part of a decoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordBody {
    TimeChange(TimeChangeFields),
    UserTimeChange(TimeChangeFields),
    History(HistoryFields),
    Measurement(MeasurementFields),
}

/// One database record that passed its integrity checks
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub table_id: u8,
    pub header: RecordHeader,
    /// Device-local time of the record; `None` without a factory configuration
    pub device_time: Option<NaiveDateTime>,
    pub body: RecordBody,
}

impl DecodedRecord {
    pub fn record_number(&self) -> u32 {
        self.header.record_number
    }

    /// Fields of a time change, for either kind of time change record
    pub fn time_change(&self) -> Option<&TimeChangeFields> {
        match &self.body {
            RecordBody::TimeChange(fields) | RecordBody::UserTimeChange(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn history(&self) -> Option<&HistoryFields> {
        match &self.body {
            RecordBody::History(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn measurement(&self) -> Option<&MeasurementFields> {
        match &self.body {
            RecordBody::Measurement(fields) => Some(fields),
            _ => None,
        }
    }
}
