//! Builders for well-formed packets used by the unit tests

use crate::crc;
use crate::types::{OpCode, RawPacket, RecordType};

/// A database record to encode
#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub table_id: u8,
    pub record_number: u16,
    pub record_type: u8,
    pub time_valid: u8,
    pub reader_time: i32,
    pub user_time_offset: i16,
    /// Type-specific fields without the trailing CRC16
    pub body: Vec<u8>,
}

impl RecordSpec {
    pub fn new(table_id: u8, record_number: u16, record_type: RecordType) -> Self {
        Self {
            table_id,
            record_number,
            record_type: record_type.into(),
            time_valid: 0x80,
            reader_time: 0,
            user_time_offset: 0,
            body: Vec::new(),
        }
    }
}

/// Encode a record as a `GetDatabase` payload with a correct CRC16
pub fn database_payload(record: &RecordSpec) -> Vec<u8> {
    let mut protected = Vec::new();
    protected.extend_from_slice(&record.record_number.to_le_bytes());
    protected.push(record.record_type);
    protected.push(record.time_valid);
    protected.extend_from_slice(&record.reader_time.to_le_bytes());
    protected.extend_from_slice(&record.user_time_offset.to_le_bytes());
    protected.extend_from_slice(&record.body);

    let mut payload = vec![record.table_id];
    payload.extend_from_slice(&protected);
    payload.extend_from_slice(&crc::crc16(&protected).to_le_bytes());
    payload
}

pub fn database_packet(record: &RecordSpec) -> RawPacket {
    RawPacket::new(OpCode::GetDatabase, database_payload(record))
}

/// History sample fields: packed glucose, life counter, no quality flags
pub fn history_body(packed_glucose: u16, life_counter: u16) -> Vec<u8> {
    [
        packed_glucose.to_le_bytes(),
        life_counter.to_le_bytes(),
        0u16.to_le_bytes(),
    ]
    .concat()
}

/// Factory configuration packet with the given unit code and time conversion
pub fn config_packet(unit: u8, time_conversion: i32) -> RawPacket {
    let mut data = vec![0u8; 1 + 160];
    data[0] = crate::dispatcher::METER_FACTORY_CONFIGURATION;
    data[1 + 133] = unit;
    data[1 + 156..1 + 160].copy_from_slice(&time_conversion.to_le_bytes());
    RawPacket::new(OpCode::GetCfgData, data)
}
