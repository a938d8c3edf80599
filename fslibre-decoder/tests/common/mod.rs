//! Packet builders shared by the integration tests
#![allow(dead_code)]

use fslibre_decoder::crc::{crc16, crc32};
use fslibre_decoder::{OpCode, RawPacket, RecordType};

pub const GLUCOSE_TABLE: u8 = 0;
pub const HISTORY_TABLE: u8 = 2;
pub const EVENT_TABLE: u8 = 3;

/// 2024-01-01T00:00:00Z
pub const TIME_CONVERSION: i32 = 1_704_067_200;

/// Record bytes after the table id, CRC16 appended
pub fn record_bytes(
    record_number: u16,
    record_type: RecordType,
    reader_time: i32,
    body: &[u8],
) -> Vec<u8> {
    let mut record = Vec::new();
    record.extend_from_slice(&record_number.to_le_bytes());
    record.push(record_type.into());
    record.push(0x80);
    record.extend_from_slice(&reader_time.to_le_bytes());
    record.extend_from_slice(&0i16.to_le_bytes());
    record.extend_from_slice(body);
    let crc = crc16(&record);
    record.extend_from_slice(&crc.to_le_bytes());
    record
}

pub fn database_packet(table_id: u8, record: &[u8]) -> RawPacket {
    let mut data = vec![table_id];
    data.extend_from_slice(record);
    RawPacket::new(OpCode::GetDatabase, data)
}

pub fn history_record(
    record_number: u16,
    reader_time: i32,
    glucose: u16,
    time_change_flag: bool,
) -> Vec<u8> {
    let packed = glucose | if time_change_flag { 0x2000 } else { 0 };
    let body = [packed.to_le_bytes(), 1u16.to_le_bytes(), 0u16.to_le_bytes()].concat();
    record_bytes(record_number, RecordType::HistoricalData, reader_time, &body)
}

pub fn history(record_number: u16, reader_time: i32, glucose: u16) -> RawPacket {
    database_packet(
        HISTORY_TABLE,
        &history_record(record_number, reader_time, glucose, false),
    )
}

pub fn time_change(record_number: u16, reader_time: i32, old_reader_time: i32) -> RawPacket {
    time_change_in(EVENT_TABLE, record_number, reader_time, old_reader_time)
}

pub fn time_change_in(
    table_id: u8,
    record_number: u16,
    reader_time: i32,
    old_reader_time: i32,
) -> RawPacket {
    let body = [
        &old_reader_time.to_le_bytes()[..],
        &0i16.to_le_bytes(),
        &1u16.to_le_bytes(),
        &[0, 0],
    ]
    .concat();
    database_packet(
        table_id,
        &record_bytes(record_number, RecordType::TimeChangeResult, reader_time, &body),
    )
}

/// Discrete reading; `ketone` selects the ketone result type
pub fn measurement(record_number: u16, reader_time: i32, value: u16, ketone: bool) -> RawPacket {
    let mut body = vec![0u8; 12];
    let result = value | if ketone { 1 << 14 } else { 0 };
    body[..2].copy_from_slice(&result.to_le_bytes());
    database_packet(
        GLUCOSE_TABLE,
        &record_bytes(record_number, RecordType::GlucoseKetoneServing, reader_time, &body),
    )
}

pub fn history_wrap(next_record_number: u32) -> RawPacket {
    let body = [&next_record_number.to_le_bytes()[..], &[0, 0]].concat();
    database_packet(
        HISTORY_TABLE,
        &record_bytes(0, RecordType::HistoricalDataWrap, 0, &body),
    )
}

pub fn config(time_conversion: i32) -> RawPacket {
    let mut data = vec![0u8; 161];
    data[1 + 133] = 1;
    data[1 + 156..].copy_from_slice(&time_conversion.to_le_bytes());
    RawPacket::new(OpCode::GetCfgData, data)
}

pub fn date_time() -> RawPacket {
    let mut data = vec![0, 30, 12, 2, 1];
    data.extend_from_slice(&2024u16.to_le_bytes());
    data.push(1);
    RawPacket::new(OpCode::GetDateTime, data)
}

/// Compressed container holding `record` as one uncompressed block, zero padded
/// to whole words
pub fn compressed(table_id: u8, record: &[u8]) -> RawPacket {
    let mut expanded = record.to_vec();
    while expanded.len() % 4 != 0 {
        expanded.push(0);
    }

    let words = (expanded.len() / 4) as u32;
    let mut data = vec![table_id, 0];
    data.extend_from_slice(&words.to_le_bytes()[..3]);
    data.extend_from_slice(&expanded);
    data.extend_from_slice(&crc32(&expanded).to_le_bytes());
    RawPacket::new(OpCode::CompressedDatabase, data)
}
