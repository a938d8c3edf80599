//! Packet dispatcher
//!
//! Groups AAP packets by op code and processes them in a fixed order, so that
//! the clock and factory configuration are known before any database record
//! needs an absolute time. Arrival order of the packets does not matter.

use crate::codec::FieldReader;
use crate::decompress::{self, Decompressed};
use crate::record_decoder::{DropReason, RecordDecoder, RecordOutcome};
use crate::session::{PacketFailure, SessionContext};
use crate::types::{FactoryConfig, OpCode, RawPacket, Result, Units};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Config table holding the meter factory configuration
pub const METER_FACTORY_CONFIGURATION: u8 = 0x00;

const UNIT_OF_MEASURE_OFFSET: usize = 133;
const TIME_CONVERSION_OFFSET: usize = 156;

const DATE_TIME_LENGTH: usize = 8;
const ERROR_LENGTH: usize = 2;

/// Order in which op codes are processed
pub const PROCESSING_ORDER: [OpCode; 6] = [
    OpCode::GetCfgSchema,
    OpCode::GetDbSchema,
    OpCode::GetDateTime,
    OpCode::GetCfgData,
    OpCode::CompressedDatabase,
    OpCode::GetDatabase,
];

/// Decode all packets of one session
///
/// # Arguments
/// * `packets` - AAP packets in any order
/// * `record_count_seed` - current database record count reported by the device
pub fn dispatch(packets: &[RawPacket], record_count_seed: u32) -> SessionContext {
    let mut by_op_code: HashMap<OpCode, Vec<&RawPacket>> = HashMap::new();
    for packet in packets {
        by_op_code.entry(packet.op_code).or_default().push(packet);
    }

    let mut ctx = SessionContext::new(record_count_seed);

    for op_code in PROCESSING_ORDER {
        for packet in by_op_code.remove(&op_code).unwrap_or_default() {
            ctx = handle_packet(ctx, packet);
        }
    }

    // Whatever is left has no place in the processing order
    let mut leftovers: Vec<_> = by_op_code.into_iter().collect();
    leftovers.sort_by_key(|(op_code, _)| *op_code);
    for (_, group) in leftovers {
        for packet in group {
            ctx = handle_packet(ctx, packet);
        }
    }

    log::info!(
        "Dispatched {} packets: {} records decoded, {} dropped, {} failures",
        packets.len(),
        ctx.summary.records_decoded,
        ctx.summary.records_dropped,
        ctx.failures.len()
    );

    ctx
}

/// Route one packet to its handler
pub fn handle_packet(ctx: SessionContext, packet: &RawPacket) -> SessionContext {
    log::debug!(
        "Processing {} packet ({} bytes)",
        packet.op_code,
        packet.data_length
    );

    match packet.op_code {
        OpCode::GetDateTime => handle_date_time(ctx, packet),
        OpCode::GetCfgSchema | OpCode::GetDbSchema => handle_schema(ctx, packet),
        OpCode::GetCfgData => handle_config_data(ctx, packet),
        OpCode::CompressedDatabase => handle_compressed_database(ctx, packet),
        OpCode::GetDatabase => handle_database(ctx, packet),
        OpCode::Error => handle_error(ctx, packet),
        OpCode::Unknown(code) => {
            log::warn!("No handler for op code 0x{:02X}, skipping packet", code);
            skipped(ctx)
        }
    }
}

fn skipped(mut ctx: SessionContext) -> SessionContext {
    ctx.summary.packets_skipped += 1;
    ctx
}

fn processed(mut ctx: SessionContext) -> SessionContext {
    ctx.summary.packets_processed += 1;
    ctx
}

/// Schema packets are ignored; record layouts are fixed in the decoder
fn handle_schema(ctx: SessionContext, packet: &RawPacket) -> SessionContext {
    log::trace!("Ignoring {} packet", packet.op_code);
    processed(ctx)
}

fn handle_error(ctx: SessionContext, packet: &RawPacket) -> SessionContext {
    let payload = packet.payload();
    let mut reader = FieldReader::new(payload);
    match (reader.u8(), reader.u8()) {
        (Ok(op_code), Ok(error_code)) => {
            log::warn!(
                "Device reported error 0x{:02X} for op code {}",
                error_code,
                OpCode::from(op_code)
            );
            if payload.len() > ERROR_LENGTH {
                log::debug!("Error packet extra data: {:02X?}", &payload[ERROR_LENGTH..]);
            }
        }
        _ => log::warn!("Error packet too short ({} bytes)", payload.len()),
    }
    processed(ctx)
}

fn handle_date_time(mut ctx: SessionContext, packet: &RawPacket) -> SessionContext {
    if packet.data_length != DATE_TIME_LENGTH {
        log::warn!(
            "Date/time packet has wrong data length {} instead of {}",
            packet.data_length,
            DATE_TIME_LENGTH
        );
        return skipped(ctx);
    }

    let fields = read_date_time(packet.payload());
    match fields {
        Ok(Some(date_time)) => {
            log::debug!("Device date/time: {}", date_time);
            ctx.device_date_time = Some(date_time);
            processed(ctx)
        }
        Ok(None) => skipped(ctx),
        Err(e) => {
            log::warn!("Failed to read date/time packet: {}", e);
            skipped(ctx)
        }
    }
}

fn read_date_time(payload: &[u8]) -> Result<Option<chrono::NaiveDateTime>> {
    let mut reader = FieldReader::new(payload);
    let second = reader.u8()?;
    let minute = reader.u8()?;
    let hour = reader.u8()?;
    let day = reader.u8()?;
    let month = reader.u8()?;
    let year = reader.u16()?;
    let valid = reader.u8()?;

    if valid != 1 {
        log::warn!("Date/time not marked as valid: {}", valid);
        return Ok(None);
    }

    let date_time = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
        .and_then(|date| date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second)));
    if date_time.is_none() {
        log::warn!(
            "Date/time out of range: {}-{}-{} {}:{}:{}",
            year,
            month,
            day,
            hour,
            minute,
            second
        );
    }
    Ok(date_time)
}

fn handle_config_data(mut ctx: SessionContext, packet: &RawPacket) -> SessionContext {
    let payload = packet.payload();
    let mut reader = FieldReader::new(payload);
    let table_id = match reader.u8() {
        Ok(id) => id,
        Err(e) => {
            log::warn!("Empty config data packet: {}", e);
            return skipped(ctx);
        }
    };

    if table_id != METER_FACTORY_CONFIGURATION {
        log::trace!("Ignoring config table {}", table_id);
        return processed(ctx);
    }

    match read_factory_config(payload) {
        Ok(config) => {
            log::info!(
                "Factory config: unit {:?}, time conversion {}",
                config.unit_of_measure,
                config.time_conversion
            );
            ctx.factory_config = Some(config);
            processed(ctx)
        }
        Err(e) => {
            log::warn!("Failed to read factory config: {}", e);
            skipped(ctx)
        }
    }
}

fn read_factory_config(payload: &[u8]) -> Result<FactoryConfig> {
    let unit_code = FieldReader::at(payload, 1 + UNIT_OF_MEASURE_OFFSET).u8()?;
    let time_conversion = FieldReader::at(payload, 1 + TIME_CONVERSION_OFFSET).i32()?;

    let unit_of_measure = match unit_code {
        0 => Some(Units::MmolPerL),
        1 => Some(Units::MgPerDl),
        other => {
            log::warn!("Unknown unit of measure code {}", other);
            None
        }
    };

    Ok(FactoryConfig {
        unit_of_measure,
        time_conversion,
    })
}

fn handle_compressed_database(mut ctx: SessionContext, packet: &RawPacket) -> SessionContext {
    match decompress::decompress(packet) {
        Ok(Decompressed::Packet(database)) => {
            ctx.summary.containers_decompressed += 1;
            handle_database(ctx, &database)
        }
        Ok(Decompressed::CrcMismatch { .. }) => {
            ctx.summary.containers_rejected += 1;
            processed(ctx)
        }
        Err(e) => {
            log::error!("Failed to decompress database packet: {}", e);
            ctx.summary.containers_rejected += 1;
            ctx.failures.push(PacketFailure {
                op_code: packet.op_code,
                reason: e.to_string(),
            });
            ctx
        }
    }
}

fn handle_database(mut ctx: SessionContext, packet: &RawPacket) -> SessionContext {
    let payload = packet.payload();
    if payload.is_empty() {
        return skipped(ctx);
    }

    let time_conversion = ctx.time_conversion();
    match RecordDecoder::decode(payload, &mut ctx.wrap_table, time_conversion) {
        Ok(RecordOutcome::Record(record)) => {
            ctx.summary.records_decoded += 1;
            ctx.records.push(record);
        }
        Ok(RecordOutcome::WrapAdvanced { .. }) => {
            ctx.summary.wrap_markers += 1;
        }
        Ok(RecordOutcome::Dropped(reason)) => {
            match reason {
                DropReason::UnsupportedType(_) | DropReason::DataQuality(_) => {
                    log::trace!("Dropping record: {}", reason)
                }
                _ => log::warn!("Dropping record: {}", reason),
            }
            ctx.summary.records_dropped += 1;
        }
        Err(e) => {
            log::warn!("Dropping malformed record: {}", e);
            ctx.summary.records_dropped += 1;
        }
    }
    processed(ctx)
}
