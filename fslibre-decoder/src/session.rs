//! Per-call decoding state
//!
//! Everything one decode call accumulates lives in a `SessionContext` that is
//! moved through the packet handlers. Nothing is shared between calls.

use crate::record_decoder::WrapTable;
use crate::types::{DecodedRecord, FactoryConfig, OpCode};
use chrono::NaiveDateTime;
use serde::Serialize;

/// A packet that could not be processed at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketFailure {
    pub op_code: OpCode,
    pub reason: String,
}

/// Counters collected while dispatching packets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeSummary {
    pub packets_processed: usize,
    pub packets_skipped: usize,
    pub records_decoded: usize,
    pub records_dropped: usize,
    pub wrap_markers: usize,
    pub containers_decompressed: usize,
    pub containers_rejected: usize,
}

/// State of one decode call
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub records: Vec<DecodedRecord>,
    pub factory_config: Option<FactoryConfig>,
    pub wrap_table: WrapTable,
    /// Reader clock as reported by the date/time packet
    pub device_date_time: Option<NaiveDateTime>,
    pub failures: Vec<PacketFailure>,
    pub summary: DecodeSummary,
}

impl SessionContext {
    /// Start a session whose wrap boundaries derive from the device record count
    pub fn new(record_count_seed: u32) -> Self {
        Self {
            wrap_table: WrapTable::seeded(record_count_seed),
            ..Self::default()
        }
    }

    pub fn time_conversion(&self) -> Option<i32> {
        self.factory_config.map(|config| config.time_conversion)
    }
}
