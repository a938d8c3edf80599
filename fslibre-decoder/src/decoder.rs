//! Main decoder API
//!
//! This module provides the primary interface for the decoder library.
//! The Decoder struct turns the AAP packets of one reader session into
//! timezone-aware output records.

use crate::builder::DomainRecord;
use crate::config::DecoderConfig;
use crate::dispatcher;
use crate::dump::PacketDump;
use crate::reconciler::Reconciler;
use crate::session::{DecodeSummary, PacketFailure, SessionContext};
use crate::tz::parse_timezone;
use crate::types::{FactoryConfig, RawPacket, Result};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use serde::Serialize;
use std::path::Path;

/// Everything one decode session produced
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeReport {
    pub records: Vec<DomainRecord>,
    /// Reader clock from the date/time packet
    pub device_date_time: Option<NaiveDateTime>,
    pub factory_config: Option<FactoryConfig>,
    pub failures: Vec<PacketFailure>,
    pub summary: DecodeSummary,
}

/// The main decoder struct - entry point for all decoding operations
///
/// Holds configuration only. Every call runs in its own session, so one
/// decoder can serve any number of threads.
#[derive(Debug, Clone)]
pub struct Decoder {
    config: DecoderConfig,
    timezone: Tz,
}

impl Decoder {
    /// Create a new decoder instance
    ///
    /// # Returns
    /// * `Err(DecoderError::InvalidTimezone)` - the configured timezone is not an IANA name
    ///
    /// # Example
    /// ```
    /// use fslibre_decoder::{Decoder, DecoderConfig};
    ///
    /// let decoder = Decoder::new(DecoderConfig::new().with_timezone("Europe/Berlin")).unwrap();
    /// assert!(decoder.decode(&[], 0).unwrap().is_empty());
    /// ```
    pub fn new(config: DecoderConfig) -> Result<Self> {
        let timezone = parse_timezone(&config.timezone)?;
        Ok(Self { config, timezone })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Decode a session's packets into output records
    ///
    /// # Arguments
    /// * `packets` - AAP packets in any order
    /// * `record_count_seed` - current database record count reported by the device
    pub fn decode(
        &self,
        packets: &[RawPacket],
        record_count_seed: u32,
    ) -> Result<Vec<DomainRecord>> {
        Ok(self.decode_session(packets, record_count_seed)?.records)
    }

    /// Decode a session and keep its side information
    pub fn decode_session(
        &self,
        packets: &[RawPacket],
        record_count_seed: u32,
    ) -> Result<DecodeReport> {
        log::info!(
            "Decoding {} packets (record count {}, timezone {})",
            packets.len(),
            record_count_seed,
            self.timezone
        );

        let ctx = self.decode_records(packets, record_count_seed);
        let SessionContext {
            records,
            factory_config,
            device_date_time,
            failures,
            summary,
            ..
        } = ctx;

        let time_conversion = factory_config.map(|config| config.time_conversion);
        let reconciler = Reconciler::new(self.timezone, self.config.strict_time_conversion);
        let records = reconciler.reconcile(records, time_conversion)?;

        log::info!(
            "Session done: {} processed, {} skipped, {} records decoded, {} dropped, {} wrap markers, {} containers ({} rejected)",
            summary.packets_processed,
            summary.packets_skipped,
            summary.records_decoded,
            summary.records_dropped,
            summary.wrap_markers,
            summary.containers_decompressed,
            summary.containers_rejected
        );

        Ok(DecodeReport {
            records,
            device_date_time,
            factory_config,
            failures,
            summary,
        })
    }

    /// Dispatch packets without reconciling them into output records
    pub fn decode_records(&self, packets: &[RawPacket], record_count_seed: u32) -> SessionContext {
        dispatcher::dispatch(packets, record_count_seed)
    }

    /// Decode a JSON packet dump
    pub fn decode_dump(&self, dump: &PacketDump) -> Result<DecodeReport> {
        self.decode_session(&dump.aap_packets, dump.db_record_number)
    }

    /// Load and decode a JSON packet dump file
    ///
    /// # Example
    /// ```no_run
    /// use fslibre_decoder::Decoder;
    /// use std::path::Path;
    ///
    /// let decoder = Decoder::default();
    /// let report = decoder.decode_file(Path::new("reader-dump.json")).unwrap();
    /// println!("{} records", report.records.len());
    /// ```
    pub fn decode_file(&self, path: &Path) -> Result<DecodeReport> {
        log::info!("Decoding packet dump: {:?}", path);
        let dump = PacketDump::from_path(path)?;
        self.decode_dump(&dump)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            config: DecoderConfig::default(),
            timezone: Tz::UTC,
        }
    }
}
