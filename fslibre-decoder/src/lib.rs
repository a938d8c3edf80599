//! FreeStyle Libre Decoder Library
//!
//! A stateless library that decodes the AAP packets read from a FreeStyle Libre
//! reader into timezone-aware glucose, ketone and clock change records.
//!
//! # Architecture
//!
//! Packets flow through a fixed pipeline:
//! - The dispatcher groups packets by op code and handles clock and factory
//!   configuration before any database content
//! - Compressed database containers are expanded and checked against their CRC32
//! - Database records are checked against their CRC16 and get their full
//!   32-bit record number back from a per-table wrap boundary
//! - The reconciler orders records, repairs ordering around clock changes and
//!   builds output records with UTC times and out-of-range annotations
//!
//! The library does NOT:
//! - Talk to the device (USB/HID transport, command sessions)
//! - Upload or persist results
//!
//! # Example Usage
//!
//! ```no_run
//! use fslibre_decoder::{Decoder, DecoderConfig, PacketDump};
//! use std::path::Path;
//!
//! let config = DecoderConfig::new().with_timezone("Europe/Berlin");
//! let decoder = Decoder::new(config).unwrap();
//!
//! let dump = PacketDump::from_path(Path::new("reader-dump.json")).unwrap();
//! let records = decoder.decode(&dump.aap_packets, dump.db_record_number).unwrap();
//!
//! for record in records {
//!     println!("{} at {}", record.kind.type_name(), record.time);
//! }
//! ```

// Public modules
pub mod builder;
pub mod config;
pub mod crc;
pub mod decoder;
pub mod decompress;
pub mod dispatcher;
pub mod dump;
pub mod reconciler;
pub mod record_decoder;
pub mod session;
pub mod tz;
pub mod types;

// Re-export main types for convenience
pub use builder::{Annotation, DomainRecord, RecordBuilder, RecordKind, TimeChange};
pub use config::DecoderConfig;
pub use decoder::{DecodeReport, Decoder};
pub use dump::PacketDump;
pub use record_decoder::WrapTable;
pub use session::{DecodeSummary, PacketFailure, SessionContext};
pub use tz::TimezoneOffsetUtil;
pub use types::{
    DecodedRecord, DecoderError, FactoryConfig, OpCode, RawPacket, RecordBody, RecordType,
    Result, Units,
};

// Internal modules (not exposed in public API)
mod codec;

#[cfg(test)]
mod test_support;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: a default decoder handles an empty session
        let decoder = Decoder::default();
        assert!(decoder.decode(&[], 0).unwrap().is_empty());
        assert!(!VERSION.is_empty());
    }
}
