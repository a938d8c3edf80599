//! JSON packet dumps
//!
//! A dump holds every AAP packet read from a reader during one session plus
//! the database record count the reader reported:
//!
//! ```json
//! {
//!   "aapPackets": [{"opCode": 49, "data": {"type": "Buffer", "data": [...]},
//!                   "dataLength": 17, "packetLength": 19}],
//!   "dbRecordNumber": 131072
//! }
//! ```

use crate::types::{DecoderError, RawPacket, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketDump {
    pub aap_packets: Vec<RawPacket>,
    /// Record count seed for the wrap table
    #[serde(default)]
    pub db_record_number: u32,
}

impl PacketDump {
    pub fn new(aap_packets: Vec<RawPacket>, db_record_number: u32) -> Self {
        Self {
            aap_packets,
            db_record_number,
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let dump: Self = serde_json::from_reader(reader)?;
        dump.validate()?;
        Ok(dump)
    }

    /// Every packet must carry at least the bytes its data length declares
    pub fn validate(&self) -> Result<()> {
        for (i, packet) in self.aap_packets.iter().enumerate() {
            if packet.data_length > packet.data.len() {
                return Err(DecoderError::InvalidData(format!(
                    "packet {} ({}) declares {} data bytes but carries {}",
                    i,
                    packet.op_code,
                    packet.data_length,
                    packet.data.len()
                )));
            }
        }
        Ok(())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let dump = Self::from_reader(BufReader::new(file))?;
        log::debug!(
            "Loaded {} packets from {:?} (record count {})",
            dump.aap_packets.len(),
            path,
            dump.db_record_number
        );
        Ok(dump)
    }
}
