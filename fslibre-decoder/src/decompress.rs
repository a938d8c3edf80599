//! Compressed database decoder
//!
//! A compressed database packet carries one table as a sequence of blocks:
//!
//! ```text
//! [table id: u8] { [block type: u8][length: u24 LE, in 32-bit words] [data] }* [crc32: u32 LE]
//! ```
//!
//! Uncompressed blocks carry their bytes inline. Zero-compressed blocks carry
//! no data and expand to `length` zero bytes. The trailing CRC-32 covers the
//! fully expanded buffer.

use crate::codec::FieldReader;
use crate::crc;
use crate::types::{DecoderError, OpCode, RawPacket, Result};

const CRC32_LENGTH: usize = 4;

/// Upper bound on one expanded table; well above a full reader database
pub const MAX_EXPANDED_LEN: usize = 4 * 1024 * 1024;

/// Compression block types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Uncompressed,
    ZeroCompressed,
}

impl BlockType {
    pub const UNCOMPRESSED: u8 = 0;
    pub const ZERO_COMPRESSED: u8 = 1;

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            Self::UNCOMPRESSED => Some(BlockType::Uncompressed),
            Self::ZERO_COMPRESSED => Some(BlockType::ZeroCompressed),
            _ => None,
        }
    }
}

/// Result of expanding a compressed database packet
#[derive(Debug, Clone, PartialEq)]
pub enum Decompressed {
    /// CRC-32 matched; the expanded table as a database packet
    Packet(RawPacket),
    /// CRC-32 did not match; the container must be dropped
    CrcMismatch { stored: u32, computed: u32 },
}

/// Expand the block stream following the table id
///
/// Returns the expanded buffer and the offset of the trailing CRC-32.
pub fn expand_blocks(payload: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
    let mut reader = FieldReader::at(payload, start);
    let mut expanded = Vec::new();

    while reader.remaining() > CRC32_LENGTH {
        let block_offset = reader.position();
        let block_type = reader.u8()?;
        let length = reader.u24()? as usize * 4;

        if expanded.len() + length > MAX_EXPANDED_LEN {
            log::error!(
                "Failed to decompress: block at offset {} grows the table past {} bytes",
                block_offset,
                MAX_EXPANDED_LEN
            );
            return Err(DecoderError::InvalidData(format!(
                "expanded table exceeds {} bytes at block offset {}",
                MAX_EXPANDED_LEN, block_offset
            )));
        }

        match BlockType::from_u8(block_type) {
            Some(BlockType::Uncompressed) => {
                expanded.extend_from_slice(reader.bytes(length)?);
            }
            Some(BlockType::ZeroCompressed) => {
                expanded.resize(expanded.len() + length, 0);
            }
            None => {
                log::error!(
                    "Failed to decompress: unknown block type 0x{:02X} at offset {}",
                    block_type,
                    block_offset
                );
                return Err(DecoderError::UnknownBlockType {
                    block_type,
                    offset: block_offset,
                });
            }
        }
        log::trace!(
            "Block at {}: type {} expands to {} bytes",
            block_offset,
            block_type,
            length
        );
    }

    Ok((expanded, reader.position()))
}

/// Decompress a `CompressedDatabase` packet
///
/// # Returns
/// * `Ok(Decompressed::Packet)` - a `GetDatabase` packet with payload `[table id] ++ expanded`
/// * `Ok(Decompressed::CrcMismatch)` - the expanded data failed its CRC-32 check
/// * `Err(_)` - unknown block type, truncated block stream or oversized table
pub fn decompress(packet: &RawPacket) -> Result<Decompressed> {
    let payload = packet.payload();
    let table_id = FieldReader::new(payload).u8()?;

    let (expanded, crc_offset) = expand_blocks(payload, 1)?;

    let stored = FieldReader::at(payload, crc_offset).u32()?;
    let computed = crc::crc32(&expanded);
    if stored != computed {
        log::warn!(
            "Dropping compressed table {}: CRC-32 mismatch (stored 0x{:08X}, computed 0x{:08X})",
            table_id,
            stored,
            computed
        );
        return Ok(Decompressed::CrcMismatch { stored, computed });
    }

    log::debug!(
        "Decompressed table {}: {} -> {} bytes",
        table_id,
        payload.len(),
        expanded.len()
    );

    let mut data = Vec::with_capacity(expanded.len() + 1);
    data.push(table_id);
    data.extend_from_slice(&expanded);

    Ok(Decompressed::Packet(RawPacket {
        op_code: OpCode::GetDatabase,
        packet_length: (packet.packet_length.saturating_sub(packet.data_length)) + expanded.len(),
        data_length: data.len(),
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(block_type: u8, words: u32, data: &[u8]) -> Vec<u8> {
        let mut out = vec![block_type];
        out.extend_from_slice(&words.to_le_bytes()[..3]);
        out.extend_from_slice(data);
        out
    }

    fn container(table_id: u8, blocks: &[Vec<u8>], crc32: u32) -> RawPacket {
        let mut data = vec![table_id];
        for b in blocks {
            data.extend_from_slice(b);
        }
        data.extend_from_slice(&crc32.to_le_bytes());
        RawPacket::new(OpCode::CompressedDatabase, data)
    }

    #[test]
    fn test_uncompressed_block_round_trip() {
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let packet = container(2, &[block(0, 2, &bytes)], crc::crc32(&bytes));

        match decompress(&packet).unwrap() {
            Decompressed::Packet(db) => {
                assert_eq!(db.op_code, OpCode::GetDatabase);
                assert_eq!(db.payload(), &[2, 1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_block_expands_without_source_data() {
        let packet = container(0, &[block(1, 2, &[])], crc::crc32(&[0u8; 8]));

        match decompress(&packet).unwrap() {
            Decompressed::Packet(db) => assert_eq!(&db.payload()[1..], &[0u8; 8]),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_mixed_blocks_concatenate() {
        let expected = [9u8, 9, 9, 9, 0, 0, 0, 0, 7, 7, 7, 7];
        let packet = container(
            3,
            &[block(0, 1, &[9; 4]), block(1, 1, &[]), block(0, 1, &[7; 4])],
            crc::crc32(&expected),
        );

        match decompress(&packet).unwrap() {
            Decompressed::Packet(db) => assert_eq!(&db.payload()[1..], &expected),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_trailer_is_rejected() {
        let bytes = [1u8, 2, 3, 4];
        let good = crc::crc32(&bytes);
        let packet = container(2, &[block(0, 1, &bytes)], good ^ 0x1);

        assert_eq!(
            decompress(&packet).unwrap(),
            Decompressed::CrcMismatch {
                stored: good ^ 0x1,
                computed: good
            }
        );
    }

    #[test]
    fn test_unknown_block_type_aborts() {
        let packet = container(2, &[block(7, 1, &[0; 4])], 0);
        match decompress(&packet) {
            Err(DecoderError::UnknownBlockType { block_type, offset }) => {
                assert_eq!(block_type, 7);
                assert_eq!(offset, 1);
            }
            other => panic!("expected block type error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_expansion_is_rejected() {
        let max_words = 0x00FF_FFFF;
        let blocks = vec![block(1, max_words, &[]); 4];
        let packet = container(2, &blocks, 0);
        assert!(matches!(
            decompress(&packet),
            Err(DecoderError::InvalidData(_))
        ));

        let mut reader_sized = vec![block(1, (MAX_EXPANDED_LEN / 4) as u32, &[])];
        let packet = container(2, &reader_sized, crc::crc32(&vec![0u8; MAX_EXPANDED_LEN]));
        assert!(matches!(decompress(&packet), Ok(Decompressed::Packet(_))));

        reader_sized.push(block(1, 1, &[]));
        let packet = container(2, &reader_sized, 0);
        assert!(matches!(
            decompress(&packet),
            Err(DecoderError::InvalidData(_))
        ));
    }

    #[test]
    fn test_block_longer_than_payload_is_truncated() {
        let packet = container(2, &[block(0, 4, &[1, 2, 3, 4])], 0);
        assert!(matches!(
            decompress(&packet),
            Err(DecoderError::Truncated { .. })
        ));
    }
}
