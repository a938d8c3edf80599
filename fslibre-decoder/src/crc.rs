//! CRC engine
//!
//! The reader protects every database record with a 16-bit CRC of its own
//! flavour: the reflected CCITT table (polynomial `0x8408`) driven from an
//! initial residue of `0xFFFF`, with the final residue emitted in reversed bit
//! order. Decompressed database tables are protected with a standard CRC-32.

/// CRC16 lookup table (reflected CCITT polynomial 0x8408).
const CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0u16;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// Compute the record CRC16 over the given data.
pub fn crc16(data: &[u8]) -> u16 {
    let mut residue: u16 = 0xFFFF;
    for &byte in data {
        let index = ((residue & 0xFF) as u8 ^ byte) as usize;
        residue = (residue >> 8) ^ CRC16_TABLE[index];
    }
    residue.reverse_bits()
}

/// Check `data` against a stored CRC16.
///
/// A mismatch is a validation failure, logged and reported as `false`.
pub fn check16(data: &[u8], expected: u16) -> bool {
    let computed = crc16(data);
    if computed != expected {
        log::debug!(
            "CRC16 mismatch: stored 0x{:04X}, computed 0x{:04X}",
            expected,
            computed
        );
        return false;
    }
    true
}

/// Compute the standard CRC-32 over the given data.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
