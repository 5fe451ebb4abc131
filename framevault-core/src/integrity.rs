//! Integrity: per-chunk CRC32 tag, verify on reassembly.

/// Size of the integrity tag prefixed to every chunk.
pub const TAG_SIZE: usize = 4;

/// CRC32 (IEEE, zlib-compatible) of a chunk payload.
pub fn crc32(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Verify chunk payload against expected checksum.
pub fn verify(payload: &[u8], expected: u32) -> bool {
    crc32(payload) == expected
}
