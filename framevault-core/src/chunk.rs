//! Chunk codec: split payload into CRC-tagged chunks, verify and reassemble.

use crate::integrity::{self, TAG_SIZE};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024; // 64 KiB

/// One payload slice with its integrity tag. Wire format: `crc32 (LE) || data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub crc: u32,
    pub data: Vec<u8>,
}

impl Chunk {
    /// Tag a raw slice.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            crc: integrity::crc32(&data),
            data,
        }
    }

    /// Length of the chunk on the wire (tag included).
    pub fn wire_len(&self) -> usize {
        TAG_SIZE + self.data.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&self.crc.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse a tagged chunk. The tag is not checked here; see [`reassemble`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChunkError> {
        if bytes.len() < TAG_SIZE {
            return Err(ChunkError::Truncated { len: bytes.len() });
        }
        let crc = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(Self {
            crc,
            data: bytes[TAG_SIZE..].to_vec(),
        })
    }

    pub fn is_valid(&self) -> bool {
        integrity::verify(&self.data, self.crc)
    }
}

/// Split a payload into chunks of `chunk_size` raw bytes; the last chunk holds the remainder,
/// unpadded. `chunk_size == 0` falls back to [`DEFAULT_CHUNK_SIZE`].
pub fn split(data: &[u8], chunk_size: usize) -> Vec<Chunk> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    data.chunks(size).map(|c| Chunk::new(c.to_vec())).collect()
}

/// Number of chunks `split` produces for a payload of `total_len` bytes.
pub fn chunk_count(total_len: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_len.div_ceil(chunk_size)
}

/// Raw (untagged) length of chunk `index` for a payload of `total_len` bytes.
/// Returns `None` when `index` is past the last chunk.
pub fn expected_chunk_len(total_len: u64, chunk_size: u64, index: u64) -> Option<usize> {
    let start = index.checked_mul(chunk_size)?;
    if start >= total_len {
        return None;
    }
    let len = (total_len - start).min(chunk_size);
    usize::try_from(len).ok()
}

/// Verify every chunk in order and concatenate the raw slices.
pub fn reassemble(chunks: &[Chunk]) -> Result<Vec<u8>, IntegrityMismatch> {
    let total: usize = chunks.iter().map(|c| c.data.len()).sum();
    let mut out = Vec::with_capacity(total);
    for (index, chunk) in chunks.iter().enumerate() {
        if !chunk.is_valid() {
            return Err(IntegrityMismatch { index });
        }
        out.extend_from_slice(&chunk.data);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk truncated: {len} bytes is shorter than the integrity tag")]
    Truncated { len: usize },
}

/// First chunk whose data does not match its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("integrity mismatch in chunk {index}")]
pub struct IntegrityMismatch {
    pub index: usize,
}
