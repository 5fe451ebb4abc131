//! Fountain packet wire format:
//! `packet_id (u32 LE) || block_count (u16 LE) || block_index[block_count] (u16 LE) || payload`.

/// Fixed part of the header: packet id + block count.
pub const FIXED_HEADER_SIZE: usize = 6;

/// One erasure-coded unit: XOR of the blocks listed in `indices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u32,
    /// Sorted, distinct block indices combined into `payload`.
    pub indices: Vec<u16>,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Header size for a packet combining `block_count` blocks.
    pub fn header_len(block_count: usize) -> usize {
        FIXED_HEADER_SIZE + 2 * block_count
    }

    /// Exact encoded length of a packet.
    pub fn wire_len(block_count: usize, block_size: usize) -> usize {
        Self::header_len(block_count) + block_size
    }

    pub fn degree(&self) -> usize {
        self.indices.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::header_len(self.indices.len()) + self.payload.len());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&(self.indices.len() as u16).to_le_bytes());
        for idx in &self.indices {
            out.extend_from_slice(&idx.to_le_bytes());
        }
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a packet. A payload shorter than `block_size` is zero-extended: lossy framing can only
    /// ever drop trailing zero bytes. A longer payload is rejected.
    pub fn from_bytes(bytes: &[u8], block_size: usize) -> Result<Self, PacketError> {
        if bytes.len() < FIXED_HEADER_SIZE {
            return Err(PacketError::Truncated);
        }
        let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let count = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;
        if count == 0 {
            return Err(PacketError::EmptySelection { id });
        }
        let header_len = Self::header_len(count);
        if bytes.len() < header_len {
            return Err(PacketError::Truncated);
        }
        let indices = bytes[FIXED_HEADER_SIZE..header_len]
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        let body = &bytes[header_len..];
        if body.len() > block_size {
            return Err(PacketError::PayloadTooLong {
                len: body.len(),
                block_size,
            });
        }
        let mut payload = body.to_vec();
        payload.resize(block_size, 0);
        Ok(Self {
            id,
            indices,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("packet truncated")]
    Truncated,
    #[error("packet {id} selects no blocks")]
    EmptySelection { id: u32 },
    #[error("packet payload is {len} bytes, block size is {block_size}")]
    PayloadTooLong { len: usize, block_size: usize },
}
