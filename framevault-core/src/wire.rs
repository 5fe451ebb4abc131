//! Container header framing: length-prefix (4 bytes LE) + bincode payload.

use serde::{Deserialize, Serialize};

const LEN_SIZE: usize = 4;
const MAX_HEADER_LEN: u32 = 64 * 1024;

/// Largest frame a container may describe (1 GiB of pixel bytes).
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Magic bytes identifying a raw frame container.
pub const CONTAINER_MAGIC: [u8; 8] = *b"FVFRAMES";

/// Current container format version.
pub const CONTAINER_VERSION: u8 = 1;

/// Leading record of a raw frame container: geometry every frame in the file shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub magic: [u8; 8],
    pub version: u8,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl ContainerHeader {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            magic: CONTAINER_MAGIC,
            version: CONTAINER_VERSION,
            width,
            height,
            fps,
        }
    }

    /// Size in bytes of one frame described by this header, or `None` if it
    /// overflows or exceeds [`MAX_FRAME_LEN`].
    pub fn frame_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|px| px.checked_mul(3))
            .filter(|&len| len <= MAX_FRAME_LEN)
    }
}

/// Encode a header: 4 bytes LE length + bincode payload.
pub fn encode_header(header: &ContainerHeader) -> Result<Vec<u8>, HeaderEncodeError> {
    let payload = bincode::serialize(header).map_err(HeaderEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_HEADER_LEN {
        return Err(HeaderEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a header (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum HeaderEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("header too large")]
    TooLarge,
}

/// Decode a header from the front of `bytes`. Returns the header and the number of bytes consumed.
/// Returns `NeedMore` if the buffer does not yet hold the whole header.
pub fn decode_header(bytes: &[u8]) -> Result<(ContainerHeader, usize), HeaderDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(HeaderDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_HEADER_LEN as usize {
        return Err(HeaderDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(HeaderDecodeError::NeedMore);
    }
    let header: ContainerHeader = bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len])
        .map_err(HeaderDecodeError::Decode)?;
    if header.magic != CONTAINER_MAGIC {
        return Err(HeaderDecodeError::BadMagic);
    }
    if header.version != CONTAINER_VERSION {
        return Err(HeaderDecodeError::Version(header.version));
    }
    Ok((header, LEN_SIZE + len))
}

/// Error decoding a header.
#[derive(Debug, thiserror::Error)]
pub enum HeaderDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("header too large")]
    TooLarge,
    #[error("not a frame container")]
    BadMagic,
    #[error("unsupported container version {0}")]
    Version(u8),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
