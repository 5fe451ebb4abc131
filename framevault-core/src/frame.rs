//! Frames: fixed W x H x 3 pixel grids, and the byte <-> pixel mapping.
//!
//! Data frames: `chunk_index (u32 LE) || packet bytes`, written sequentially over the flattened
//! grid (row-major, channels innermost) and zero-filled to capacity.
//!
//! Metadata frames: one byte per pixel, replicated across the three channels; readers sample
//! channel 0. The first metadata frame holds only the 4-byte LE length of the metadata record in
//! pixels 0..4; the record follows in as many frames as it needs.

use crate::packet::{self, Packet};

/// Bytes of chunk index in front of every data frame's packet.
pub const CHUNK_INDEX_SIZE: usize = 4;

/// Bytes of the metadata length prefix in the first frame.
pub const METADATA_LEN_SIZE: usize = 4;

const CHANNELS: usize = 3;

/// One pixel grid. `pixels` is row-major `(y, x, channel)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// All-zero frame.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * CHANNELS],
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(FrameError::PixelCount {
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte capacity of a data frame.
    pub fn capacity(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, pos: usize, value: u8) {
        let base = pos * CHANNELS;
        self.pixels[base..base + CHANNELS].fill(value);
    }
}

/// A data frame's contents after unpacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub chunk_index: u32,
    pub packet: Vec<u8>,
}

/// Maps packets and metadata bytes onto frames of a fixed resolution.
#[derive(Debug, Clone, Copy)]
pub struct FramePacker {
    width: u32,
    height: u32,
}

impl FramePacker {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn data_capacity(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    /// Metadata bytes per metadata payload frame.
    pub fn metadata_capacity(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn pack_data(&self, chunk_index: u32, packet_bytes: &[u8]) -> Result<Frame, FrameError> {
        let needed = CHUNK_INDEX_SIZE + packet_bytes.len();
        let capacity = self.data_capacity();
        if needed > capacity {
            return Err(FrameError::PayloadTooLarge { needed, capacity });
        }
        let mut frame = Frame::blank(self.width, self.height);
        frame.pixels[..CHUNK_INDEX_SIZE].copy_from_slice(&chunk_index.to_le_bytes());
        frame.pixels[CHUNK_INDEX_SIZE..needed].copy_from_slice(packet_bytes);
        Ok(frame)
    }

    /// Length frame followed by the metadata payload frames.
    pub fn pack_metadata(&self, bytes: &[u8]) -> Result<Vec<Frame>, FrameError> {
        let capacity = self.metadata_capacity();
        if capacity < METADATA_LEN_SIZE {
            return Err(FrameError::PayloadTooLarge {
                needed: METADATA_LEN_SIZE,
                capacity,
            });
        }
        let len = u32::try_from(bytes.len()).map_err(|_| FrameError::PayloadTooLarge {
            needed: bytes.len(),
            capacity: u32::MAX as usize,
        })?;
        let mut frames = Vec::with_capacity(1 + bytes.len().div_ceil(capacity));
        let mut head = Frame::blank(self.width, self.height);
        for (pos, b) in len.to_le_bytes().into_iter().enumerate() {
            head.set_pixel(pos, b);
        }
        frames.push(head);
        for part in bytes.chunks(capacity) {
            let mut frame = Frame::blank(self.width, self.height);
            for (pos, &b) in part.iter().enumerate() {
                frame.set_pixel(pos, b);
            }
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// Reads frames back into bytes, in the same order the packer wrote them.
#[derive(Debug, Clone, Copy)]
pub struct FrameUnpacker {
    width: u32,
    height: u32,
}

impl FrameUnpacker {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn check(&self, frame: &Frame) -> Result<(), FrameError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(FrameError::DimensionMismatch {
                expected: (self.width, self.height),
                got: (frame.width, frame.height),
            });
        }
        Ok(())
    }

    /// Flattened frame bytes with trailing zeros stripped.
    ///
    /// Lossy by construction: a payload that really ends in zero bytes comes back short. Callers
    /// that know their payload layout should use [`FrameUnpacker::unpack_data`] instead.
    pub fn unpack(&self, frame: &Frame) -> Result<Vec<u8>, FrameError> {
        self.check(frame)?;
        let end = frame
            .pixels
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        Ok(frame.pixels[..end].to_vec())
    }

    /// Chunk index and exact packet bytes of a data frame. The length comes from the packet
    /// header and `block_size`, never from the zero padding.
    pub fn unpack_data(&self, frame: &Frame, block_size: usize) -> Result<DataFrame, FrameError> {
        self.check(frame)?;
        let px = &frame.pixels;
        let header_end = CHUNK_INDEX_SIZE + packet::FIXED_HEADER_SIZE;
        if px.len() < header_end {
            return Err(FrameError::Malformed("frame smaller than packet header"));
        }
        let chunk_index = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
        let count = u16::from_le_bytes([px[8], px[9]]) as usize;
        if count == 0 {
            return Err(FrameError::Malformed("packet selects no blocks"));
        }
        let end = CHUNK_INDEX_SIZE + Packet::wire_len(count, block_size);
        if end > px.len() {
            return Err(FrameError::Malformed("packet extends past frame capacity"));
        }
        Ok(DataFrame {
            chunk_index,
            packet: px[CHUNK_INDEX_SIZE..end].to_vec(),
        })
    }

    /// Metadata record length from the first metadata frame.
    pub fn unpack_metadata_len(&self, frame: &Frame) -> Result<usize, FrameError> {
        self.check(frame)?;
        if frame.pixel_count() < METADATA_LEN_SIZE {
            return Err(FrameError::Malformed("frame too small for metadata length"));
        }
        let mut len = [0u8; METADATA_LEN_SIZE];
        for (pos, b) in len.iter_mut().enumerate() {
            *b = frame.pixels[pos * CHANNELS];
        }
        Ok(u32::from_le_bytes(len) as usize)
    }

    /// Channel 0 of every pixel of a metadata payload frame.
    pub fn unpack_metadata(&self, frame: &Frame) -> Result<Vec<u8>, FrameError> {
        self.check(frame)?;
        Ok(frame.pixels.iter().step_by(CHANNELS).copied().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("payload needs {needed} bytes, frame holds {capacity}")]
    PayloadTooLarge { needed: usize, capacity: usize },
    #[error("frame is {got:?}, expected {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("pixel buffer has {got} bytes, expected {expected}")]
    PixelCount { expected: usize, got: usize },
    #[error("malformed data frame: {0}")]
    Malformed(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 8;
    const H: u32 = 4;

    fn sample_packet(payload: Vec<u8>) -> Vec<u8> {
        Packet {
            id: 3,
            indices: vec![0, 2],
            payload,
        }
        .to_bytes()
    }

    #[test]
    fn data_frame_layout() {
        let packet = sample_packet(vec![0xAB; 8]);
        let frame = FramePacker::new(W, H).pack_data(0x0A0B_0C0D, &packet).unwrap();
        assert_eq!(frame.capacity(), 96);
        assert_eq!(&frame.pixels()[..4], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(&frame.pixels()[4..4 + packet.len()], &packet[..]);
        assert!(frame.pixels()[4 + packet.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unpack_data_keeps_trailing_zeros() {
        let mut payload = vec![0x11; 8];
        payload[6] = 0;
        payload[7] = 0;
        let packet = sample_packet(payload);
        let frame = FramePacker::new(W, H).pack_data(7, &packet).unwrap();
        let unpacker = FrameUnpacker::new(W, H);

        let data = unpacker.unpack_data(&frame, 8).unwrap();
        assert_eq!(data.chunk_index, 7);
        assert_eq!(data.packet, packet);

        // The content scan loses the zero tail.
        let scanned = unpacker.unpack(&frame).unwrap();
        assert_eq!(scanned.len(), 4 + packet.len() - 2);
    }

    #[test]
    fn oversize_packet_rejected() {
        let err = FramePacker::new(W, H).pack_data(0, &[1u8; 93]).unwrap_err();
        assert_eq!(
            err,
            FrameError::PayloadTooLarge {
                needed: 97,
                capacity: 96
            }
        );
    }

    #[test]
    fn unpack_data_rejects_garbage() {
        let unpacker = FrameUnpacker::new(W, H);
        assert_eq!(
            unpacker.unpack_data(&Frame::blank(W, H), 8),
            Err(FrameError::Malformed("packet selects no blocks"))
        );
        let mut frame = Frame::blank(W, H);
        frame.pixels_mut()[8] = 200;
        assert!(matches!(
            unpacker.unpack_data(&frame, 8),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn metadata_spans_frames() {
        let packer = FramePacker::new(W, H);
        let bytes: Vec<u8> = (1..=70).collect();
        let frames = packer.pack_metadata(&bytes).unwrap();
        // Length frame + ceil(70 / 32) payload frames.
        assert_eq!(frames.len(), 4);

        let unpacker = FrameUnpacker::new(W, H);
        assert_eq!(unpacker.unpack_metadata_len(&frames[0]).unwrap(), 70);
        assert_eq!(&frames[0].pixels()[..3], &[70, 70, 70]);

        let mut out = Vec::new();
        for f in &frames[1..] {
            out.extend(unpacker.unpack_metadata(f).unwrap());
        }
        out.truncate(70);
        assert_eq!(out, bytes);
    }

    #[test]
    fn empty_metadata_is_length_frame_only() {
        let frames = FramePacker::new(W, H).pack_metadata(&[]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(FrameUnpacker::new(W, H).unpack_metadata_len(&frames[0]).unwrap(), 0);
    }

    #[test]
    fn dimension_mismatch() {
        let frame = Frame::blank(4, 4);
        assert!(matches!(
            FrameUnpacker::new(W, H).unpack(&frame),
            Err(FrameError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            Frame::from_pixels(W, H, vec![0; 5]),
            Err(FrameError::PixelCount {
                expected: 96,
                got: 5
            })
        ));
    }
}
