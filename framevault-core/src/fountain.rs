//! Per-chunk rateless erasure code: XOR fountain encoder and peeling decoder.
//!
//! A chunk is cut into fixed-size blocks (the last one zero-padded). The encoder emits
//! `ceil(num_blocks * redundancy)` packets. Packets `0..num_blocks` are systematic: packet `i`
//! carries block `i` alone. Every later packet is a repair packet.
//!
//! Repair packets come in layers. Blocks are laid out in a grid of `rows <= max_degree` rows and
//! `groups = ceil(num_blocks / max_degree)` columns, block `b` at `(b / groups, b % groups)`.
//! Layer `l` has `groups` packets; packet `q` of layer `l` XORs the blocks `(r, c)` with
//! `(c + l * r) % groups == q`, one per row. Every layer covers each block exactly once, and two
//! layers `l != l'` share a pair of blocks only if `groups` divides `(l - l') * (r - r')`. The
//! selection travels in the packet header, so the decoder never recomputes it.
//!
//! The decoder is a peeling (belief-propagation) decoder, not Gaussian elimination. With `m`
//! complete, pairwise disjoint-pair layers it resolves any pattern of up to `m` lost packets
//! (see [`guaranteed_losses`]); more losses may or may not decode.

use std::collections::HashSet;

use crate::packet::{Packet, PacketError};

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Upper bound on blocks combined into one packet.
pub const MAX_DEGREE: usize = 3;

/// Default cap on full peeling passes.
pub const DEFAULT_MAX_PASSES: usize = 100;

/// Largest block count addressable by the u16 indices of the packet header.
pub const MAX_BLOCKS: usize = u16::MAX as usize;

/// Number of blocks a chunk of `len` bytes occupies.
pub fn block_count(len: usize, block_size: usize) -> usize {
    len.div_ceil(block_size)
}

/// Packets generated for `num_blocks` blocks: `ceil(num_blocks * redundancy)`, never fewer than
/// `num_blocks`.
pub fn packet_count(num_blocks: usize, redundancy: f64) -> usize {
    // Absorb float noise such as 10 * 1.3 = 13.000000000000002.
    let wanted = (num_blocks as f64 * redundancy - 1e-9).ceil();
    (wanted.max(0.0) as usize).max(num_blocks)
}

/// `(groups, rows)` of the repair grid.
fn grid(num_blocks: usize, max_degree: usize) -> (usize, usize) {
    let degree = max_degree.clamp(1, num_blocks);
    let groups = num_blocks.div_ceil(degree);
    (groups, num_blocks.div_ceil(groups))
}

/// Block set of packet `packet_id`, ascending. Pure and reproducible for a given
/// `(packet_id, num_blocks, max_degree)`: ids below `num_blocks` are systematic, the rest walk
/// the repair layers.
pub fn select_blocks(packet_id: u32, num_blocks: usize, max_degree: usize) -> Vec<u16> {
    if num_blocks == 0 {
        return Vec::new();
    }
    let id = packet_id as usize;
    if id < num_blocks {
        return vec![id as u16];
    }
    let (groups, rows) = grid(num_blocks, max_degree);
    let repair = id - num_blocks;
    let shear = (repair / groups) % groups;
    let group = repair % groups;
    (0..rows)
        .map(|row| row * groups + (group + groups - shear * row % groups) % groups)
        .filter(|&b| b < num_blocks)
        .map(|b| b as u16)
        .collect()
}

/// Lost packets the peeling decoder always survives, whichever ones they are, for a chunk of
/// `num_blocks` blocks sent as `packet_count` packets: the number of complete repair layers whose
/// groups pairwise share at most one block.
///
/// At most about `3 * (redundancy - 1)`: a block sits in one repair packet per layer, and losing
/// its systematic packet together with all of those is unrecoverable.
pub fn guaranteed_losses(num_blocks: usize, packet_count: usize) -> usize {
    if num_blocks == 0 {
        return 0;
    }
    let (groups, rows) = grid(num_blocks, MAX_DEGREE);
    let layers = packet_count.saturating_sub(num_blocks) / groups;
    if rows <= 1 {
        return layers;
    }
    let disjoint_pairs = (groups - 1) / (rows - 1) + 1;
    layers.min(disjoint_pairs)
}

fn xor_into(acc: &mut [u8], block: &[u8]) {
    for (a, b) in acc.iter_mut().zip(block) {
        *a ^= b;
    }
}

/// Encoder for one chunk.
pub struct FountainEncoder {
    blocks: Vec<Vec<u8>>,
    block_size: usize,
    redundancy: f64,
}

impl FountainEncoder {
    /// Partition `data` into blocks of `block_size` bytes, zero-padding the last one.
    pub fn new(data: &[u8], block_size: usize, redundancy: f64) -> Result<Self, FountainError> {
        if data.is_empty() {
            return Err(FountainError::EmptyInput);
        }
        if block_size == 0 {
            return Err(FountainError::ZeroBlockSize);
        }
        let num_blocks = block_count(data.len(), block_size);
        if num_blocks > MAX_BLOCKS {
            return Err(FountainError::TooManyBlocks { num_blocks });
        }
        let blocks = data
            .chunks(block_size)
            .map(|b| {
                let mut block = b.to_vec();
                block.resize(block_size, 0);
                block
            })
            .collect();
        Ok(Self {
            blocks,
            block_size,
            redundancy: redundancy.max(1.0),
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn packet_count(&self) -> usize {
        packet_count(self.num_blocks(), self.redundancy)
    }

    /// Build packet `id`. Ids past `packet_count()` are valid too (the code is rateless).
    pub fn packet(&self, id: u32) -> Packet {
        let indices = select_blocks(id, self.num_blocks(), MAX_DEGREE);
        let mut payload = vec![0u8; self.block_size];
        for &idx in &indices {
            xor_into(&mut payload, &self.blocks[idx as usize]);
        }
        Packet {
            id,
            indices,
            payload,
        }
    }

    /// All packets for this chunk, in packing order.
    pub fn encode(&self) -> Vec<Packet> {
        (0..self.packet_count() as u32).map(|id| self.packet(id)).collect()
    }
}

/// Peeling decoder for one chunk. Accepts packets in any order; duplicates are ignored.
pub struct FountainDecoder {
    num_blocks: usize,
    block_size: usize,
    max_passes: usize,
    packets: Vec<Packet>,
    seen: HashSet<u32>,
}

impl FountainDecoder {
    pub fn new(num_blocks: usize, block_size: usize, max_passes: usize) -> Self {
        Self {
            num_blocks,
            block_size,
            max_passes: max_passes.max(1),
            packets: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Add a parsed packet. Returns `Ok(false)` for a duplicate id.
    pub fn add_packet(&mut self, packet: Packet) -> Result<bool, FountainError> {
        if packet.payload.len() != self.block_size {
            return Err(FountainError::BlockSizeMismatch {
                packet: packet.id,
                len: packet.payload.len(),
                block_size: self.block_size,
            });
        }
        if let Some(&index) = packet
            .indices
            .iter()
            .find(|&&i| i as usize >= self.num_blocks)
        {
            return Err(FountainError::IndexOutOfRange {
                packet: packet.id,
                index,
                num_blocks: self.num_blocks,
            });
        }
        if !self.seen.insert(packet.id) {
            return Ok(false);
        }
        self.packets.push(packet);
        Ok(true)
    }

    /// Parse and add a packet from its wire bytes.
    pub fn add_packet_bytes(&mut self, bytes: &[u8]) -> Result<bool, FountainError> {
        let packet = Packet::from_bytes(bytes, self.block_size)?;
        self.add_packet(packet)
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Resolve all blocks. Returns `num_blocks * block_size` bytes (tail padding included) or
    /// [`FountainError::Insufficient`]; never a partial result.
    pub fn decode(&self) -> Result<Vec<u8>, FountainError> {
        let mut known: Vec<Option<Vec<u8>>> = vec![None; self.num_blocks];
        let mut resolved = 0usize;

        for packet in self.packets.iter().filter(|p| p.degree() == 1) {
            let slot = &mut known[packet.indices[0] as usize];
            if slot.is_none() {
                *slot = Some(packet.payload.clone());
                resolved += 1;
            }
        }

        let mut passes = 0;
        while resolved < self.num_blocks && passes < self.max_passes {
            passes += 1;
            let mut progress = false;
            for packet in &self.packets {
                let mut unknown = packet
                    .indices
                    .iter()
                    .filter(|&&i| known[i as usize].is_none());
                let (Some(&target), None) = (unknown.next(), unknown.next()) else {
                    continue;
                };
                let mut block = packet.payload.clone();
                for &idx in &packet.indices {
                    if let Some(k) = &known[idx as usize] {
                        xor_into(&mut block, k);
                    }
                }
                known[target as usize] = Some(block);
                resolved += 1;
                progress = true;
            }
            if !progress {
                break;
            }
        }

        if resolved < self.num_blocks {
            return Err(FountainError::Insufficient {
                resolved,
                total: self.num_blocks,
            });
        }
        tracing::trace!(blocks = self.num_blocks, passes, "peeling decode complete");
        let mut out = Vec::with_capacity(self.num_blocks * self.block_size);
        for block in known.into_iter().flatten() {
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FountainError {
    #[error("cannot fountain-encode an empty chunk")]
    EmptyInput,
    #[error("block size must be non-zero")]
    ZeroBlockSize,
    #[error("chunk needs {num_blocks} blocks, packet header addresses at most 65535")]
    TooManyBlocks { num_blocks: usize },
    #[error("packet {packet} references block {index}, chunk has {num_blocks} blocks")]
    IndexOutOfRange {
        packet: u32,
        index: u16,
        num_blocks: usize,
    },
    #[error("packet {packet} payload is {len} bytes, block size is {block_size}")]
    BlockSizeMismatch {
        packet: u32,
        len: usize,
        block_size: usize,
    },
    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),
    #[error("insufficient packets: resolved {resolved} of {total} blocks")]
    Insufficient { resolved: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    fn decoder_for(enc: &FountainEncoder) -> FountainDecoder {
        FountainDecoder::new(enc.num_blocks(), enc.block_size(), DEFAULT_MAX_PASSES)
    }

    fn decode_subset(enc: &FountainEncoder, packets: &[Packet]) -> Result<Vec<u8>, FountainError> {
        let mut dec = decoder_for(enc);
        for p in packets {
            dec.add_packet(p.clone()).unwrap();
        }
        dec.decode()
    }

    #[test]
    fn counts() {
        assert_eq!(block_count(1, 16), 1);
        assert_eq!(block_count(32, 16), 2);
        assert_eq!(block_count(33, 16), 3);
        assert_eq!(packet_count(10, 1.0), 10);
        assert_eq!(packet_count(10, 1.3), 13);
        assert_eq!(packet_count(3, 1.1), 4);
        assert_eq!(packet_count(5, 0.5), 5);
    }

    #[test]
    fn selection_is_deterministic_and_bounded() {
        for n in [1usize, 2, 3, 7, 10, 65] {
            for id in 0..300u32 {
                let a = select_blocks(id, n, 3);
                assert_eq!(a, select_blocks(id, n, 3));
                assert!((1..=3).contains(&a.len()));
                assert!(a.windows(2).all(|w| w[0] < w[1]));
                assert!(a.iter().all(|&i| (i as usize) < n));
            }
        }
        assert_eq!(select_blocks(9, 1, 3), vec![0]);
        assert!(select_blocks(9, 0, 3).is_empty());
    }

    #[test]
    fn every_layer_covers_each_block_once() {
        for n in [1usize, 2, 3, 4, 7, 10, 65, 100] {
            let groups = n.div_ceil(MAX_DEGREE.min(n));
            for layer in 0..3 {
                let mut seen = vec![0; n];
                for q in 0..groups {
                    let id = (n + layer * groups + q) as u32;
                    for i in select_blocks(id, n, MAX_DEGREE) {
                        seen[i as usize] += 1;
                    }
                }
                assert!(seen.iter().all(|&c| c == 1), "n = {n}, layer = {layer}");
            }
        }
    }

    #[test]
    fn interleaved_groups() {
        // 10 blocks: 4 groups over 3 rows.
        let layer = |l: usize| -> Vec<Vec<u16>> {
            (0..4).map(|q| select_blocks((10 + 4 * l + q) as u32, 10, 3)).collect()
        };
        assert_eq!(layer(0), vec![vec![0, 4, 8], vec![1, 5, 9], vec![2, 6], vec![3, 7]]);
        assert_eq!(layer(1), vec![vec![0, 7], vec![1, 4], vec![2, 5, 8], vec![3, 6, 9]]);
    }

    #[test]
    fn loss_bounds() {
        assert_eq!(guaranteed_losses(0, 0), 0);
        assert_eq!(guaranteed_losses(65, 65), 0);
        // Default redundancy 1.3: 20 repairs cannot cover 65 blocks at degree 3.
        assert_eq!(guaranteed_losses(65, 85), 0);
        assert_eq!(guaranteed_losses(65, 88), 1);
        assert_eq!(guaranteed_losses(65, 111), 2);
        assert_eq!(guaranteed_losses(65, 130), 2);
        assert_eq!(guaranteed_losses(10, 20), 2);
        assert_eq!(guaranteed_losses(2, 6), 1);
        assert_eq!(guaranteed_losses(1, 2), 1);
    }

    #[test]
    fn systematic_prefix() {
        let enc = FountainEncoder::new(&payload(100), 16, 1.5).unwrap();
        assert_eq!(enc.num_blocks(), 7);
        let packets = enc.encode();
        assert_eq!(packets.len(), 11);
        for (i, p) in packets.iter().take(7).enumerate() {
            assert_eq!(p.indices, vec![i as u16]);
        }
    }

    #[test]
    fn last_block_zero_padded() {
        let data = payload(20);
        let enc = FountainEncoder::new(&data, 16, 1.0).unwrap();
        let last = enc.packet(1);
        assert_eq!(&last.payload[..4], &data[16..]);
        assert!(last.payload[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn repair_payload_is_xor_of_selection() {
        let data = payload(64);
        let enc = FountainEncoder::new(&data, 16, 3.0).unwrap();
        for id in 4..12u32 {
            let p = enc.packet(id);
            let mut expect = vec![0u8; 16];
            for &i in &p.indices {
                xor_into(&mut expect, &data[i as usize * 16..(i as usize + 1) * 16]);
            }
            assert_eq!(p.payload, expect);
        }
    }

    #[test]
    fn roundtrip_all_packets_any_order() {
        let data = payload(1000);
        let enc = FountainEncoder::new(&data, 64, 1.3).unwrap();
        let mut packets = enc.encode();
        packets.reverse();
        let mut dec = decoder_for(&enc);
        for p in packets {
            assert!(dec.add_packet_bytes(&p.to_bytes()).unwrap());
        }
        let out = dec.decode().unwrap();
        assert_eq!(out.len(), enc.num_blocks() * 64);
        assert_eq!(&out[..data.len()], &data[..]);
    }

    #[test]
    fn duplicates_are_harmless() {
        let data = payload(200);
        let enc = FountainEncoder::new(&data, 32, 1.0).unwrap();
        let mut dec = decoder_for(&enc);
        for p in enc.encode() {
            assert!(dec.add_packet(p.clone()).unwrap());
            assert!(!dec.add_packet(p).unwrap());
        }
        assert_eq!(dec.packet_count(), enc.num_blocks());
        assert_eq!(&dec.decode().unwrap()[..200], &data[..]);
    }

    #[test]
    fn recovers_lost_source_block_from_repair() {
        let data = payload(16 * 8);
        let enc = FountainEncoder::new(&data, 16, 2.0).unwrap();
        let packets = enc.encode();
        let covered = packets[8].indices[0];
        let kept: Vec<Packet> = packets
            .into_iter()
            .filter(|p| p.id != u32::from(covered))
            .collect();
        assert_eq!(decode_subset(&enc, &kept).unwrap(), data);
    }

    #[test]
    fn any_single_loss_once_coverage_is_complete() {
        // 65 blocks need 22 repairs for full coverage.
        let data = payload(16 * 65);
        let enc = FountainEncoder::new(&data, 16, 1.35).unwrap();
        let packets = enc.encode();
        assert_eq!(packets.len(), 88);
        for lost in 0..packets.len() {
            let mut kept = packets.clone();
            kept.remove(lost);
            assert_eq!(decode_subset(&enc, &kept).unwrap(), data, "lost packet {lost}");
        }
    }

    #[test]
    fn any_pair_of_losses_within_bound() {
        let data = payload(16 * 10);
        let enc = FountainEncoder::new(&data, 16, 2.0).unwrap();
        let packets = enc.encode();
        assert_eq!(guaranteed_losses(10, packets.len()), 2);
        for a in 0..packets.len() {
            for b in a + 1..packets.len() {
                let kept: Vec<Packet> = packets
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != a && *i != b)
                    .map(|(_, p)| p.clone())
                    .collect();
                assert_eq!(decode_subset(&enc, &kept).unwrap(), data, "lost {a} and {b}");
            }
        }
    }

    #[test]
    fn random_losses_up_to_guaranteed_bound() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let cases = [(65, 1.35), (65, 1.7), (65, 2.0), (40, 1.5), (2, 3.0), (1, 2.0)];
        for (blocks, redundancy) in cases {
            let data = payload(16 * blocks - 5);
            let enc = FountainEncoder::new(&data, 16, redundancy).unwrap();
            let bound = guaranteed_losses(enc.num_blocks(), enc.packet_count());
            assert!(bound >= 1, "{blocks} blocks at {redundancy}");
            for _ in 0..50 {
                let mut packets = enc.encode();
                packets.shuffle(&mut rng);
                packets.truncate(packets.len() - bound);
                let out = decode_subset(&enc, &packets).unwrap();
                assert_eq!(&out[..data.len()], &data[..]);
            }
        }
    }

    #[test]
    fn peels_chain() {
        // {0}, {0,1}, {1,2}: each pass unlocks the next block.
        let blocks = [[1u8, 2], [3, 4], [5, 6]];
        let x = |a: [u8; 2], b: [u8; 2]| vec![a[0] ^ b[0], a[1] ^ b[1]];
        let mut dec = FountainDecoder::new(3, 2, DEFAULT_MAX_PASSES);
        dec.add_packet(Packet {
            id: 10,
            indices: vec![1, 2],
            payload: x(blocks[1], blocks[2]),
        })
        .unwrap();
        dec.add_packet(Packet {
            id: 11,
            indices: vec![0, 1],
            payload: x(blocks[0], blocks[1]),
        })
        .unwrap();
        dec.add_packet(Packet {
            id: 12,
            indices: vec![0],
            payload: blocks[0].to_vec(),
        })
        .unwrap();
        assert_eq!(dec.decode().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn cycle_without_degree_one_is_insufficient() {
        // Solvable by elimination, not by peeling.
        let mut dec = FountainDecoder::new(3, 1, DEFAULT_MAX_PASSES);
        let cycle = [(1, vec![0, 1], 1u8), (2, vec![1, 2], 2), (3, vec![0, 1, 2], 3)];
        for (id, indices, byte) in cycle {
            dec.add_packet(Packet {
                id,
                indices,
                payload: vec![byte],
            })
            .unwrap();
        }
        assert_eq!(
            dec.decode(),
            Err(FountainError::Insufficient {
                resolved: 0,
                total: 3
            })
        );
    }

    #[test]
    fn uncovered_block_is_insufficient() {
        let enc = FountainEncoder::new(&payload(48), 16, 1.0).unwrap();
        let mut dec = decoder_for(&enc);
        dec.add_packet(enc.packet(0)).unwrap();
        dec.add_packet(enc.packet(1)).unwrap();
        assert_eq!(
            dec.decode(),
            Err(FountainError::Insufficient {
                resolved: 2,
                total: 3
            })
        );
    }

    #[test]
    fn rejects_foreign_packets() {
        let mut dec = FountainDecoder::new(2, 4, DEFAULT_MAX_PASSES);
        let out_of_range = Packet {
            id: 0,
            indices: vec![5],
            payload: vec![0; 4],
        };
        assert!(matches!(
            dec.add_packet(out_of_range),
            Err(FountainError::IndexOutOfRange { index: 5, .. })
        ));
        let short = Packet {
            id: 0,
            indices: vec![0],
            payload: vec![0; 3],
        };
        assert!(matches!(
            dec.add_packet(short),
            Err(FountainError::BlockSizeMismatch { len: 3, .. })
        ));
    }

    #[test]
    fn encoder_rejects_bad_input() {
        assert!(matches!(
            FountainEncoder::new(&[], 16, 1.0),
            Err(FountainError::EmptyInput)
        ));
        assert!(matches!(
            FountainEncoder::new(&[1], 0, 1.0),
            Err(FountainError::ZeroBlockSize)
        ));
        assert!(matches!(
            FountainEncoder::new(&vec![0u8; MAX_BLOCKS + 1], 1, 1.0),
            Err(FountainError::TooManyBlocks { .. })
        ));
    }
}
