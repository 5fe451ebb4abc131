//! Encode/decode orchestration: payload -> (envelope) -> metadata -> chunks -> fountain packets ->
//! frames, and back.
//!
//! Frame order written by the encoder: metadata length frame, metadata payload frames, then every
//! packet of chunk 0, chunk 1, ... in packing order. On read-back the chunk index inside each
//! data frame is the only grouping signal; frame order between chunks does not matter.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::chunk::{self, Chunk};
use crate::config::Config;
use crate::crypto::{self, CryptoError};
use crate::error::{Error, Result};
use crate::fountain::{self, FountainDecoder, FountainEncoder, FountainError, MAX_BLOCKS};
use crate::frame::{FramePacker, FrameUnpacker};
use crate::integrity::TAG_SIZE;
use crate::metadata::{Metadata, MetadataError};
use crate::store::{FrameSink, FrameSource, RawFrameReader, RawFrameWriter};

/// Progress hook: receives the completed fraction in `[0, 1]`.
pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;

/// What an encode produced.
#[derive(Debug, Clone)]
pub struct EncodeSummary {
    pub metadata: Metadata,
    pub chunks: usize,
    pub metadata_frames: usize,
    pub data_frames: usize,
}

/// Output of a successful decode.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub metadata: Metadata,
    pub data: Vec<u8>,
}

/// Encodes payloads into frames.
pub struct Encoder {
    config: Config,
    password: Option<String>,
    progress: Option<ProgressFn>,
}

impl Encoder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            password: None,
            progress: None,
        }
    }

    /// Encrypt the whole payload under `password` before chunking.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Encode `payload` into `sink` and commit it.
    pub fn encode<S: FrameSink + ?Sized>(
        &self,
        payload: &[u8],
        filename: &str,
        sink: &mut S,
    ) -> Result<EncodeSummary> {
        let cfg = &self.config;
        cfg.validate()?;
        info!(filename, size = %format_size(payload.len() as u64), "encoding payload");

        let payload: Cow<'_, [u8]> = match &self.password {
            Some(pw) => {
                debug!("encrypting payload");
                Cow::Owned(crypto::encrypt(payload, pw).map_err(Error::EncryptionFailed)?)
            }
            None => Cow::Borrowed(payload),
        };

        let metadata = Metadata::new(
            filename,
            payload.len() as u64,
            cfg.chunk_size as u64,
            self.password.is_some(),
        );
        let metadata_bytes = metadata.to_bytes()?;
        let chunks = chunk::split(&payload, cfg.chunk_size);
        if u32::try_from(chunks.len()).is_err() {
            let reason = "payload needs more than u32::MAX chunks".into();
            return Err(MetadataError::Invalid(reason).into());
        }
        let total_packets: usize = chunks
            .iter()
            .map(|c| {
                let blocks = fountain::block_count(c.wire_len(), cfg.block_size);
                fountain::packet_count(blocks, cfg.redundancy)
            })
            .sum();
        info!(chunks = chunks.len(), packets = total_packets, "split into chunks");

        let packer = FramePacker::new(cfg.frame_width, cfg.frame_height);
        let metadata_frames = packer.pack_metadata(&metadata_bytes)?;
        for frame in &metadata_frames {
            sink.append(frame)?;
        }

        let mut written = 0usize;
        for (index, chunk) in chunks.iter().enumerate() {
            let encoder = FountainEncoder::new(&chunk.to_bytes(), cfg.block_size, cfg.redundancy)?;
            let packets = encoder.encode();
            debug!(
                chunk = index,
                blocks = encoder.num_blocks(),
                packets = packets.len(),
                "chunk encoded"
            );
            for packet in packets {
                let frame = packer.pack_data(index as u32, &packet.to_bytes())?;
                sink.append(&frame)?;
                written += 1;
                if let Some(progress) = &self.progress {
                    progress(written as f64 / total_packets as f64);
                }
            }
        }
        sink.finish()?;

        info!(
            metadata_frames = metadata_frames.len(),
            data_frames = written,
            "encode complete"
        );
        Ok(EncodeSummary {
            metadata,
            chunks: chunks.len(),
            metadata_frames: metadata_frames.len(),
            data_frames: written,
        })
    }

    /// Encode the file at `input` into a raw frame container at `output`. Nothing is left at
    /// `output` if encoding fails.
    pub fn encode_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<EncodeSummary> {
        let input = input.as_ref();
        let payload = read_input(input)?;
        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cfg = &self.config;
        cfg.validate()?;
        let mut writer =
            RawFrameWriter::create(output, cfg.frame_width, cfg.frame_height, cfg.fps)?;
        self.encode(&payload, &filename, &mut writer)
    }
}

/// Decodes frames back into the original payload.
pub struct Decoder {
    config: Config,
    password: Option<String>,
    progress: Option<ProgressFn>,
}

impl Decoder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            password: None,
            progress: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Progress is reported per resolved chunk.
    pub fn with_progress(mut self, progress: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read metadata, then every data frame, and rebuild the payload.
    pub fn decode<S: FrameSource + ?Sized>(&self, source: &mut S) -> Result<Decoded> {
        let cfg = &self.config;
        cfg.validate()?;
        let expected = (cfg.frame_width, cfg.frame_height);
        if source.geometry() != expected {
            return Err(Error::UnsupportedContainer(format!(
                "frames are {:?}, configured for {:?}",
                source.geometry(),
                expected
            )));
        }
        let unpacker = FrameUnpacker::new(cfg.frame_width, cfg.frame_height);

        let metadata = read_metadata(source, &unpacker)?;
        info!(
            filename = %metadata.filename,
            size = %format_size(metadata.file_size),
            chunks = metadata.num_chunks,
            encrypted = metadata.encrypted,
            "metadata read"
        );
        let password = match (metadata.encrypted, &self.password) {
            (true, None) => return Err(Error::DecryptionFailed(CryptoError::MissingPassword)),
            (true, Some(pw)) => Some(pw.as_str()),
            (false, _) => None,
        };
        let num_chunks = u32::try_from(metadata.num_chunks)
            .map_err(|_| MetadataError::Invalid("num_chunks exceeds u32 chunk index".into()))?;

        let groups = group_packets(source, &unpacker, cfg.block_size, num_chunks)?;
        if let Some(missing) = (0..num_chunks).find(|i| !groups.contains_key(i)) {
            return Err(Error::MissingChunk(missing));
        }

        let mut chunks = Vec::with_capacity(num_chunks as usize);
        for index in 0..num_chunks {
            let packets = groups.get(&index).map(Vec::as_slice).unwrap_or_default();
            chunks.push(self.decode_chunk(&metadata, index, packets)?);
            if let Some(progress) = &self.progress {
                progress(f64::from(index + 1) / f64::from(num_chunks));
            }
        }

        let mut data = chunk::reassemble(&chunks).map_err(|e| Error::IntegrityMismatch {
            chunk: e.index as u32,
        })?;
        data.truncate(metadata.file_size as usize);

        if let Some(pw) = password {
            debug!("decrypting payload");
            data = crypto::decrypt(&data, pw).map_err(Error::DecryptionFailed)?;
        }
        info!(size = %format_size(data.len() as u64), "decode complete");
        Ok(Decoded { metadata, data })
    }

    fn decode_chunk(&self, metadata: &Metadata, index: u32, packets: &[Vec<u8>]) -> Result<Chunk> {
        let cfg = &self.config;
        let raw_len =
            chunk::expected_chunk_len(metadata.file_size, metadata.chunk_size, u64::from(index))
                .ok_or_else(|| {
                    MetadataError::Invalid(format!("chunk {index} lies past file_size"))
                })?;
        let wire_len = raw_len + TAG_SIZE;
        let num_blocks = fountain::block_count(wire_len, cfg.block_size);
        if num_blocks > MAX_BLOCKS {
            return Err(MetadataError::Invalid(format!(
                "chunk {index} needs {num_blocks} blocks at block size {}",
                cfg.block_size
            ))
            .into());
        }

        let mut decoder = FountainDecoder::new(num_blocks, cfg.block_size, cfg.max_decode_passes);
        for bytes in packets {
            if let Err(e) = decoder.add_packet_bytes(bytes) {
                warn!(chunk = index, error = %e, "dropping unusable packet");
            }
        }
        let mut resolved = decoder.decode().map_err(|e| match e {
            FountainError::Insufficient { resolved, total } => Error::InsufficientPackets {
                chunk: index,
                resolved,
                total,
            },
            other => Error::Fountain(other),
        })?;
        debug!(
            chunk = index,
            packets = decoder.packet_count(),
            blocks = num_blocks,
            "chunk resolved"
        );
        // Block padding is not part of the chunk; metadata gives the true length.
        resolved.truncate(wire_len);
        Chunk::from_bytes(&resolved).map_err(|_| Error::IntegrityMismatch { chunk: index })
    }

    /// Decode the raw frame container at `input` and write the payload to `output`. `output` is
    /// only created once the whole decode has succeeded.
    pub fn decode_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<Decoded> {
        let mut reader = RawFrameReader::open(input)?;
        let decoded = self.decode(&mut reader)?;
        write_atomic(output.as_ref(), &decoded.data)?;
        Ok(decoded)
    }
}

fn read_metadata<S: FrameSource + ?Sized>(
    source: &mut S,
    unpacker: &FrameUnpacker,
) -> Result<Metadata> {
    let head = source.next_frame()?.ok_or(MetadataError::Truncated)?;
    let len = unpacker.unpack_metadata_len(&head)?;
    if len < 4 {
        return Err(MetadataError::Truncated.into());
    }
    let mut bytes = Vec::with_capacity(len.min(1 << 20));
    while bytes.len() < len {
        let frame = source.next_frame()?.ok_or(MetadataError::Truncated)?;
        bytes.extend(unpacker.unpack_metadata(&frame)?);
    }
    bytes.truncate(len);
    Ok(Metadata::from_bytes(&bytes)?)
}

/// Read every remaining frame and group packet bytes by chunk index.
fn group_packets<S: FrameSource + ?Sized>(
    source: &mut S,
    unpacker: &FrameUnpacker,
    block_size: usize,
    num_chunks: u32,
) -> Result<HashMap<u32, Vec<Vec<u8>>>> {
    let mut groups: HashMap<u32, Vec<Vec<u8>>> = HashMap::new();
    let mut frames = 0usize;
    while let Some(frame) = source.next_frame()? {
        frames += 1;
        let data = match unpacker.unpack_data(&frame, block_size) {
            Ok(d) => d,
            Err(e) => {
                warn!(frame = frames, error = %e, "skipping unreadable data frame");
                continue;
            }
        };
        if data.chunk_index >= num_chunks {
            warn!(
                frame = frames,
                chunk = data.chunk_index,
                num_chunks,
                "skipping frame for unknown chunk"
            );
            continue;
        }
        groups.entry(data.chunk_index).or_default().push(data.packet);
    }
    debug!(frames, groups = groups.len(), "data frames read");
    Ok(groups)
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::InputNotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = PathBuf::from(path.as_os_str().to_owned());
    tmp.as_mut_os_string().push(".partial");
    if let Err(e) = fs::write(&tmp, data).and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Human-readable size: two decimals, binary units up to TB.
fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} TB")
}
