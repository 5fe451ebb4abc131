//! Frame stores: append-only sinks and forward-only sources of fixed-size frames.
//!
//! `MemoryFrameStore` keeps frames in a `Vec`. `RawFrameWriter` / `RawFrameReader` persist them
//! losslessly as a container header (see [`crate::wire`]) followed by raw pixel bytes.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::frame::Frame;
use crate::wire::{self, ContainerHeader};

/// Append-only frame destination.
pub trait FrameSink {
    fn append(&mut self, frame: &Frame) -> Result<(), StoreError>;

    /// Commit everything appended so far.
    fn finish(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Forward-only frame source.
pub trait FrameSource {
    /// `(width, height)` of every frame this source yields.
    fn geometry(&self) -> (u32, u32);

    /// Next frame, or `None` at the end of the store.
    fn next_frame(&mut self) -> Result<Option<Frame>, StoreError>;
}

fn check_geometry(expected: (u32, u32), frame: &Frame) -> Result<(), StoreError> {
    let got = (frame.width(), frame.height());
    if got != expected {
        return Err(StoreError::DimensionMismatch { expected, got });
    }
    Ok(())
}

/// In-memory frame store.
#[derive(Debug, Clone)]
pub struct MemoryFrameStore {
    width: u32,
    height: u32,
    frames: Vec<Frame>,
}

impl MemoryFrameStore {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: Vec::new(),
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Direct access for simulating loss or corruption on the hosting side.
    pub fn frames_mut(&mut self) -> &mut Vec<Frame> {
        &mut self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sequential reader over the stored frames.
    pub fn reader(&self) -> MemoryFrameReader<'_> {
        MemoryFrameReader {
            geometry: (self.width, self.height),
            frames: self.frames.iter(),
        }
    }
}

impl FrameSink for MemoryFrameStore {
    fn append(&mut self, frame: &Frame) -> Result<(), StoreError> {
        check_geometry((self.width, self.height), frame)?;
        self.frames.push(frame.clone());
        Ok(())
    }
}

pub struct MemoryFrameReader<'a> {
    geometry: (u32, u32),
    frames: std::slice::Iter<'a, Frame>,
}

impl FrameSource for MemoryFrameReader<'_> {
    fn geometry(&self) -> (u32, u32) {
        self.geometry
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, StoreError> {
        Ok(self.frames.next().cloned())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Writes a raw frame container. Frames go to `<path>.partial`; `finish` renames it into place.
/// Dropping an unfinished writer removes the partial file.
pub struct RawFrameWriter {
    header: ContainerHeader,
    path: PathBuf,
    partial: PathBuf,
    out: Option<BufWriter<File>>,
    frames: u64,
}

impl RawFrameWriter {
    pub fn create(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let partial = partial_path(&path);
        let header = ContainerHeader::new(width, height, fps);
        let encoded = wire::encode_header(&header)
            .map_err(|e| StoreError::Unsupported(e.to_string()))?;
        let mut out = BufWriter::new(File::create(&partial)?);
        out.write_all(&encoded)?;
        Ok(Self {
            header,
            path,
            partial,
            out: Some(out),
            frames: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for RawFrameWriter {
    fn append(&mut self, frame: &Frame) -> Result<(), StoreError> {
        check_geometry((self.header.width, self.header.height), frame)?;
        let out = self.out.as_mut().ok_or(StoreError::Closed)?;
        out.write_all(frame.pixels())?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        let out = self.out.take().ok_or(StoreError::Closed)?;
        if let Err(e) = commit(out, &self.partial, &self.path) {
            let _ = fs::remove_file(&self.partial);
            return Err(e);
        }
        tracing::debug!(
            path = %self.path.display(),
            frames = self.frames,
            "frame container committed"
        );
        Ok(())
    }
}

fn commit(out: BufWriter<File>, partial: &Path, path: &Path) -> Result<(), StoreError> {
    let file = out.into_inner().map_err(|e| StoreError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);
    fs::rename(partial, path)?;
    Ok(())
}

impl Drop for RawFrameWriter {
    fn drop(&mut self) {
        if self.out.take().is_some() {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

/// Reads a raw frame container front to back.
pub struct RawFrameReader {
    header: ContainerHeader,
    frame_len: usize,
    input: BufReader<File>,
}

impl RawFrameReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut input = BufReader::new(file);
        let mut buf = vec![0u8; 4];
        input
            .read_exact(&mut buf)
            .map_err(|_| StoreError::Unsupported("missing container header".into()))?;
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        // decode_header enforces the size limit before we trust `len` for an allocation.
        if let Err(wire::HeaderDecodeError::TooLarge) = wire::decode_header(&buf) {
            return Err(StoreError::Unsupported("container header too large".into()));
        }
        buf.resize(4 + len, 0);
        input
            .read_exact(&mut buf[4..])
            .map_err(|_| StoreError::Unsupported("truncated container header".into()))?;
        let (header, _) =
            wire::decode_header(&buf).map_err(|e| StoreError::Unsupported(e.to_string()))?;
        if header.width == 0 || header.height == 0 {
            return Err(StoreError::Unsupported("zero frame dimensions".into()));
        }
        let frame_len = header.frame_len().ok_or_else(|| {
            StoreError::Unsupported(format!(
                "frame size {}x{} too large",
                header.width, header.height
            ))
        })?;
        Ok(Self {
            header,
            frame_len,
            input,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }
}

impl FrameSource for RawFrameReader {
    fn geometry(&self) -> (u32, u32) {
        (self.header.width, self.header.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, StoreError> {
        let mut pixels = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < pixels.len() {
            match self.input.read(&mut pixels[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < pixels.len() {
            return Err(StoreError::Truncated);
        }
        let frame = Frame::from_pixels(self.header.width, self.header.height, pixels)
            .map_err(|e| StoreError::Unsupported(e.to_string()))?;
        Ok(Some(frame))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("frame store not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported frame container: {0}")]
    Unsupported(String),
    #[error("frame is {got:?}, store holds {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("frame store ends mid-frame")]
    Truncated,
    #[error("frame store already finished")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
