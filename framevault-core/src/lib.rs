//! FrameVault: store arbitrary payloads as sequences of fixed-size RGB frames.
//! Payloads are chunked with CRC32 tags, fountain-coded for loss tolerance and optionally
//! sealed with a password-derived AES-GCM envelope. No global state; frame I/O goes through
//! the [`store`] traits.

pub mod config;
pub mod crypto;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod store;
pub mod wire;

pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use metadata::{Metadata, MetadataError};
pub use pipeline::{Decoded, Decoder, EncodeSummary, Encoder};
pub use store::{FrameSink, FrameSource, MemoryFrameStore, RawFrameReader, RawFrameWriter};

// Coding layers, bottom-up.
pub mod chunk;
pub mod fountain;
pub mod frame;
pub mod integrity;
pub mod packet;
