//! Pipeline error taxonomy. Every error is terminal for the current encode/decode call.

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::fountain::FountainError;
use crate::frame::FrameError;
use crate::metadata::MetadataError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("unsupported frame container: {0}")]
    UnsupportedContainer(String),
    #[error("metadata corrupt: {0}")]
    MetadataCorrupt(#[from] MetadataError),
    #[error("no packets for chunk {0}")]
    MissingChunk(u32),
    #[error("insufficient packets for chunk {chunk}: resolved {resolved} of {total} blocks")]
    InsufficientPackets {
        chunk: u32,
        resolved: usize,
        total: usize,
    },
    #[error("integrity mismatch in chunk {chunk}")]
    IntegrityMismatch { chunk: u32 },
    #[error("decryption failed: {0}")]
    DecryptionFailed(#[source] CryptoError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("encryption failed: {0}")]
    EncryptionFailed(#[source] CryptoError),
    #[error("fountain coding failed: {0}")]
    Fountain(#[from] FountainError),
    #[error("frame packing failed: {0}")]
    Frame(#[from] FrameError),
    #[error("frame store error: {0}")]
    Store(StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => Error::InputNotFound(path),
            StoreError::Unsupported(reason) => Error::UnsupportedContainer(reason),
            other => Error::Store(other),
        }
    }
}
