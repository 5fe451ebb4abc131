//! Pipeline configuration: frame geometry and coding parameters.
//!
//! The encoding and decoding sides of one frame store must agree on every field. `Config` is
//! passed explicitly into each encode/decode; nothing here is process-global.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::fountain::{self, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_PASSES, MAX_BLOCKS, MAX_DEGREE};
use crate::frame::{CHUNK_INDEX_SIZE, METADATA_LEN_SIZE};
use crate::integrity::TAG_SIZE;
use crate::packet::Packet;

/// File: ~/.config/framevault/config.toml or /etc/framevault/config.toml.
/// Env overrides: FRAMEVAULT_FRAME_WIDTH, FRAMEVAULT_FRAME_HEIGHT, FRAMEVAULT_FPS,
/// FRAMEVAULT_CHUNK_SIZE, FRAMEVAULT_BLOCK_SIZE, FRAMEVAULT_REDUNDANCY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Frame width in pixels (default 3840).
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    /// Frame height in pixels (default 2160).
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    /// Container frame rate (default 30). Recorded in the container header only.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Raw payload bytes per chunk (default 64 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Fountain block size in bytes (default 1024).
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Generated packets per block (default 1.3).
    #[serde(default = "default_redundancy")]
    pub redundancy: f64,
    /// Cap on peeling passes per chunk (default 100).
    #[serde(default = "default_max_decode_passes")]
    pub max_decode_passes: usize,
}

fn default_frame_width() -> u32 {
    3840
}
fn default_frame_height() -> u32 {
    2160
}
fn default_fps() -> u32 {
    30
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}
fn default_redundancy() -> f64 {
    1.3
}
fn default_max_decode_passes() -> usize {
    DEFAULT_MAX_PASSES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            fps: default_fps(),
            chunk_size: default_chunk_size(),
            block_size: default_block_size(),
            redundancy: default_redundancy(),
            max_decode_passes: default_max_decode_passes(),
        }
    }
}

impl Config {
    /// Load config: defaults, then config file (if present), then env vars.
    pub fn load() -> Self {
        let mut c = load_file().unwrap_or_default();
        c.apply_env(|key| std::env::var(key).ok());
        c
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `FRAMEVAULT_*` overrides from `lookup`. Unparseable values are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(v: Option<String>) -> Option<T> {
            v.and_then(|s| s.trim().parse().ok())
        }
        if let Some(v) = parse(lookup("FRAMEVAULT_FRAME_WIDTH")) {
            self.frame_width = v;
        }
        if let Some(v) = parse(lookup("FRAMEVAULT_FRAME_HEIGHT")) {
            self.frame_height = v;
        }
        if let Some(v) = parse(lookup("FRAMEVAULT_FPS")) {
            self.fps = v;
        }
        if let Some(v) = parse(lookup("FRAMEVAULT_CHUNK_SIZE")) {
            self.chunk_size = v;
        }
        if let Some(v) = parse(lookup("FRAMEVAULT_BLOCK_SIZE")) {
            self.block_size = v;
        }
        if let Some(v) = parse(lookup("FRAMEVAULT_REDUNDANCY")) {
            self.redundancy = v;
        }
    }

    /// Bytes one data frame can carry.
    pub fn frame_capacity(&self) -> usize {
        self.frame_width as usize * self.frame_height as usize * 3
    }

    /// Smallest data frame that fits a packet of maximum degree.
    pub fn min_frame_capacity(&self) -> usize {
        CHUNK_INDEX_SIZE + Packet::wire_len(MAX_DEGREE, self.block_size)
    }

    /// Reject parameter combinations that could not round-trip. Called before any frame is
    /// written or read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::Invalid("frame dimensions must be non-zero"));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be non-zero"));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be non-zero"));
        }
        if !self.redundancy.is_finite() || self.redundancy < 1.0 {
            return Err(ConfigError::Invalid("redundancy must be a finite value >= 1.0"));
        }
        if self.max_decode_passes == 0 {
            return Err(ConfigError::Invalid("max_decode_passes must be non-zero"));
        }
        let capacity = self.frame_capacity();
        let needed = self.min_frame_capacity();
        if capacity < needed {
            return Err(ConfigError::FrameTooSmall { capacity, needed });
        }
        if (self.frame_width as usize * self.frame_height as usize) < METADATA_LEN_SIZE {
            return Err(ConfigError::Invalid("frame too small for the metadata length prefix"));
        }
        let blocks = fountain::block_count(self.chunk_size + TAG_SIZE, self.block_size);
        if blocks > MAX_BLOCKS {
            return Err(ConfigError::TooManyBlocks { blocks });
        }
        Ok(())
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/framevault/config.toml"));
    }
    out.push(PathBuf::from("/etc/framevault/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p).map(|s| Config::from_toml_str(&s)) {
                Ok(Ok(c)) => return Some(c),
                Ok(Err(e)) => {
                    tracing::warn!(path = %p.display(), error = %e, "ignoring config file")
                }
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "cannot read config file")
                }
            }
            break;
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
    #[error("data frame holds {capacity} bytes, a packet needs {needed}")]
    FrameTooSmall { capacity: usize, needed: usize },
    #[error("chunk needs {blocks} blocks, packet header addresses at most 65535")]
    TooManyBlocks { blocks: usize },
}
