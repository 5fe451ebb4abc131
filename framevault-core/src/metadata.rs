//! Metadata record: describes one encoded payload. Wire format: 4-byte LE length + compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chunk;

/// Metadata format version written by this crate.
pub const METADATA_VERSION: &str = "1.0.0";

const LEN_SIZE: usize = 4;

/// Fields every record must carry.
pub const REQUIRED_FIELDS: [&str; 7] = [
    "version",
    "filename",
    "file_size",
    "chunk_size",
    "num_chunks",
    "encrypted",
    "timestamp",
];

/// Creation time, kept as the exact text of the record so re-serialization is byte-stable.
/// Offset-less ISO 8601 (`2024-05-01T12:34:56.123456`) is read as UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Current UTC time, offset-less with microseconds.
    pub fn now() -> Self {
        Self(Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(&self.0) {
            return Some(t.with_timezone(&Utc));
        }
        self.0.parse::<NaiveDateTime>().ok().map(|t| t.and_utc())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(t: DateTime<Utc>) -> Self {
        Self(t.to_rfc3339())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: String,
    pub filename: String,
    /// Authoritative payload length (after encryption, if any).
    pub file_size: u64,
    pub chunk_size: u64,
    pub num_chunks: u64,
    pub encrypted: bool,
    pub timestamp: Timestamp,
    /// Extension fields, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    pub fn new(
        filename: impl Into<String>,
        file_size: u64,
        chunk_size: u64,
        encrypted: bool,
    ) -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            filename: filename.into(),
            file_size,
            chunk_size,
            num_chunks: chunk::chunk_count(file_size, chunk_size),
            encrypted,
            timestamp: Timestamp::now(),
            extra: BTreeMap::new(),
        }
    }

    /// Attach an extension field. Keys that collide with a required field are ignored.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !REQUIRED_FIELDS.contains(&key.as_str()) {
            self.extra.insert(key, value.into());
        }
        self
    }

    /// Check value constraints the JSON schema can't express.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.chunk_size == 0 {
            return Err(MetadataError::Invalid("chunk_size must be positive".into()));
        }
        let expected = chunk::chunk_count(self.file_size, self.chunk_size);
        if self.num_chunks != expected {
            return Err(MetadataError::Invalid(format!(
                "num_chunks is {}, file_size {} / chunk_size {} needs {}",
                self.num_chunks, self.file_size, self.chunk_size, expected
            )));
        }
        if self.timestamp.to_utc().is_none() {
            return Err(MetadataError::Invalid(format!(
                "unreadable timestamp {:?}",
                self.timestamp.as_str()
            )));
        }
        Ok(())
    }

    /// Length-prefixed JSON. Deterministic: known fields in declaration order, extensions sorted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MetadataError> {
        let json = serde_json::to_vec(self).map_err(MetadataError::Json)?;
        let len = u32::try_from(json.len()).map_err(|_| MetadataError::TooLarge)?;
        let mut out = Vec::with_capacity(LEN_SIZE + json.len());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&json);
        Ok(out)
    }

    /// Parse and validate a length-prefixed record. Bytes past the declared length are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetadataError> {
        if bytes.len() < LEN_SIZE {
            return Err(MetadataError::Truncated);
        }
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let body = bytes
            .get(LEN_SIZE..LEN_SIZE + len)
            .ok_or(MetadataError::Truncated)?;
        let text = std::str::from_utf8(body).map_err(|_| MetadataError::Utf8)?;
        let value: Value = serde_json::from_str(text).map_err(MetadataError::Json)?;
        let Value::Object(fields) = &value else {
            return Err(MetadataError::Invalid("record is not a JSON object".into()));
        };
        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !fields.contains_key(**f)) {
            return Err(MetadataError::MissingField(*missing));
        }
        let meta: Metadata = serde_json::from_value(value).map_err(MetadataError::Json)?;
        meta.validate()?;
        Ok(meta)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata truncated")]
    Truncated,
    #[error("metadata too large")]
    TooLarge,
    #[error("metadata is not valid UTF-8")]
    Utf8,
    #[error("metadata json: {0}")]
    Json(#[source] serde_json::Error),
    #[error("metadata missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid metadata: {0}")]
    Invalid(String),
}
