//! Project info and descriptor interchange.
//!
//! JSON for tooling and a framed bincode encoding for compact storage. The
//! binary frame is a four-byte magic, a little-endian `u32` format version,
//! then the bincode payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{FileKind, RazorConfiguration};
use crate::error::SerializationError;
use crate::tag_helpers::TagHelperCollection;

pub const PROJECT_INFO_MAGIC: [u8; 4] = *b"RZPI";
pub const TAG_HELPERS_MAGIC: [u8; 4] = *b"RZTH";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECT INFO
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshotHandle {
    pub file_path: String,
    pub target_path: String,
    #[serde(default)]
    pub file_kind: FileKind,
}

impl DocumentSnapshotHandle {
    pub fn new(file_path: &str, target_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            target_path: target_path.to_string(),
            file_kind: FileKind::from_path(target_path),
        }
    }
}

/// Everything a tool needs to compile a project's documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RazorProjectInfo {
    pub project_key: String,
    pub file_path: String,
    pub configuration: RazorConfiguration,
    #[serde(default)]
    pub root_namespace: Option<String>,
    #[serde(default)]
    pub tag_helpers: TagHelperCollection,
    #[serde(default)]
    pub documents: Vec<DocumentSnapshotHandle>,
}

impl RazorProjectInfo {
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        encode_framed(PROJECT_INFO_MAGIC, self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        decode_framed(PROJECT_INFO_MAGIC, bytes)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTOR SETS
// ═══════════════════════════════════════════════════════════════════════════════

impl TagHelperCollection {
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        encode_framed(TAG_HELPERS_MAGIC, self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        decode_framed(TAG_HELPERS_MAGIC, bytes)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAMING
// ═══════════════════════════════════════════════════════════════════════════════

fn encode_framed<T: Serialize>(magic: [u8; 4], value: &T) -> Result<Vec<u8>, SerializationError> {
    let payload = bincode::serialize(value).map_err(SerializationError::Encode)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&magic);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode_framed<T: DeserializeOwned>(magic: [u8; 4], bytes: &[u8]) -> Result<T, SerializationError> {
    if bytes.len() < HEADER_LEN {
        return Err(SerializationError::Format {
            message: format!("{} bytes is shorter than the {}-byte header", bytes.len(), HEADER_LEN),
        });
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    if header[..4] != magic {
        return Err(SerializationError::Format {
            message: format!(
                "expected magic {:?}, found {:?}",
                String::from_utf8_lossy(&magic),
                String::from_utf8_lossy(&header[..4])
            ),
        });
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(SerializationError::Format {
            message: format!("unsupported format version {} (expected {})", version, FORMAT_VERSION),
        });
    }
    bincode::deserialize(payload).map_err(SerializationError::Decode)
}
