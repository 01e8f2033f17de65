//! Snapshot codec for the client's durable state.
//!
//! The record store and the task queue are each persisted as one framed
//! postcard blob:
//!
//! ```text
//! [u32 length (LE)][postcard(Snapshot<T>)]
//! ```
//!
//! The length prefix lets a reader tell a torn write (payload shorter than
//! announced) from a valid file, so a half-written snapshot is reported as
//! an error instead of being decoded into a silently truncated list.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is incomplete or has an invalid length prefix.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// The snapshot was written by an incompatible version.
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the file.
        found: u16,
        /// Version this build writes.
        expected: u16,
    },
}

/// Versioned list of items as stored on disk.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot<T> {
    version: u16,
    items: Vec<T>,
}

/// Encodes `items` as a framed snapshot.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if an item cannot be serialized, or
/// `CodecError::InvalidFrame` if the payload exceeds `u32::MAX` bytes.
pub fn encode_snapshot<T: Serialize>(items: &[T]) -> Result<Vec<u8>, CodecError> {
    #[derive(Serialize)]
    struct SnapshotRef<'a, T> {
        version: u16,
        items: &'a [T],
    }

    let payload = postcard::to_allocvec(&SnapshotRef {
        version: SNAPSHOT_VERSION,
        items,
    })
    .map_err(|e| CodecError::Serialization(e.to_string()))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        CodecError::InvalidFrame(format!(
            "payload too large for framing: {} bytes",
            payload.len()
        ))
    })?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes a framed snapshot produced by [`encode_snapshot`].
///
/// Bytes after the announced frame are rejected: the file holds exactly one
/// snapshot.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` for a short, truncated or over-long
/// frame, `CodecError::UnsupportedVersion` for a foreign version, or
/// `CodecError::Serialization` if the payload cannot be deserialized.
pub fn decode_snapshot<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::InvalidFrame(format!(
            "need at least 4 bytes for length prefix, got {}",
            bytes.len()
        )));
    }
    let len_bytes: [u8; 4] = bytes[..4]
        .try_into()
        .map_err(|_| CodecError::InvalidFrame("failed to read length prefix".into()))?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    let total_len = 4 + payload_len;
    if bytes.len() < total_len {
        return Err(CodecError::InvalidFrame(format!(
            "frame indicates {} bytes but only {} available",
            payload_len,
            bytes.len() - 4
        )));
    }
    if bytes.len() > total_len {
        return Err(CodecError::InvalidFrame(format!(
            "{} trailing bytes after frame",
            bytes.len() - total_len
        )));
    }

    let snapshot: Snapshot<T> = postcard::from_bytes(&bytes[4..total_len])
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(snapshot.items)
}
