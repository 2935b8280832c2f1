//! # Cursor Codec
//!
//! Turns the positions of every resumable pipeline stage into one opaque
//! string, and back.
//!
//! Format: URL-safe base64 (no padding) over header + payload.
//! - 4 bytes: Magic ("CRVC")
//! - 1 byte: Version
//! - postcard-serialized `Vec<CursorEntry>`
//!
//! Cursor strings come from callers, so decoding checks the length before
//! anything else, then the header, then the payload.

use crate::primitives::{CURSOR_FORMAT_VERSION, CURSOR_MAGIC, MAX_CURSOR_LENGTH};
use crate::CorvidError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const HEADER_SIZE: usize = 5;

/// One stage's position: the stage name and its serialized token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntry {
    pub name: String,
    pub token: Vec<u8>,
}

impl CursorEntry {
    /// Serialize a stage position into an entry.
    pub fn new<T: Serialize>(name: impl Into<String>, position: &T) -> Result<Self, CorvidError> {
        let token = postcard::to_allocvec(position)
            .map_err(|e| CorvidError::SerializationError(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            token,
        })
    }

    /// Deserialize the stage position carried by this entry.
    pub fn position<T: DeserializeOwned>(&self) -> Result<T, CorvidError> {
        postcard::from_bytes(&self.token).map_err(|e| {
            CorvidError::InvalidCursor(format!("token for stage '{}': {}", self.name, e))
        })
    }
}

/// Encode stage entries. No entries means no cursor.
pub fn encode_cursor(entries: &[CursorEntry]) -> Result<Option<String>, CorvidError> {
    if entries.is_empty() {
        return Ok(None);
    }
    check_unique(entries)?;

    let payload = postcard::to_allocvec(entries)
        .map_err(|e| CorvidError::SerializationError(e.to_string()))?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(CURSOR_MAGIC);
    bytes.push(CURSOR_FORMAT_VERSION);
    bytes.extend_from_slice(&payload);

    Ok(Some(URL_SAFE_NO_PAD.encode(bytes)))
}

/// Decode a cursor produced by [`encode_cursor`].
pub fn decode_cursor(cursor: &str) -> Result<Vec<CursorEntry>, CorvidError> {
    if cursor.len() > MAX_CURSOR_LENGTH {
        return Err(CorvidError::InvalidCursor(format!(
            "cursor length {} exceeds maximum {}",
            cursor.len(),
            MAX_CURSOR_LENGTH
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| CorvidError::InvalidCursor(e.to_string()))?;
    if bytes.len() < HEADER_SIZE {
        return Err(CorvidError::InvalidCursor("cursor too short".to_string()));
    }
    if &bytes[0..4] != CURSOR_MAGIC {
        return Err(CorvidError::InvalidCursor("invalid magic bytes".to_string()));
    }
    if bytes[4] != CURSOR_FORMAT_VERSION {
        return Err(CorvidError::InvalidCursor(format!(
            "unsupported version: {} (expected {})",
            bytes[4], CURSOR_FORMAT_VERSION
        )));
    }

    let entries: Vec<CursorEntry> = postcard::from_bytes(&bytes[HEADER_SIZE..])
        .map_err(|e| CorvidError::InvalidCursor(e.to_string()))?;
    if entries.is_empty() {
        return Err(CorvidError::InvalidCursor("cursor has no entries".to_string()));
    }
    check_unique(&entries)?;
    Ok(entries)
}

fn check_unique(entries: &[CursorEntry]) -> Result<(), CorvidError> {
    let mut names = BTreeSet::new();
    for entry in entries {
        if entry.name.is_empty() {
            return Err(CorvidError::InvalidCursor("empty stage name".to_string()));
        }
        if !names.insert(entry.name.as_str()) {
            return Err(CorvidError::InvalidCursor(format!(
                "duplicate stage '{}'",
                entry.name
            )));
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
