//! Versioned wire codec for control records.
//!
//! The encoded form is `"<version>#<base64>"`, e.g. `1#eyJkZXNjIjog...`.
//! Version 1 payloads are JSON objects with `desc`, `owner`, and `tags`
//! fields; unknown fields are ignored and missing fields default to empty,
//! so records written by newer revisions stay readable here. Any other
//! version prefix, or no prefix at all, is treated as the pre-versioned
//! binary encoding and accepted for reads only.
//!
//! Empty text decodes to the zero record without error, because an account
//! whose metadata slot was provisioned but never written is a managed
//! account with nothing on it, not a corrupt one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ControlRecord;

/// Wire format version produced by [`encode`].
pub const FORMAT_VERSION: u32 = 1;

/// Upper bound on the encoded text, inclusive. This is the capacity of the
/// metadata slot the record is persisted in, so [`encode`] refuses to
/// produce anything longer rather than let the store truncate it.
pub const MAX_ENCODED_LEN: usize = 1000;

/// Error raised by [`encode`] and [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The encoded record does not fit the backing metadata slot.
    #[error("encoded control record is {len} bytes, limit is {max}")]
    TooLong {
        /// Actual encoded length.
        len: usize,
        /// The [`MAX_ENCODED_LEN`] limit.
        max: usize,
    },

    /// The text after the version prefix is not valid base64.
    #[error("malformed base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The base64-decoded payload does not parse under the given version.
    #[error("cannot interpret version {version} payload: {message}")]
    Payload {
        /// Version the payload claimed (0 for the pre-versioned format).
        version: u32,
        /// Parser diagnostic.
        message: String,
    },
}

/// Shape of the pre-versioned binary payload. Field order is the wire
/// contract and must not change.
///
/// Read-only migration shim: drop this once no pool account still carries
/// an unversioned record.
#[derive(Debug, bincode::Decode)]
#[cfg_attr(test, derive(bincode::Encode))]
struct LegacyRecord {
    desc: String,
    owner: String,
    tags: Vec<String>,
}

/// Version 1 JSON payload. Kept separate from [`ControlRecord`] so the
/// in-memory type can evolve without silently changing the wire format.
#[derive(Serialize, Deserialize)]
struct PayloadV1 {
    #[serde(default)]
    desc: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// Encodes a record into its versioned wire form.
///
/// Tags are canonicalized first, so two semantically equal records always
/// encode to identical text. Fails only when the result would overflow
/// [`MAX_ENCODED_LEN`].
pub fn encode(record: &ControlRecord) -> Result<String, CodecError> {
    let mut tags = record.tags.clone();
    tags.sort_unstable();
    tags.dedup();
    let payload = PayloadV1 {
        desc: record.desc.clone(),
        owner: record.owner.clone(),
        tags,
    };
    let json = serde_json::to_vec(&payload).map_err(|err| CodecError::Payload {
        version: FORMAT_VERSION,
        message: err.to_string(),
    })?;
    let text = format!("{FORMAT_VERSION}#{}", STANDARD.encode(json));
    if text.len() > MAX_ENCODED_LEN {
        return Err(CodecError::TooLong {
            len: text.len(),
            max: MAX_ENCODED_LEN,
        });
    }
    Ok(text)
}

/// Decodes wire text into a record.
///
/// Empty text yields the zero record. A `1#` prefix selects the JSON
/// payload; any other prefix, or none, falls back to the legacy binary
/// payload. On error the caller must treat the record as unknown rather
/// than keep a partially decoded value; no partial state is returned.
pub fn decode(text: &str) -> Result<ControlRecord, CodecError> {
    if text.is_empty() {
        return Ok(ControlRecord::new());
    }
    let (version, payload) = split_version(text);
    let bytes = STANDARD.decode(payload)?;
    let mut record = match version {
        Some(FORMAT_VERSION) => decode_v1(&bytes)?,
        other => decode_legacy(&bytes, other)?,
    };
    record.canonicalize_tags();
    Ok(record)
}

/// Splits an optional `<digits>#` prefix off the wire text. Text without a
/// parseable prefix is handed to the legacy decoder whole.
fn split_version(text: &str) -> (Option<u32>, &str) {
    let Some((prefix, rest)) = text.split_once('#') else {
        return (None, text);
    };
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return (None, text);
    }
    match prefix.parse::<u32>() {
        Ok(version) => (Some(version), rest),
        Err(_) => (None, text),
    }
}

fn decode_v1(bytes: &[u8]) -> Result<ControlRecord, CodecError> {
    let payload: PayloadV1 =
        serde_json::from_slice(bytes).map_err(|err| CodecError::Payload {
            version: FORMAT_VERSION,
            message: err.to_string(),
        })?;
    Ok(ControlRecord {
        desc: payload.desc,
        owner: payload.owner,
        tags: payload.tags,
    })
}

fn decode_legacy(bytes: &[u8], version: Option<u32>) -> Result<ControlRecord, CodecError> {
    let (legacy, _) = bincode::decode_from_slice::<LegacyRecord, _>(bytes, bincode::config::standard())
        .map_err(|err| CodecError::Payload {
            version: version.unwrap_or(0),
            message: err.to_string(),
        })?;
    Ok(ControlRecord {
        desc: legacy.desc,
        owner: legacy.owner,
        tags: legacy.tags,
    })
}
