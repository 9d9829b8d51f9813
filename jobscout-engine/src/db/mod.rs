//! Persistence modules, one per table
//!
//! Each module owns its row struct and queries, in the same shape as the
//! rest of the service: upserts keyed by the schema's unique constraints,
//! RFC 3339 timestamps, JSON-encoded string lists, embeddings as
//! little-endian f32 BLOBs.

pub mod candidates;
pub mod companies;
pub mod discovery_queue;
pub mod jobs;
pub mod jobs_raw;
pub mod matches;
pub mod runs;
pub mod snapshots;

use chrono::{DateTime, Utc};

pub use jobscout_common::db::{init_database, init_memory_database};

/// Serialize a timestamp for storage.
pub(crate) fn ts_to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a stored timestamp; malformed values read as None.
pub(crate) fn ts_from_db(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Encode a string list as JSON for a TEXT column. Empty lists store NULL.
pub(crate) fn list_to_db(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        serde_json::to_string(items).ok()
    }
}

/// Decode a JSON string list column.
pub(crate) fn list_from_db(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Pack an embedding into little-endian f32 bytes.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Unpack an embedding BLOB.
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in [-1, 1]; zero vectors compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
