// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Optional chunking sub-protocol: splits a publish payload too large for the broker's
//! `max_packet_size` into indexed chunks, and reassembles them back into one logical message
//! on the receiving side.
//!
//! A chunk descriptor travels as the JSON-encoded `__chunk` reserved user property
//! ([`UserProperty::ChunkInfo`]). Chunk 0 additionally carries `total_chunks` and a SHA-256
//! `checksum` of the unsplit payload; every other chunk carries only `message_id` and
//! `chunk_index`. [`Reassembler`] tracks partial sets keyed by `message_id`, evicting any set
//! that has not completed within its `timeout`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::user_properties::UserProperty;

/// Per-chunk descriptor carried in the `__chunk` user property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Identifies the logical message this chunk belongs to.
    pub message_id: String,
    /// Zero-based position of this chunk within the set.
    pub chunk_index: u32,
    /// Total number of chunks in the set. Only present on chunk 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    /// Lowercase hex SHA-256 digest of the unsplit payload. Only present on chunk 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// How long the receiver should wait for the remaining chunks before discarding the set.
    pub timeout: Duration,
}

/// A single chunk ready to publish: the descriptor plus its slice of the original payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk descriptor, encoded onto the outgoing publish as the `__chunk` user property.
    pub info: ChunkInfo,
    /// This chunk's slice of the original payload.
    pub payload: Vec<u8>,
}

impl ChunkInfo {
    /// Serializes this descriptor as the `(name, value)` pair for the `__chunk` reserved
    /// user property.
    #[must_use]
    pub fn to_user_property(&self) -> (String, String) {
        (
            UserProperty::ChunkInfo.to_string(),
            serde_json::to_string(self).unwrap_or_default(),
        )
    }

    /// Parses a `__chunk` user property value back into a descriptor.
    ///
    /// # Errors
    /// Returns the `serde_json` error if `value` is not a valid chunk descriptor.
    pub fn from_user_property(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

/// Splits `payload` into chunks of at most `chunk_size` bytes, each tagged `message_id` and
/// bounded by `timeout`. Chunk 0 carries `total_chunks` and the SHA-256 checksum of `payload`.
///
/// Returns a single chunk (with `total_chunks: Some(1)` and a checksum) if `payload` already
/// fits within `chunk_size`.
///
/// # Panics
/// Panics if `chunk_size` is zero.
#[must_use]
pub fn split(payload: &[u8], chunk_size: usize, message_id: String, timeout: Duration) -> Vec<Chunk> {
    assert!(chunk_size > 0, "chunk_size must be non-zero");

    let checksum = format!("{:x}", Sha256::digest(payload));
    let slices: Vec<&[u8]> = if payload.is_empty() {
        vec![&payload[..]]
    } else {
        payload.chunks(chunk_size).collect()
    };
    let total_chunks = u32::try_from(slices.len()).expect("chunk count fits in u32");

    slices
        .into_iter()
        .enumerate()
        .map(|(index, slice)| {
            let chunk_index = u32::try_from(index).expect("chunk index fits in u32");
            let info = ChunkInfo {
                message_id: message_id.clone(),
                chunk_index,
                total_chunks: (chunk_index == 0).then_some(total_chunks),
                checksum: (chunk_index == 0).then(|| checksum.clone()),
                timeout,
            };
            Chunk { info, payload: slice.to_vec() }
        })
        .collect()
}

/// Why a chunk was rejected by [`Reassembler::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    /// The set's checksum (carried on chunk 0) did not match the reassembled payload.
    #[error("reassembled payload does not match the expected checksum")]
    ChecksumMismatch,
    /// `chunk_index` exceeds the `total_chunks` announced by chunk 0.
    #[error("chunk index is out of range for the announced chunk count")]
    IndexOutOfRange,
}

struct PartialSet {
    total_chunks: Option<u32>,
    checksum: Option<String>,
    chunks: HashMap<u32, Vec<u8>>,
    expires_at: Instant,
}

struct State {
    sets: HashMap<String, PartialSet>,
}

/// Reassembles chunked payloads back into complete messages.
///
/// Tracks one [`PartialSet`] per `message_id`; a set is evicted, and can never be resurrected,
/// once its `timeout` elapses without having received every chunk (mirrors the monotonic
/// eviction rule of [`rpc_command::cache::Cache`](crate::rpc_command::cache)).
#[derive(Clone)]
pub struct Reassembler {
    state: Arc<Mutex<State>>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Creates an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(State { sets: HashMap::new() })) }
    }

    /// Feeds one chunk into the reassembler. Evicts any expired set for this `message_id` first.
    ///
    /// Returns `Ok(Some(payload))` once every chunk of the set has arrived and the checksum
    /// validates, `Ok(None)` while the set is still incomplete, or `Err` if validation fails
    /// (the partial set is discarded in that case).
    ///
    /// # Errors
    /// Returns [`ChunkError::IndexOutOfRange`] if `chunk.info.chunk_index` is not less than the
    /// set's announced `total_chunks`, or [`ChunkError::ChecksumMismatch`] if the reassembled
    /// payload does not match chunk 0's checksum.
    pub fn accept(&self, chunk: Chunk) -> Result<Option<Vec<u8>>, ChunkError> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("reassembler mutex poisoned");

        if let Some(set) = state.sets.get(&chunk.info.message_id) {
            if set.expires_at <= now {
                state.sets.remove(&chunk.info.message_id);
            }
        }

        let set = state.sets.entry(chunk.info.message_id.clone()).or_insert_with(|| PartialSet {
            total_chunks: None,
            checksum: None,
            chunks: HashMap::new(),
            expires_at: now + chunk.info.timeout,
        });

        if let Some(total_chunks) = chunk.info.total_chunks {
            set.total_chunks = Some(total_chunks);
        }
        if let Some(checksum) = chunk.info.checksum {
            set.checksum = Some(checksum);
        }
        if let Some(total_chunks) = set.total_chunks {
            if chunk.info.chunk_index >= total_chunks {
                state.sets.remove(&chunk.info.message_id);
                return Err(ChunkError::IndexOutOfRange);
            }
        }
        set.chunks.insert(chunk.info.chunk_index, chunk.payload);

        let Some(total_chunks) = set.total_chunks else {
            return Ok(None);
        };
        if u32::try_from(set.chunks.len()).expect("chunk count fits in u32") < total_chunks {
            return Ok(None);
        }

        let mut payload = Vec::new();
        for index in 0..total_chunks {
            payload.extend(set.chunks.get(&index).expect("all indices present").iter().copied());
        }
        let expected_checksum = set.checksum.clone();
        state.sets.remove(&chunk.info.message_id);

        if let Some(expected_checksum) = expected_checksum {
            let actual_checksum = format!("{:x}", Sha256::digest(&payload));
            if actual_checksum != expected_checksum {
                return Err(ChunkError::ChecksumMismatch);
            }
        }

        Ok(Some(payload))
    }

    /// Drops every partial set whose `timeout` has elapsed without completing.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("reassembler mutex poisoned");
        state.sets.retain(|_, set| set.expires_at > now);
    }

    /// Discards every in-progress partial set, e.g. on MQTT disconnect.
    pub fn discard_all(&self) {
        self.state.lock().expect("reassembler mutex poisoned").sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_of_small_payload_is_a_single_chunk() {
        let chunks = split(b"hello", 1024, "m1".to_string(), Duration::from_secs(5));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].info.chunk_index, 0);
        assert_eq!(chunks[0].info.total_chunks, Some(1));
        assert!(chunks[0].info.checksum.is_some());
    }

    #[test]
    fn reassemble_after_split_round_trips() {
        let payload = b"the quick brown fox jumps over the lazy dog".to_vec();
        let chunks = split(&payload, 7, "m2".to_string(), Duration::from_secs(5));
        assert!(chunks.len() > 1);

        let reassembler = Reassembler::new();
        let mut result = None;
        for chunk in chunks {
            result = reassembler.accept(chunk).unwrap();
        }
        assert_eq!(result, Some(payload));
    }

    #[test]
    fn out_of_order_chunks_still_reassemble() {
        let payload = b"0123456789abcdef".to_vec();
        let mut chunks = split(&payload, 4, "m3".to_string(), Duration::from_secs(5));
        chunks.reverse();

        let reassembler = Reassembler::new();
        let mut result = None;
        for chunk in chunks {
            result = reassembler.accept(chunk).unwrap();
        }
        assert_eq!(result, Some(payload));
    }

    #[test]
    fn missing_chunk_never_completes_and_expires() {
        let payload = b"0123456789abcdef".to_vec();
        let mut chunks = split(&payload, 4, "m4".to_string(), Duration::from_millis(0));
        chunks.pop();

        let reassembler = Reassembler::new();
        for chunk in chunks {
            assert_eq!(reassembler.accept(chunk).unwrap(), None);
        }
        std::thread::sleep(Duration::from_millis(5));
        reassembler.sweep();
        assert_eq!(reassembler.state.lock().unwrap().sets.len(), 0);
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let payload = b"0123456789abcdef".to_vec();
        let mut chunks = split(&payload, 4, "m5".to_string(), Duration::from_secs(5));
        chunks[1].payload[0] ^= 0xFF;

        let reassembler = Reassembler::new();
        let last = chunks.pop().unwrap();
        for chunk in chunks {
            assert_eq!(reassembler.accept(chunk).unwrap(), None);
        }
        assert_eq!(reassembler.accept(last), Err(ChunkError::ChecksumMismatch));
    }

    #[test]
    fn chunk_info_json_round_trips_through_user_property() {
        let info = ChunkInfo {
            message_id: "m6".to_string(),
            chunk_index: 0,
            total_chunks: Some(3),
            checksum: Some("abc123".to_string()),
            timeout: Duration::from_secs(30),
        };
        let (name, value) = info.to_user_property();
        assert_eq!(name, "__chunk");
        assert_eq!(ChunkInfo::from_user_property(&value).unwrap(), info);
    }

    #[test]
    fn discard_all_clears_in_progress_sets() {
        let payload = b"0123456789abcdef".to_vec();
        let mut chunks = split(&payload, 4, "m7".to_string(), Duration::from_secs(5));
        chunks.pop();

        let reassembler = Reassembler::new();
        for chunk in chunks {
            reassembler.accept(chunk).unwrap();
        }
        reassembler.discard_all();
        assert_eq!(reassembler.state.lock().unwrap().sets.len(), 0);
    }
}
