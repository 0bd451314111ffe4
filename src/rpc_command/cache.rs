// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Idempotent-response cache: ensures a correlation id is handled by the application at most once
//! while its entry is live, and replays the cached response on redelivery.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::common::mqtt::{Publish, PublishProperties};

/// Uniquely identifies a command request for caching purposes.
#[derive(Eq, Hash, PartialEq, Clone, Debug)]
pub(crate) struct CacheKey {
    pub response_topic: String,
    pub correlation_data: Bytes,
}

#[derive(Clone, Debug)]
enum CacheEntry {
    /// The request is being processed; duplicates must wait rather than re-invoke the handler.
    InProgress { processing_cancellation_token: CancellationToken },
    /// The handler has completed; holds the exact bytes to republish on redelivery.
    Completed { payload: Bytes, properties: PublishProperties, expires_at: Instant },
}

/// Result of a cache lookup.
pub(crate) enum CacheLookupResult {
    /// No entry exists; the caller should register an `InProgress` entry and invoke the handler.
    NotFound,
    /// A handler invocation for this correlation id is already running.
    InProgress(CancellationToken),
    /// The response was already computed; republish it verbatim.
    Completed { payload: Bytes, properties: PublishProperties },
}

struct State {
    entries: HashMap<CacheKey, CacheEntry>,
    max_entries: usize,
}

/// Correlation-id keyed, TTL-bounded, in-flight-aware response cache (spec §4.7).
///
/// At most one `InProgress` entry ever exists per key; `Completed` entries are retained until
/// `ttl` after completion and are replayed verbatim on redelivery. Eviction is monotonic — an
/// evicted key is never resurrected, only re-admitted fresh as a new `InProgress` entry.
#[derive(Clone)]
pub(crate) struct Cache {
    state: Arc<Mutex<State>>,
}

impl Cache {
    /// Creates an empty cache bounded to at most `max_entries` entries.
    pub(crate) fn new(max_entries: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State { entries: HashMap::new(), max_entries })),
        }
    }

    /// Looks up `key`, evicting it first if its TTL has elapsed.
    pub(crate) fn get(&self, key: &CacheKey) -> CacheLookupResult {
        let now = Instant::now();
        let mut state = self.state.lock().expect("cache mutex poisoned");
        match state.entries.get(key) {
            Some(CacheEntry::Completed { payload, properties, expires_at }) if *expires_at > now => {
                CacheLookupResult::Completed { payload: payload.clone(), properties: properties.clone() }
            }
            Some(CacheEntry::Completed { .. }) => {
                state.entries.remove(key);
                CacheLookupResult::NotFound
            }
            Some(CacheEntry::InProgress { processing_cancellation_token }) => {
                CacheLookupResult::InProgress(processing_cancellation_token.clone())
            }
            None => CacheLookupResult::NotFound,
        }
    }

    /// Registers `key` as in-flight. Only valid when [`Cache::get`] just returned `NotFound`.
    pub(crate) fn begin(&self, key: CacheKey, processing_cancellation_token: CancellationToken) {
        let mut state = self.state.lock().expect("cache mutex poisoned");
        state.entries.insert(key, CacheEntry::InProgress { processing_cancellation_token });
    }

    /// Transitions `key` from `InProgress` to `Completed`, retaining the response for `ttl`.
    /// A no-op if `key` is absent (the entry was evicted out from under an in-flight handler).
    pub(crate) fn complete(&self, key: &CacheKey, publish: &Publish, ttl: Duration) {
        let mut state = self.state.lock().expect("cache mutex poisoned");
        if !state.entries.contains_key(key) {
            return;
        }
        state.entries.insert(
            key.clone(),
            CacheEntry::Completed {
                payload: publish.payload.clone(),
                properties: publish.properties.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        evict(&mut state);
    }

    /// Removes `key` outright, e.g. because the in-flight handler was dropped without completing.
    pub(crate) fn abandon(&self, key: &CacheKey) {
        self.state.lock().expect("cache mutex poisoned").entries.remove(key);
    }

    /// Drops every expired `Completed` entry. Intended to run on a 1 Hz background sweep so that
    /// memory is bounded even for correlation ids that are never redelivered.
    pub(crate) fn sweep(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("cache mutex poisoned");
        state.entries.retain(|_, entry| match entry {
            CacheEntry::Completed { expires_at, .. } => *expires_at > now,
            CacheEntry::InProgress { .. } => true,
        });
    }

    /// Spawns the background sweep task; the task exits when `cancellation_token` fires.
    pub(crate) fn spawn_sweeper(&self, cancellation_token: CancellationToken) {
        let cache = self.clone();
        tokio::task::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    () = cancellation_token.cancelled() => break,
                    _ = interval.tick() => cache.sweep(),
                }
            }
        });
    }
}

/// Drops the oldest `Completed` entries first until `entries.len() <= max_entries`. Never evicts
/// an `InProgress` entry even if that leaves the cache over its bound.
fn evict(state: &mut State) {
    if state.entries.len() <= state.max_entries {
        return;
    }
    let mut completed: Vec<(CacheKey, Instant)> = state
        .entries
        .iter()
        .filter_map(|(k, v)| match v {
            CacheEntry::Completed { expires_at, .. } => Some((k.clone(), *expires_at)),
            CacheEntry::InProgress { .. } => None,
        })
        .collect();
    completed.sort_by_key(|(_, expires_at)| *expires_at);

    let over = state.entries.len() - state.max_entries;
    for (key, _) in completed.into_iter().take(over) {
        state.entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> CacheKey {
        CacheKey { response_topic: "resp".to_string(), correlation_data: Bytes::from(vec![n]) }
    }

    fn publish() -> Publish {
        Publish {
            topic: "resp".to_string(),
            payload: Bytes::from_static(b"ok"),
            qos: crate::common::mqtt::QoS::AtLeastOnce,
            retain: false,
            properties: PublishProperties::default(),
        }
    }

    #[test]
    fn fresh_key_is_not_found() {
        let cache = Cache::new(100);
        assert!(matches!(cache.get(&key(1)), CacheLookupResult::NotFound));
    }

    #[test]
    fn in_progress_then_completed_then_replayed() {
        let cache = Cache::new(100);
        let k = key(1);
        let token = CancellationToken::new();
        cache.begin(k.clone(), token);
        assert!(matches!(cache.get(&k), CacheLookupResult::InProgress(_)));

        cache.complete(&k, &publish(), Duration::from_secs(60));
        match cache.get(&k) {
            CacheLookupResult::Completed { payload, .. } => assert_eq!(payload, Bytes::from_static(b"ok")),
            _ => panic!("expected Completed"),
        }
    }

    #[test]
    fn completed_entry_expires_after_ttl() {
        let cache = Cache::new(100);
        let k = key(1);
        cache.begin(k.clone(), CancellationToken::new());
        cache.complete(&k, &publish(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(cache.get(&k), CacheLookupResult::NotFound));
    }

    #[test]
    fn eviction_never_drops_in_progress_entries() {
        let cache = Cache::new(1);
        let in_progress_key = key(1);
        cache.begin(in_progress_key.clone(), CancellationToken::new());

        let completed_key = key(2);
        cache.begin(completed_key.clone(), CancellationToken::new());
        cache.complete(&completed_key, &publish(), Duration::from_secs(60));

        assert!(matches!(cache.get(&in_progress_key), CacheLookupResult::InProgress(_)));
    }

    #[test]
    fn abandon_removes_in_progress_entry() {
        let cache = Cache::new(100);
        let k = key(1);
        cache.begin(k.clone(), CancellationToken::new());
        cache.abandon(&k);
        assert!(matches!(cache.get(&k), CacheLookupResult::NotFound));
    }
}
