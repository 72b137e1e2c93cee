//! Bounded, time-limited cache of recent conversation history.
//!
//! Entries go stale after `ttl` and are removed lazily when read. The store
//! never holds more than `max_entries`; inserting a new key at capacity
//! evicts the entry with the oldest insert time.

use std::collections::HashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::config::CacheConfig;
use crate::types::{Message, SessionId};

struct Entry {
    messages: Vec<Message>,
    inserted: Instant,
    /// Breaks ties between entries inserted at the same instant.
    seq: u64,
}

pub struct SessionMessageCache {
    entries: HashMap<SessionId, Entry>,
    config: CacheConfig,
    next_seq: u64,
}

impl SessionMessageCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `messages` for `session`, stamped now.
    pub fn set(&mut self, session: SessionId, messages: Vec<Message>) {
        if !self.entries.contains_key(&session) && self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }
        if self.config.max_entries == 0 {
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            session,
            Entry {
                messages,
                inserted: Instant::now(),
                seq,
            },
        );
    }

    /// Cached messages for `session`, or `None` when absent or expired. An
    /// expired entry is removed.
    pub fn get(&mut self, session: &SessionId) -> Option<&[Message]> {
        let expired = self.entries.get(session).map(|entry| self.is_expired(entry))?;
        if expired {
            trace!(session = %session, "cache entry expired");
            self.entries.remove(session);
            return None;
        }
        self.entries.get(session).map(|entry| entry.messages.as_slice())
    }

    /// Whether a fresh entry exists. Does not remove expired entries.
    pub fn contains_fresh(&self, session: &SessionId) -> bool {
        self.entries
            .get(session)
            .is_some_and(|entry| !self.is_expired(entry))
    }

    pub fn invalidate(&mut self, session: &SessionId) -> bool {
        self.entries.remove(session).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        entry.inserted.elapsed() > self.config.ttl
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.inserted, entry.seq))
            .map(|(session, _)| session.clone());
        if let Some(session) = oldest {
            trace!(session = %session, "evicting oldest cache entry");
            self.entries.remove(&session);
        }
    }
}

impl Default for SessionMessageCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
