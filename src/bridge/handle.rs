//! Handle keys, callback tokens, and the session handle arena
//!
//! The handle table itself lives inside the host. The orchestrator only keeps
//! the keys it has been given so that a session can release them in bulk.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque key of a live object in the host's handle table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleKey(String);

impl HandleKey {
    /// Create a handle key from its string form
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one ephemeral callback endpoint, embedded in generated source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackToken(String);

impl CallbackToken {
    /// Create a token from its string form
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many released keys an arena remembers by default
pub const RELEASED_KEYS_REMEMBERED: usize = 4096;

/// Keys handed to this session by the host, plus the ones already released
///
/// Released keys are only remembered up to a limit; past it the oldest are
/// forgotten and a proxy holding one is no longer refused locally.
#[derive(Debug)]
pub struct HandleArena {
    state: Mutex<ArenaState>,
}

#[derive(Debug, Default)]
struct ArenaState {
    live: BTreeSet<HandleKey>,
    /// Released key to its release sequence number
    released: BTreeMap<HandleKey, u64>,
    /// Release sequence number to key, oldest first
    release_order: BTreeMap<u64, HandleKey>,
    next_release: u64,
    released_limit: usize,
}

impl ArenaState {
    fn forget_release(&mut self, key: &HandleKey) {
        if let Some(seq) = self.released.remove(key) {
            self.release_order.remove(&seq);
        }
    }

    fn mark_released(&mut self, key: HandleKey) {
        self.forget_release(&key);
        let seq = self.next_release;
        self.next_release += 1;
        self.released.insert(key.clone(), seq);
        self.release_order.insert(seq, key);

        while self.released.len() > self.released_limit {
            let Some((_, oldest)) = self.release_order.pop_first() else {
                break;
            };
            self.released.remove(&oldest);
        }
    }
}

impl Default for HandleArena {
    fn default() -> Self {
        Self::with_released_limit(RELEASED_KEYS_REMEMBERED)
    }
}

impl HandleArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty arena remembering at most `limit` released keys
    pub fn with_released_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(ArenaState {
                released_limit: limit,
                ..ArenaState::default()
            }),
        }
    }

    /// Remember a key returned by the host
    pub fn record(&self, key: &HandleKey) {
        let mut state = self.state.lock();
        state.forget_release(key);
        state.live.insert(key.clone());
    }

    /// Number of keys currently held by this session
    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Check whether the arena holds no keys
    pub fn is_empty(&self) -> bool {
        self.state.lock().live.is_empty()
    }

    /// Check whether a key was given to this session and not yet released
    pub fn contains(&self, key: &HandleKey) -> bool {
        self.state.lock().live.contains(key)
    }

    /// Check whether a key has been released by this session
    pub fn is_released(&self, key: &HandleKey) -> bool {
        self.state.lock().released.contains_key(key)
    }

    /// Number of released keys still remembered
    pub fn released_len(&self) -> usize {
        self.state.lock().released.len()
    }

    /// Snapshot of the live keys, in key order
    pub fn keys(&self) -> Vec<HandleKey> {
        self.state.lock().live.iter().cloned().collect()
    }

    /// Move every live key to the released set and return them
    pub fn drain(&self) -> Vec<HandleKey> {
        let mut state = self.state.lock();
        let keys: Vec<HandleKey> = std::mem::take(&mut state.live).into_iter().collect();
        for key in &keys {
            state.mark_released(key.clone());
        }
        keys
    }

    /// Put keys back after a failed release round trip
    pub fn restore(&self, keys: &[HandleKey]) {
        let mut state = self.state.lock();
        for key in keys {
            state.forget_release(key);
            state.live.insert(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_records_and_drains() {
        let arena = HandleArena::new();
        arena.record(&HandleKey::new("b"));
        arena.record(&HandleKey::new("a"));
        arena.record(&HandleKey::new("a"));
        assert_eq!(arena.len(), 2);

        let drained = arena.drain();
        assert_eq!(drained, vec![HandleKey::new("a"), HandleKey::new("b")]);
        assert!(arena.is_empty());
        assert!(arena.is_released(&HandleKey::new("a")));
    }

    #[test]
    fn restore_undoes_release() {
        let arena = HandleArena::new();
        arena.record(&HandleKey::new("k"));
        let drained = arena.drain();
        arena.restore(&drained);
        assert!(arena.contains(&HandleKey::new("k")));
        assert!(!arena.is_released(&HandleKey::new("k")));
    }

    #[test]
    fn released_keys_are_forgotten_oldest_first() {
        let arena = HandleArena::with_released_limit(3);
        for round in 0..3 {
            arena.record(&HandleKey::new(format!("a{round}")));
            arena.record(&HandleKey::new(format!("b{round}")));
            arena.drain();
        }

        assert_eq!(arena.released_len(), 3);
        assert!(!arena.is_released(&HandleKey::new("a0")));
        assert!(!arena.is_released(&HandleKey::new("a1")));
        assert!(arena.is_released(&HandleKey::new("b1")));
        assert!(arena.is_released(&HandleKey::new("a2")));
        assert!(arena.is_released(&HandleKey::new("b2")));

        arena.record(&HandleKey::new("b2"));
        assert!(!arena.is_released(&HandleKey::new("b2")));
        assert_eq!(arena.released_len(), 2);
    }

    #[test]
    fn default_limit_bounds_long_sessions() {
        let arena = HandleArena::new();
        for n in 0..RELEASED_KEYS_REMEMBERED + 10 {
            arena.record(&HandleKey::new(n.to_string()));
            arena.drain();
        }
        assert_eq!(arena.released_len(), RELEASED_KEYS_REMEMBERED);
        assert!(!arena.is_released(&HandleKey::new("0")));
        assert!(arena.is_released(&HandleKey::new("10")));
    }
}
