//! Bounded in-process cache used when the shared backend is unavailable.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Which entry to drop when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Drop the entry written first. Reads do not affect order.
    #[default]
    InsertionOrder,
    /// Drop the entry read or written least recently.
    LeastRecentlyUsed,
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insertion" | "fifo" => Ok(EvictionPolicy::InsertionOrder),
            "lru" => Ok(EvictionPolicy::LeastRecentlyUsed),
            other => Err(format!("unknown eviction policy: {}", other)),
        }
    }
}

struct LocalEntry {
    value: serde_json::Value,
    expires_at: Instant,
    tick: u64,
}

#[derive(Default)]
struct LocalState {
    entries: HashMap<String, LocalEntry>,
    /// tick -> key; the first entry is the next eviction victim
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl LocalState {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                true
            }
            None => false,
        }
    }

    fn touch(&mut self, key: &str) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }
}

/// Bounded key/value map with per-entry expiry.
pub struct LocalCache {
    max_entries: usize,
    policy: EvictionPolicy,
    state: Mutex<LocalState>,
}

impl LocalCache {
    /// Create a cache holding at most `max_entries` values (minimum 1).
    pub fn new(max_entries: usize, policy: EvictionPolicy) -> Self {
        Self {
            max_entries: max_entries.max(1),
            policy,
            state: Mutex::new(LocalState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        // The map stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut state = self.state();
        let expired = match state.entries.get(key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return None,
        };
        if expired {
            state.remove(key);
            return None;
        }
        if self.policy == EvictionPolicy::LeastRecentlyUsed {
            state.touch(key);
        }
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or overwrite. Returns the evicted key, if any.
    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Option<String> {
        let mut state = self.state();
        let expires_at = Instant::now() + ttl;

        if let Some(entry) = state.entries.get_mut(key) {
            entry.value = value;
            entry.expires_at = expires_at;
            if self.policy == EvictionPolicy::LeastRecentlyUsed {
                state.touch(key);
            }
            return None;
        }

        let mut evicted = None;
        if state.entries.len() >= self.max_entries {
            if let Some((_, victim)) = state.order.pop_first() {
                state.entries.remove(&victim);
                evicted = Some(victim);
            }
        }

        let tick = state.tick();
        state.order.insert(tick, key.to_string());
        state.entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at,
                tick,
            },
        );
        evicted
    }

    pub fn delete(&self, key: &str) -> bool {
        self.state().remove(key)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}
