//! Backing stores for indirect state tokens.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;

use crate::config::DEFAULT_STATE_STORE_SIZE;

/// A static/dynamic state pair. Used as a key: equality is exact string
/// equality of both halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedState {
    pub static_state: String,
    pub dynamic_state: String,
}

impl SerializedState {
    pub fn new(static_state: impl Into<String>, dynamic_state: impl Into<String>) -> Self {
        Self {
            static_state: static_state.into(),
            dynamic_state: dynamic_state.into(),
        }
    }
}

impl fmt::Display for SerializedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.static_state, self.dynamic_state)
    }
}

/// Stores encoded state under the keys handed out in indirect tokens.
pub trait StateStore: Send + Sync {
    fn find(&self, static_key: &str, dynamic_key: &str) -> Option<SerializedState>;
    fn add(&self, static_key: &str, dynamic_key: &str, state: SerializedState);
}

/// Process-local store, bounded by the number of dynamic states it holds.
/// The least recently used dynamic state is evicted first; a static state
/// is dropped with the last dynamic state pointing at it.
#[derive(Debug)]
pub struct InMemoryStateStore {
    entries: Mutex<Entries>,
}

#[derive(Debug)]
struct Entries {
    /// Static key -> (encoded static state, number of dynamic states using it).
    static_states: HashMap<String, (String, usize)>,
    /// Dynamic key -> (static key, encoded dynamic state).
    dynamic_states: LruCache<String, (String, String)>,
}

impl Entries {
    fn release(&mut self, static_key: &str) {
        if let Some((_, users)) = self.static_states.get_mut(static_key) {
            *users -= 1;
            if *users == 0 {
                self.static_states.remove(static_key);
            }
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_STORE_SIZE)
    }
}

impl InMemoryStateStore {
    pub fn new(size: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                static_states: HashMap::new(),
                dynamic_states: LruCache::new(NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().dynamic_states.cap().get()
    }

    /// Number of dynamic states held.
    pub fn len(&self) -> usize {
        self.entries.lock().dynamic_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().dynamic_states.is_empty()
    }

    pub fn static_len(&self) -> usize {
        self.entries.lock().static_states.len()
    }
}

impl StateStore for InMemoryStateStore {
    fn find(&self, static_key: &str, dynamic_key: &str) -> Option<SerializedState> {
        let mut entries = self.entries.lock();
        let (owner, dynamic_state) = entries.dynamic_states.get(dynamic_key)?;
        if owner != static_key {
            return None;
        }
        let dynamic_state = dynamic_state.clone();
        let (static_state, _) = entries.static_states.get(static_key)?;
        Some(SerializedState::new(static_state.clone(), dynamic_state))
    }

    fn add(&self, static_key: &str, dynamic_key: &str, state: SerializedState) {
        let mut entries = self.entries.lock();
        entries
            .static_states
            .entry(static_key.to_string())
            .or_insert_with(|| (state.static_state, 0))
            .1 += 1;

        // Either an evicted entry or the one replaced under the same key
        let displaced = entries.dynamic_states.push(
            dynamic_key.to_string(),
            (static_key.to_string(), state.dynamic_state),
        );
        if let Some((evicted_key, (owner, _))) = displaced {
            entries.release(&owner);
            if evicted_key != dynamic_key {
                tracing::debug!(
                    target: "formstate::state",
                    dynamic_key = %evicted_key,
                    static_key = %owner,
                    "evicted stored state"
                );
            }
        }
    }
}
