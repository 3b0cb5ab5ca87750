use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::codec::StateCodec;
use crate::config::{CacheConfig, EngineConfig};
use crate::static_state::{StaticState, TokenOrigin};
use crate::store::SerializedState;
use crate::validate::AnalysisError;

pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded LRU of live documents keyed by the fingerprint of their state.
///
/// Reading is a checkout: a hit removes the entry, so a document has at most
/// one borrower. The borrower stores it back when done.
pub struct DocumentCache<D> {
    name: String,
    /// Key by the static state only.
    static_only: bool,
    entries: Mutex<LruCache<String, D>>,
}

impl<D> DocumentCache<D> {
    pub fn new(name: &str, size: usize, static_only: bool) -> Self {
        Self {
            name: name.to_string(),
            static_only,
            entries: Mutex::new(LruCache::new(capacity(size))),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let CacheConfig {
            document_cache_name,
            document_cache_size,
            ..
        } = &config.cache;
        Self::new(document_cache_name, *document_cache_size, config.ajax_test)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_key(&self, state: &SerializedState) -> String {
        if self.static_only {
            compute_hash(&state.static_state)
        } else {
            compute_hash(&state.to_string())
        }
    }

    pub fn store_document(&self, state: &SerializedState, document: D) {
        let key = self.cache_key(state);
        let evicted = self.entries.lock().push(key.clone(), document);
        tracing::debug!(
            target: "formstate::state",
            cache = %self.name,
            key = %key,
            evicted = evicted.is_some_and(|(k, _)| k != key),
            "stored document"
        );
    }

    /// Find a document and remove it from the cache.
    pub fn take_document(&self, state: &SerializedState) -> Option<D> {
        let key = self.cache_key(state);
        let document = self.entries.lock().pop(&key);
        tracing::debug!(
            target: "formstate::state",
            cache = %self.name,
            key = %key,
            hit = document.is_some(),
            "document lookup"
        );
        document
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATIC STATE CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Restored static states shared between documents, keyed by the digest of
/// their encoded form.
pub struct StaticStateCache {
    entries: Mutex<LruCache<String, Arc<StaticState>>>,
}

impl StaticStateCache {
    pub fn new(size: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity(size))),
        }
    }

    pub fn get(&self, encoded: &str) -> Option<Arc<StaticState>> {
        self.entries.lock().get(&compute_hash(encoded)).cloned()
    }

    pub fn insert(&self, encoded: &str, state: Arc<StaticState>) {
        self.entries.lock().put(compute_hash(encoded), state);
    }

    /// Cached static state for `encoded`, decoding it on a miss. A request
    /// token is verified against the configured password before the lookup.
    pub fn get_or_restore(
        &self,
        encoded: &str,
        origin: TokenOrigin,
        codec: &dyn StateCodec,
        config: &EngineConfig,
    ) -> Result<Arc<StaticState>, AnalysisError> {
        if let (TokenOrigin::Request, Some(password)) = (origin, config.password.as_deref()) {
            codec.verify(encoded, password)?;
        }

        let key = compute_hash(encoded);
        if let Some(state) = self.entries.lock().get(&key) {
            return Ok(Arc::clone(state));
        }

        // Decoded outside the lock; the first state inserted for a key is the one shared
        let state = Arc::new(StaticState::from_encoded(encoded, origin, codec, config)?);
        tracing::debug!(target: "formstate::state", key = %key, "restored static state");

        let mut entries = self.entries.lock();
        let shared = entries.get_or_insert(key, || state);
        Ok(Arc::clone(shared))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
