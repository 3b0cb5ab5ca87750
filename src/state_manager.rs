//! # State Distribution
//!
//! Resolves the static/dynamic token pair of an incoming request to a live
//! document, and hands out the tokens of the next response.
//!
//! A token is either the encoded state itself (direct) or a store key
//! preceded by a fixed-width prefix (indirect):
//!
//! | Prefix  | Store                          |
//! |---------|--------------------------------|
//! | `pers:` | persistent store               |
//! | `sess:` | session store, when registered |
//!
//! Live documents are kept in a [`DocumentCache`] between requests. Reading
//! the cache is a checkout, so a document serves one request at a time.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{DocumentCache, StaticStateCache};
use crate::codec::{CodecError, StateCodec};
use crate::config::EngineConfig;
use crate::document::{ns, Document};
use crate::properties::SESSION_HEARTBEAT_PROPERTY;
use crate::static_state::{StaticState, TokenOrigin};
use crate::store::{InMemoryStateStore, SerializedState, StateStore};
use crate::validate::AnalysisError;

pub const PERSISTENT_STATE_PREFIX: &str = "pers:";
pub const SESSION_STATE_PREFIX: &str = "sess:";
/// All prefixes have the same length; the colon sits at this offset.
pub const PREFIX_COLON_POSITION: usize = PERSISTENT_STATE_PREFIX.len() - 1;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Session has expired. Unable to process incoming request.")]
    NoSession,

    #[error("Inconsistent XForms state prefixes: {static_prefix}, {dynamic_prefix}")]
    InconsistentPrefixes {
        static_prefix: String,
        dynamic_prefix: String,
    },

    #[error("Invalid state prefix: {prefix}")]
    InvalidPrefix { prefix: String },

    #[error("Your session has expired. Please reload the current page. Note that you will lose any unsaved changes. Static state key: {static_key}, dynamic state key: {dynamic_key}")]
    SessionExpired {
        static_key: String,
        dynamic_key: String,
    },

    #[error("Unable to retrieve XForms engine state. Please reload the current page. Note that you will lose any unsaved changes. Static state key: {static_key}, dynamic state key: {dynamic_key}")]
    UnableToRetrieve {
        static_key: String,
        dynamic_key: String,
    },

    #[error("Malformed state request: {reason}")]
    MalformedRequest { reason: String },

    #[error("Unable to restore document: {reason}")]
    Restore { reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateToken<'a> {
    /// The token is the encoded state.
    Direct(&'a str),
    /// The token is a store key.
    Indirect { prefix: &'a str, key: &'a str },
}

impl<'a> StateToken<'a> {
    pub fn parse(token: &'a str) -> Self {
        // The byte at the colon position is ASCII, so both halves are valid slices
        if token.len() > PREFIX_COLON_POSITION && token.as_bytes()[PREFIX_COLON_POSITION] == b':' {
            let (prefix, key) = token.split_at(PREFIX_COLON_POSITION + 1);
            Self::Indirect { prefix, key }
        } else {
            Self::Direct(token)
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, Self::Indirect { .. })
    }

    pub fn prefix(&self) -> Option<&'a str> {
        match self {
            Self::Indirect { prefix, .. } => Some(prefix),
            Self::Direct(_) => None,
        }
    }

    /// The store key of an indirect token, the whole token otherwise.
    pub fn key(&self) -> &'a str {
        match self {
            Self::Indirect { key, .. } => key,
            Self::Direct(token) => token,
        }
    }

    /// Whether resolving this token needs the user's session.
    pub fn is_session_dependent(&self) -> bool {
        matches!(
            self.prefix(),
            Some(PERSISTENT_STATE_PREFIX) | Some(SESSION_STATE_PREFIX)
        )
    }
}

/// Request tokens read from the `xxf:static-state` and `xxf:dynamic-state`
/// elements of a request document.
pub fn read_request_tokens(request: &Document) -> Result<(String, String), StateError> {
    let root = request.root();
    let token = |local: &str| {
        request
            .first_child_named(root, ns::XXFORMS, local)
            .map(|element| request.text_content(element).trim().to_string())
            .ok_or_else(|| StateError::MalformedRequest {
                reason: format!("missing xxf:{} element", local),
            })
    };
    Ok((token("static-state")?, token("dynamic-state")?))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST SEAMS
// ═══════════════════════════════════════════════════════════════════════════════

/// The user session a request belongs to.
pub trait Session {
    /// Created by the current request.
    fn is_new(&self) -> bool;

    /// Seconds of inactivity before the session expires.
    fn max_inactive_interval(&self) -> i64;
}

/// A live form document: a shared static state plus per-session dynamic state.
pub trait LiveDocument: Send {
    fn static_state(&self) -> &Arc<StaticState>;

    /// Key of the current dynamic state.
    fn dynamic_state_uuid(&self) -> &str;

    fn encode_dynamic_state(&self, codec: &dyn StateCodec) -> Result<String, StateError>;

    /// Whether the dynamic state changed since the last response.
    fn is_dirty_since_last_request(&self) -> bool;

    /// Snapshot the dynamic state under a new uuid.
    fn update_dynamic_state(&mut self);

    /// Key of the document in the document cache and the stores.
    fn state_keys(&self) -> SerializedState {
        SerializedState::new(self.static_state().uuid(), self.dynamic_state_uuid())
    }
}

/// Rebuilds a live document from its static state and encoded dynamic state.
pub trait DocumentFactory<D: LiveDocument>: Send + Sync {
    fn restore(&self, static_state: Arc<StaticState>, encoded_dynamic_state: &str) -> Result<D, StateError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct StateManager<D: LiveDocument> {
    config: EngineConfig,
    codec: Arc<dyn StateCodec>,
    documents: DocumentCache<D>,
    static_states: StaticStateCache,
    stores: HashMap<&'static str, Arc<dyn StateStore>>,
}

impl<D: LiveDocument> StateManager<D> {
    pub fn new(config: EngineConfig, codec: Arc<dyn StateCodec>) -> Self {
        let mut stores: HashMap<&'static str, Arc<dyn StateStore>> = HashMap::new();
        stores.insert(
            PERSISTENT_STATE_PREFIX,
            Arc::new(InMemoryStateStore::new(config.cache.state_store_size)),
        );
        Self {
            documents: DocumentCache::from_config(&config),
            static_states: StaticStateCache::new(config.cache.static_state_cache_size),
            config,
            codec,
            stores,
        }
    }

    pub fn with_persistent_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.stores.insert(PERSISTENT_STATE_PREFIX, store);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.stores.insert(SESSION_STATE_PREFIX, store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &dyn StateCodec {
        self.codec.as_ref()
    }

    pub fn document_cache(&self) -> &DocumentCache<D> {
        &self.documents
    }

    pub fn static_state_cache(&self) -> &StaticStateCache {
        &self.static_states
    }

    pub fn store(&self, prefix: &str) -> Option<&Arc<dyn StateStore>> {
        self.stores.get(prefix)
    }

    /// Restore a static state from its encoded form, sharing it with every
    /// document built from the same token.
    pub fn restore_static_state(
        &self,
        encoded: &str,
        origin: TokenOrigin,
    ) -> Result<Arc<StaticState>, StateError> {
        Ok(self
            .static_states
            .get_or_restore(encoded, origin, self.codec.as_ref(), &self.config)?)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Incoming requests
    // ───────────────────────────────────────────────────────────────────────────

    /// Resolve the live document a request refers to: from the document
    /// cache when possible, otherwise rebuilt from the decoded state.
    pub fn find_or_restore_document(
        &self,
        request: &Document,
        session: Option<&dyn Session>,
        factory: &dyn DocumentFactory<D>,
    ) -> Result<D, StateError> {
        let (static_token, dynamic_token) = read_request_tokens(request)?;
        let parsed_static = StateToken::parse(&static_token);
        let parsed_dynamic = StateToken::parse(&dynamic_token);

        if session.is_none() && parsed_static.is_session_dependent() {
            let error = StateError::NoSession;
            tracing::error!(target: "formstate::state", "{}", error);
            return Err(error);
        }

        if self.config.cache.cache_document {
            let key = SerializedState::new(parsed_static.key(), parsed_dynamic.key());
            if let Some(document) = self.documents.take_document(&key) {
                tracing::debug!(target: "formstate::state", "document cache hit");
                return Ok(document);
            }
        }

        let state = self.decode_client_state(&static_token, &dynamic_token, session)?;
        let origin = match parsed_static {
            StateToken::Indirect { .. } => TokenOrigin::Store,
            StateToken::Direct(_) => TokenOrigin::Request,
        };
        let static_state = self.restore_static_state(&state.static_state, origin)?;
        let document = factory.restore(static_state, &state.dynamic_state)?;
        tracing::debug!(target: "formstate::state", "restored document from state");
        Ok(document)
    }

    /// Turn a token pair into encoded state, reading the store for indirect
    /// tokens.
    pub fn decode_client_state(
        &self,
        static_token: &str,
        dynamic_token: &str,
        session: Option<&dyn Session>,
    ) -> Result<SerializedState, StateError> {
        let parsed_static = StateToken::parse(static_token);
        let parsed_dynamic = StateToken::parse(dynamic_token);

        let StateToken::Indirect { prefix, key: static_key } = parsed_static else {
            return Ok(SerializedState::new(static_token, dynamic_token));
        };

        let dynamic_prefix = parsed_dynamic.prefix().unwrap_or_default();
        if prefix != dynamic_prefix {
            let error = StateError::InconsistentPrefixes {
                static_prefix: prefix.to_string(),
                dynamic_prefix: dynamic_prefix.to_string(),
            };
            tracing::error!(target: "formstate::state", "{}", error);
            return Err(error);
        }
        let dynamic_key = parsed_dynamic.key();

        let store = self.stores.get(prefix).ok_or_else(|| {
            let error = StateError::InvalidPrefix {
                prefix: prefix.to_string(),
            };
            tracing::error!(target: "formstate::state", "{}", error);
            error
        })?;

        match store.find(static_key, dynamic_key) {
            Some(state) => Ok(state),
            None => {
                let static_key = static_key.to_string();
                let dynamic_key = dynamic_key.to_string();
                let error = match session {
                    None => StateError::SessionExpired { static_key, dynamic_key },
                    Some(session) if session.is_new() => StateError::SessionExpired { static_key, dynamic_key },
                    Some(_) => StateError::UnableToRetrieve { static_key, dynamic_key },
                };
                tracing::error!(target: "formstate::state", "{}", error);
                Err(error)
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Outgoing responses
    // ───────────────────────────────────────────────────────────────────────────

    /// Static state token of the next response.
    pub fn client_encoded_static_state(&self, document: &D) -> Result<String, StateError> {
        let static_state = document.static_state();
        if static_state.is_client_state_handling() {
            Ok(static_state.serialize(self.codec.as_ref())?)
        } else {
            Ok(format!("{}{}", PERSISTENT_STATE_PREFIX, static_state.uuid()))
        }
    }

    /// Dynamic state token of the next response.
    pub fn client_encoded_dynamic_state(&self, document: &D) -> Result<String, StateError> {
        if document.static_state().is_client_state_handling() {
            document.encode_dynamic_state(self.codec.as_ref())
        } else {
            Ok(format!("{}{}", PERSISTENT_STATE_PREFIX, document.dynamic_state_uuid()))
        }
    }

    pub fn after_initial_response(&self, document: D) -> Result<(), StateError> {
        self.persist(&document)?;
        self.cache_document(document)
    }

    pub fn before_update_response(&self, document: &mut D) {
        if document.is_dirty_since_last_request() {
            tracing::debug!(target: "formstate::state", "Document is dirty: generate new dynamic state.");
            document.update_dynamic_state();
        } else {
            tracing::debug!(target: "formstate::state", "Document is not dirty: keep existing dynamic state.");
        }
    }

    pub fn after_update_response(&self, document: D) -> Result<(), StateError> {
        self.persist(&document)?;
        self.cache_document(document)
    }

    /// Milliseconds between session heartbeats, `-1` when none are needed.
    pub fn heartbeat_delay(&self, document: &D, session: Option<&dyn Session>) -> i64 {
        let static_state = document.static_state();
        if static_state.is_client_state_handling() {
            return -1;
        }
        match session {
            Some(session) if static_state.boolean_property(SESSION_HEARTBEAT_PROPERTY).unwrap_or(false) => {
                session.max_inactive_interval() * 800
            }
            _ => -1,
        }
    }

    /// Store the document under the keys the next request will carry: store
    /// keys for server-held state, the encoded state itself otherwise.
    fn cache_document(&self, document: D) -> Result<(), StateError> {
        if !self.config.cache.cache_document {
            return Ok(());
        }
        let static_state = document.static_state();
        let key = if static_state.is_client_state_handling() {
            SerializedState::new(
                static_state.serialize(self.codec.as_ref())?,
                document.encode_dynamic_state(self.codec.as_ref())?,
            )
        } else {
            document.state_keys()
        };
        self.documents.store_document(&key, document);
        Ok(())
    }

    /// Write server-held state to the persistent store.
    fn persist(&self, document: &D) -> Result<(), StateError> {
        let static_state = document.static_state();
        if static_state.is_client_state_handling() {
            return Ok(());
        }
        let Some(store) = self.stores.get(PERSISTENT_STATE_PREFIX) else {
            return Ok(());
        };

        let encoded_static = static_state.serialize(self.codec.as_ref())?;
        self.static_states.insert(&encoded_static, Arc::clone(static_state));
        let encoded_dynamic = document.encode_dynamic_state(self.codec.as_ref())?;

        let keys = document.state_keys();
        store.add(
            &keys.static_state,
            &keys.dynamic_state,
            SerializedState::new(encoded_static, encoded_dynamic),
        );
        tracing::debug!(
            target: "formstate::state",
            static_key = %keys.static_state,
            dynamic_key = %keys.dynamic_state,
            "persisted state"
        );
        Ok(())
    }
}
