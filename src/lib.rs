//! # Form Static State Ground Truth
//!
//! ## Analysis Invariants
//!
//! 1. **Unique Prefixed Ids**: every element with an id resolves in exactly one scope.
//!    The scope of a component instance `outer$comp` prefixes ids with `outer$comp$`,
//!    so prefixed ids are unique across the whole form.
//!
//! 2. **Single Analysis**: `StaticState::analyze` runs at most once per static state.
//!    Concurrent callers block until the first one finishes; afterwards the
//!    [`Analysis`] is read-only and shared without locking.
//!
//! 3. **Structural Errors Are Fatal**: a control without an id, an invalid enumerated
//!    property, an unresolvable component or an attribute control without
//!    `for`/`name` fails construction or analysis (see [`AnalysisError::code`]).
//!    Warnings never fail; they are logged and kept on the static state.
//!
//! 4. **Repeat Hierarchy**: repeats are listed in visitation order as
//!    `prefixedId[ ' ' ancestorRepeatPrefixedId]`, comma-separated.
//!
//! 5. **Checkout Semantics**: a document taken from the document cache is removed
//!    from it until stored back, so no two requests share a live document.
//!
//! 6. **Untrusted Tokens**: a document decoded from a token is a well-formed tree or
//!    a decode error. With a password configured, a direct request token must carry
//!    a valid HMAC signature before anything in it is read.
//!
//! ## Pipeline
//!
//! ```text
//! markup ─parse─▶ Document ─split─▶ StaticState ─analyze─▶ Analysis
//!                                        │
//!                                        └─serialize─▶ token ─▶ StateManager
//! ```

mod cache;
mod codec;
mod component;
mod config;
mod controls;
mod document;
mod events;
mod model;
mod parse;
mod properties;
mod query;
mod scope;
mod state_manager;
mod static_state;
mod store;
mod validate;
mod visitor;

#[cfg(test)]
mod codec_tests;
#[cfg(test)]
mod document_tests;
#[cfg(test)]
mod controls_tests;
#[cfg(test)]
mod parse_tests;
#[cfg(test)]
mod scope_tests;
#[cfg(test)]
mod state_manager_tests;

pub use cache::{compute_hash, DocumentCache, StaticStateCache};
pub use codec::{Base64JsonCodec, CodecError, StateCodec};
pub use component::{Binding, ComponentRegistry, ShadowTree};
pub use config::{CacheConfig, EngineConfig, FeatureFlags, PathMatcher};
pub use controls::{
    prefixed_id_of_effective, ControlAnalysis, ControlId, ControlKind, ControlTree, LhhaAnalysis,
    LhhaKind, REPEAT_SEPARATOR,
};
pub use document::{ns, Attribute, Document, NodeId, NodeKind, QName};
pub use events::{
    DefaultAction, EventHandler, EventIndex, HandlerLocation, Phase, Propagate, ALL_EVENTS,
    DOCUMENT_PSEUDO_ID,
};
pub use model::{Bind, Model, ModelIndex};
pub use parse::parse_form_document;
pub use properties::*;
pub use query::{Query, QueryEvaluator, TreeQueryEvaluator};
pub use scope::{Scope, ScopeId, ScopeTree, COMPONENT_SEPARATOR};
pub use state_manager::{
    read_request_tokens, DocumentFactory, LiveDocument, Session, StateError, StateManager,
    StateToken, PERSISTENT_STATE_PREFIX, SESSION_STATE_PREFIX,
};
pub use static_state::{Analysis, DeploymentType, DocumentMetadata, SourceLocation, StaticState, TokenOrigin};
pub use store::{InMemoryStateStore, SerializedState, StateStore};
pub use validate::*;
pub use visitor::{ElementRef, TreeRef};
