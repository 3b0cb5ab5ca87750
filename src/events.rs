//! # Event Handler Index
//!
//! Declarative handlers are action elements carrying `ev:event`. Each
//! accepted handler is registered under the prefixed id of every observer it
//! listens on, and remembers its nearest ancestor observer so that run-time
//! context evaluation and repeat resolution can start from a control.

use indexmap::{IndexMap, IndexSet};
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::controls::ControlTree;
use crate::document::{ns, Document, NodeId, QName};
use crate::model::Model;
use crate::query::{Query, QueryEvaluator};
use crate::scope::ScopeTree;
use crate::visitor::{is_builtin_control, ControlSource, ElementRef, TreeRef};

/// Observer id standing for the whole document.
pub const DOCUMENT_PSEUDO_ID: &str = "#document";
/// Event name matching every event.
pub const ALL_EVENTS: &str = "#all";
pub const KEYPRESS: &str = "keypress";

lazy_static! {
    static ref ACTION_NAMES: HashSet<QName> = {
        let xforms = [
            "action", "dispatch", "rebuild", "recalculate", "revalidate", "refresh", "setfocus",
            "load", "setvalue", "send", "reset", "message", "toggle", "insert", "delete",
            "setindex",
        ];
        let xxforms = [
            "script", "show", "hide", "invalidate-instance", "invalidate-instances", "online",
            "offline", "offline-save", "join-submissions",
        ];
        xforms
            .iter()
            .map(|l| QName::new(ns::XFORMS, l))
            .chain(xxforms.iter().map(|l| QName::new(ns::XXFORMS, l)))
            .collect()
    };
}

pub fn is_action_name(name: &QName) -> bool {
    ACTION_NAMES.contains(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Default,
    Capture,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Propagate {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    Perform,
    Cancel,
}

/// Where a handler element lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerLocation {
    Controls(ElementRef),
    Model { model_prefixed_id: String, node: NodeId },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    /// Prefix of the scope the handler resolves in.
    pub prefix: String,
    pub static_id: Option<String>,
    pub name: QName,
    #[serde(skip)]
    pub location: HandlerLocation,
    pub observers_static_ids: Vec<String>,
    pub ancestor_observer_static_id: Option<String>,
    pub is_all_events: bool,
    pub event_names: IndexSet<String>,
    pub target_ids: Vec<String>,
    pub phase: Phase,
    pub propagate: Propagate,
    pub default_action: DefaultAction,
}

impl EventHandler {
    fn from_element(
        document: &Document,
        node: NodeId,
        location: HandlerLocation,
        prefix: &str,
        parent_static_id: Option<&str>,
        ancestor_observer_static_id: Option<String>,
    ) -> Self {
        let events = |local: &str| -> Vec<String> {
            document
                .attribute(node, ns::EVENTS, local)
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };

        let observers_static_ids = match document.attribute(node, ns::EVENTS, "observer") {
            Some(_) => events("observer"),
            None => parent_static_id.map(|p| vec![p.to_string()]).unwrap_or_default(),
        };
        let event_names: IndexSet<String> = events("event").into_iter().collect();

        Self {
            prefix: prefix.to_string(),
            static_id: document.static_id(node).map(str::to_string),
            name: document.name(node).cloned().unwrap_or_else(|| QName::local("")),
            location,
            observers_static_ids,
            ancestor_observer_static_id,
            is_all_events: event_names.contains(ALL_EVENTS),
            event_names,
            target_ids: events("target"),
            phase: match document.attribute(node, ns::EVENTS, "phase") {
                Some("capture") => Phase::Capture,
                Some("target") => Phase::Target,
                _ => Phase::Default,
            },
            propagate: match document.attribute(node, ns::EVENTS, "propagate") {
                Some("stop") => Propagate::Stop,
                _ => Propagate::Continue,
            },
            default_action: match document.attribute(node, ns::EVENTS, "defaultAction") {
                Some("cancel") => DefaultAction::Cancel,
                _ => DefaultAction::Perform,
            },
        }
    }

    pub fn prefixed_id(&self) -> Option<String> {
        self.static_id
            .as_ref()
            .map(|id| format!("{}{}", self.prefix, id))
    }

    pub fn handles(&self, event_name: &str) -> bool {
        self.is_all_events || self.event_names.contains(event_name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INDEX
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventIndex {
    handlers: Vec<EventHandler>,
    by_observer: IndexMap<String, Vec<usize>>,
    /// Handler (and nested action) prefixed id -> ancestor observer prefixed id.
    ancestor_observers: HashMap<String, String>,
    event_names: HashSet<String>,
    key_handlers: Vec<usize>,
}

impl EventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handlers(&self) -> impl Iterator<Item = &EventHandler> {
        self.handlers.iter()
    }

    /// Handlers observing `observer_prefixed_id`, in registration order.
    pub fn handlers_for_observer(&self, observer_prefixed_id: &str) -> Vec<&EventHandler> {
        self.by_observer
            .get(observer_prefixed_id)
            .map(|ids| ids.iter().map(|i| &self.handlers[*i]).collect())
            .unwrap_or_default()
    }

    pub fn observers(&self) -> impl Iterator<Item = &str> {
        self.by_observer.keys().map(|k| k.as_str())
    }

    pub fn observer_has_handler_for_event(&self, observer_prefixed_id: &str, event_name: &str) -> bool {
        self.handlers_for_observer(observer_prefixed_id)
            .iter()
            .any(|h| h.handles(event_name))
    }

    pub fn has_handler_for_event(&self, event_name: &str, include_all_events: bool) -> bool {
        (include_all_events && self.event_names.contains(ALL_EVENTS))
            || self.event_names.contains(event_name)
    }

    pub fn key_handlers(&self) -> Vec<&EventHandler> {
        self.key_handlers.iter().map(|i| &self.handlers[*i]).collect()
    }

    pub fn ancestor_observer(&self, prefixed_id: &str) -> Option<&str> {
        self.ancestor_observers.get(prefixed_id).map(|s| s.as_str())
    }

    /// Register a handler under each of its observers.
    pub fn register(&mut self, handler: EventHandler, observers_prefix: &str, subtree_ids: &[String]) {
        if handler.observers_static_ids.is_empty() {
            return;
        }
        let index = self.handlers.len();

        for observer in &handler.observers_static_ids {
            let observer_prefixed_id = if observer == DOCUMENT_PSEUDO_ID {
                observer.clone()
            } else {
                format!("{}{}", observers_prefix, observer)
            };
            self.by_observer.entry(observer_prefixed_id).or_default().push(index);
        }

        if let Some(ancestor) = &handler.ancestor_observer_static_id {
            let ancestor_prefixed_id = if ancestor == DOCUMENT_PSEUDO_ID {
                ancestor.clone()
            } else {
                format!("{}{}", handler.prefix, ancestor)
            };
            for id in subtree_ids {
                self.ancestor_observers
                    .insert(format!("{}{}", handler.prefix, id), ancestor_prefixed_id.clone());
            }
        }

        if handler.is_all_events {
            self.event_names.insert(ALL_EVENTS.to_string());
        } else {
            for event_name in &handler.event_names {
                self.event_names.insert(event_name.clone());
                if event_name == KEYPRESS && self.key_handlers.last() != Some(&index) {
                    self.key_handlers.push(index);
                }
            }
        }

        self.handlers.push(handler);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

fn is_event_observer(name: &QName, scopes: &ScopeTree) -> bool {
    is_builtin_control(name)
        || scopes.is_component(name)
        || (name.ns == ns::XFORMS && matches!(name.local.as_str(), "model" | "instance" | "submission"))
}

fn find_ancestor_observer(document: &Document, node: NodeId, scopes: &ScopeTree) -> Option<String> {
    document
        .ancestors(node)
        .find(|a| document.name(*a).is_some_and(|n| is_event_observer(n, scopes)))
        .and_then(|a| document.static_id(a))
        .map(str::to_string)
}

fn subtree_ids(document: &Document, node: NodeId) -> Vec<String> {
    document
        .descendants(node)
        .filter_map(|d| document.static_id(d).map(str::to_string))
        .collect()
}

/// Index handlers found in the controls document and in every shadow tree.
pub fn index_control_handlers(
    index: &mut EventIndex,
    source: &ControlSource<'_>,
    controls: &ControlTree,
    evaluator: &dyn QueryEvaluator,
) {
    let query = Query::EventHandlers { exclude_models: true };
    let scopes = source.scopes;

    let mut trees = vec![TreeRef::Controls];
    trees.extend((0..scopes.shadow_trees().count()).map(TreeRef::Shadow));

    for tree in trees {
        let document = source.document(tree);
        let shadow = match tree {
            TreeRef::Shadow(i) => scopes.shadow_tree_at(i),
            TreeRef::Controls => None,
        };

        for node in evaluator.select(document, &query) {
            // Content copied into a shadow tree is indexed where it was written
            if shadow.is_some_and(|s| s.is_outer(node)) {
                continue;
            }
            let Some(name) = document.name(node) else {
                continue;
            };
            if !is_action_name(name) {
                continue;
            }

            let element = ElementRef::new(tree, node);
            let scope = scopes.scope(source.scope_of(element));
            let prefix = scope.full_prefix();
            let parent = document.parent(node);
            let is_top_level = tree == TreeRef::Controls && parent == Some(document.root());
            let explicit_observers = document.attribute(node, ns::EVENTS, "observer").is_some();

            let parent_static_id = if is_top_level {
                Some(DOCUMENT_PSEUDO_ID)
            } else {
                parent.and_then(|p| document.static_id(p))
            };

            let accepted = match parent_static_id {
                Some(parent_id) => {
                    let parent_prefixed_id = format!("{}{}", prefix, parent_id);
                    scopes.has_binding(&parent_prefixed_id)
                        || controls.contains(&parent_prefixed_id)
                        || is_top_level
                        || explicit_observers
                }
                None => explicit_observers,
            };
            if !accepted {
                continue;
            }

            let ancestor = find_ancestor_observer(document, node, scopes)
                .or_else(|| is_top_level.then(|| DOCUMENT_PSEUDO_ID.to_string()));

            // Explicit observers resolve in the scope of the handler itself
            let observers_prefix = match (explicit_observers, document.static_id(node)) {
                (true, Some(id)) => scopes
                    .resolution_scope_by_prefixed_id(&format!("{}{}", prefix, id))
                    .map(|s| s.full_prefix().to_string())
                    .unwrap_or_else(|| prefix.to_string()),
                _ => prefix.to_string(),
            };

            let handler = EventHandler::from_element(
                document,
                node,
                HandlerLocation::Controls(element),
                prefix,
                parent_static_id,
                ancestor,
            );
            index.register(handler, &observers_prefix, &subtree_ids(document, node));
        }
    }
}

/// Index handlers of one model document.
pub fn index_model_handlers(
    index: &mut EventIndex,
    model: &Model,
    scopes: &ScopeTree,
    evaluator: &dyn QueryEvaluator,
) {
    let query = Query::EventHandlers { exclude_models: false };
    let document = &model.document;
    let prefix = scopes.scope(model.scope).full_prefix();

    for node in evaluator.select(document, &query) {
        let Some(name) = document.name(node) else {
            continue;
        };
        if !is_action_name(name) {
            continue;
        }
        let parent_static_id = document.parent(node).and_then(|p| document.static_id(p));
        let handler = EventHandler::from_element(
            document,
            node,
            HandlerLocation::Model {
                model_prefixed_id: model.prefixed_id.clone(),
                node,
            },
            prefix,
            parent_static_id,
            find_ancestor_observer(document, node, scopes),
        );
        index.register(handler, prefix, &subtree_ids(document, node));
    }
}
