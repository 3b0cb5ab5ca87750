//! Structural queries over a [`Document`].
//!
//! Analysis locates event handlers and offline-related constructs through
//! this seam only. Hosts may plug in their own evaluator.

use crate::document::{ns, Document, NodeId, QName};

const DOM_ACTIVATE: &str = "DOMActivate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Elements carrying `ev:event` that are not inside an instance (nor a
    /// model when `exclude_models` is set) and whose observer can be
    /// determined: parent with an id, explicit `ev:observer`, or top level.
    EventHandlers { exclude_models: bool },
    /// Elements with the given name outside of instances.
    ElementsNamed(QName),
    /// Triggers next to the nearest `DOMActivate` handler enclosing each
    /// element with the given name.
    ActivationTriggers(QName),
}

pub trait QueryEvaluator: Send + Sync {
    fn select(&self, document: &Document, query: &Query) -> Vec<NodeId>;
}

/// Evaluates queries by walking the arena.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeQueryEvaluator;

impl QueryEvaluator for TreeQueryEvaluator {
    fn select(&self, document: &Document, query: &Query) -> Vec<NodeId> {
        match query {
            Query::EventHandlers { exclude_models } => {
                select_event_handlers(document, *exclude_models)
            }
            Query::ElementsNamed(name) => select_named(document, name),
            Query::ActivationTriggers(name) => select_activation_triggers(document, name),
        }
    }
}

fn in_instance(document: &Document, id: NodeId) -> bool {
    document.has_ancestor_named(id, ns::XFORMS, "instance")
}

fn select_event_handlers(document: &Document, exclude_models: bool) -> Vec<NodeId> {
    let root = document.root();
    document
        .descendants(root)
        .filter(|id| document.attribute(*id, ns::EVENTS, "event").is_some())
        .filter(|id| !in_instance(document, *id))
        .filter(|id| !exclude_models || !document.has_ancestor_named(*id, ns::XFORMS, "model"))
        .filter(|id| {
            let parent = document.parent(*id);
            parent.is_some_and(|p| document.static_id(p).is_some())
                || document.attribute(*id, ns::EVENTS, "observer").is_some()
                || parent == Some(root)
        })
        .collect()
}

fn select_named(document: &Document, name: &QName) -> Vec<NodeId> {
    document
        .descendants(document.root())
        .filter(|id| document.name(*id) == Some(name))
        .filter(|id| !in_instance(document, *id))
        .collect()
}

fn handles_activation(document: &Document, id: NodeId) -> bool {
    document
        .attribute(id, ns::EVENTS, "event")
        .is_some_and(|events| events.split_whitespace().any(|e| e == DOM_ACTIVATE))
}

fn select_activation_triggers(document: &Document, name: &QName) -> Vec<NodeId> {
    let mut triggers = Vec::new();
    for action in select_named(document, name) {
        let handler = std::iter::once(action)
            .chain(document.ancestors(action))
            .find(|id| handles_activation(document, *id));
        let Some(parent) = handler.and_then(|h| document.parent(h)) else {
            continue;
        };
        for candidate in document.descendants(parent) {
            if document.is_named(candidate, ns::XFORMS, "trigger")
                && document.static_id(candidate).is_some()
                && !triggers.contains(&candidate)
            {
                triggers.push(candidate);
            }
        }
    }
    triggers
}
