use lazy_static::lazy_static;
use std::collections::HashSet;

use crate::document::{ns, Document, NodeId, QName};
use crate::scope::{ScopeId, ScopeTree};
use crate::validate::AnalysisError;

lazy_static! {
    static ref CONTAINER_CONTROLS: HashSet<QName> = [
        QName::new(ns::XFORMS, "group"),
        QName::new(ns::XFORMS, "switch"),
        QName::new(ns::XFORMS, "case"),
        QName::new(ns::XFORMS, "repeat"),
        QName::new(ns::XXFORMS, "dialog"),
    ]
    .into_iter()
    .collect();

    static ref CORE_CONTROLS: HashSet<QName> = [
        QName::new(ns::XFORMS, "input"),
        QName::new(ns::XFORMS, "secret"),
        QName::new(ns::XFORMS, "textarea"),
        QName::new(ns::XFORMS, "output"),
        QName::new(ns::XFORMS, "upload"),
        QName::new(ns::XFORMS, "range"),
        QName::new(ns::XFORMS, "select"),
        QName::new(ns::XFORMS, "select1"),
        QName::new(ns::XFORMS, "submit"),
        QName::new(ns::XFORMS, "trigger"),
        QName::new(ns::XXFORMS, "attribute"),
        QName::new(ns::XXFORMS, "text"),
    ]
    .into_iter()
    .collect();

    /// Core controls holding a value.
    static ref VALUE_CONTROLS: HashSet<QName> = [
        QName::new(ns::XFORMS, "input"),
        QName::new(ns::XFORMS, "secret"),
        QName::new(ns::XFORMS, "textarea"),
        QName::new(ns::XFORMS, "output"),
        QName::new(ns::XFORMS, "upload"),
        QName::new(ns::XFORMS, "range"),
        QName::new(ns::XFORMS, "select"),
        QName::new(ns::XFORMS, "select1"),
        QName::new(ns::XXFORMS, "attribute"),
        QName::new(ns::XXFORMS, "text"),
    ]
    .into_iter()
    .collect();
}

pub const LHHA_NAMES: [&str; 4] = ["label", "help", "hint", "alert"];

pub fn is_container_control(name: &QName) -> bool {
    CONTAINER_CONTROLS.contains(name)
}

pub fn is_core_control(name: &QName) -> bool {
    CORE_CONTROLS.contains(name)
}

pub fn is_value_control_name(name: &QName) -> bool {
    VALUE_CONTROLS.contains(name)
}

pub fn is_builtin_control(name: &QName) -> bool {
    is_container_control(name) || is_core_control(name)
}

pub fn is_variable(name: &QName) -> bool {
    (name.ns == ns::XXFORMS || name.ns == ns::XFORMS) && name.local == "variable"
}

pub fn is_lhha(name: &QName) -> bool {
    name.ns == ns::XFORMS && LHHA_NAMES.contains(&name.local.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementClass {
    Container,
    Leaf,
    Component,
    Variable,
    Lhha,
}

/// Classify an element of the control markup. `None` for markup that is not
/// part of the control tree.
pub fn classify(name: &QName, scopes: &ScopeTree) -> Option<ElementClass> {
    if is_container_control(name) {
        Some(ElementClass::Container)
    } else if is_core_control(name) {
        Some(ElementClass::Leaf)
    } else if scopes.is_component(name) {
        Some(ElementClass::Component)
    } else if is_variable(name) {
        Some(ElementClass::Variable)
    } else if is_lhha(name) {
        Some(ElementClass::Lhha)
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ELEMENT REFERENCES
// ═══════════════════════════════════════════════════════════════════════════════

/// Which document an element lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeRef {
    Controls,
    /// Index of the shadow tree in the scope tree.
    Shadow(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef {
    pub tree: TreeRef,
    pub node: NodeId,
}

impl ElementRef {
    pub fn new(tree: TreeRef, node: NodeId) -> Self {
        Self { tree, node }
    }
}

/// The documents a control walk can reach.
#[derive(Clone, Copy)]
pub struct ControlSource<'a> {
    pub controls: &'a Document,
    pub scopes: &'a ScopeTree,
}

impl<'a> ControlSource<'a> {
    pub fn new(controls: &'a Document, scopes: &'a ScopeTree) -> Self {
        Self { controls, scopes }
    }

    pub fn document(&self, tree: TreeRef) -> &'a Document {
        match tree {
            TreeRef::Controls => self.controls,
            TreeRef::Shadow(index) => self
                .scopes
                .shadow_tree_at(index)
                .map(|t| &t.document)
                .unwrap_or(self.controls),
        }
    }

    pub fn scope_of(&self, element: ElementRef) -> ScopeId {
        match element.tree {
            TreeRef::Controls => ScopeId::TOP_LEVEL,
            TreeRef::Shadow(index) => self
                .scopes
                .shadow_tree_at(index)
                .map(|t| t.scope_of(element.node))
                .unwrap_or(ScopeId::TOP_LEVEL),
        }
    }

    pub fn name(&self, element: ElementRef) -> Option<&'a QName> {
        self.document(element.tree).name(element.node)
    }

    pub fn static_id(&self, element: ElementRef) -> Option<&'a str> {
        self.document(element.tree).static_id(element.node)
    }

    pub fn prefixed_id(&self, element: ElementRef) -> Option<String> {
        let static_id = self.static_id(element)?;
        let scope = self.scopes.scope(self.scope_of(element));
        Some(scope.prefixed_id_for_static_id(static_id))
    }

    pub fn children(&self, element: ElementRef) -> impl Iterator<Item = ElementRef> + 'a {
        let tree = element.tree;
        self.document(tree)
            .child_elements(element.node)
            .map(move |node| ElementRef::new(tree, node))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALK
// ═══════════════════════════════════════════════════════════════════════════════

/// Callbacks of the control walk.
///
/// `Container` identifies the control new children attach to. The walk calls
/// `start_control`/`end_control` around every control and `lhha` for every
/// label/help/hint/alert met outside of a component boundary.
pub trait ControlVisitor {
    type Container: Copy;

    fn start_control(
        &mut self,
        source: &ControlSource<'_>,
        element: ElementRef,
        class: ElementClass,
        container: Self::Container,
    ) -> Result<Self::Container, AnalysisError>;

    fn end_control(&mut self, control: Self::Container, class: ElementClass);

    fn lhha(&mut self, source: &ControlSource<'_>, element: ElementRef);
}

/// Markup the walk never enters.
fn is_opaque(document: &Document, node: NodeId, name: &QName) -> bool {
    name.ns == ns::XBL
        || name.is(ns::XFORMS, "model")
        || name.is(ns::XFORMS, "instance")
        || document.attribute(node, ns::EVENTS, "event").is_some()
}

/// Depth-first walk of the children of `start`.
pub fn walk_controls<V: ControlVisitor + ?Sized>(
    visitor: &mut V,
    source: &ControlSource<'_>,
    start: ElementRef,
    container: V::Container,
    in_component: bool,
) -> Result<(), AnalysisError> {
    for child in source.children(start) {
        let Some(name) = source.name(child) else {
            continue;
        };
        match classify(name, source.scopes) {
            Some(ElementClass::Container) => {
                let control = visitor.start_control(source, child, ElementClass::Container, container)?;
                walk_controls(visitor, source, child, control, false)?;
                visitor.end_control(control, ElementClass::Container);
            }
            Some(class @ (ElementClass::Leaf | ElementClass::Variable)) => {
                let control = visitor.start_control(source, child, class, container)?;
                visitor.end_control(control, class);
            }
            Some(ElementClass::Component) => {
                let control = visitor.start_control(source, child, ElementClass::Component, container)?;
                let shadow = source
                    .prefixed_id(child)
                    .and_then(|id| source.scopes.shadow_tree_index(&id));
                if let Some(index) = shadow {
                    let tree = TreeRef::Shadow(index);
                    let root = ElementRef::new(tree, source.document(tree).root());
                    walk_controls(visitor, source, root, control, true)?;
                }
                visitor.end_control(control, ElementClass::Component);
            }
            Some(ElementClass::Lhha) => {
                if !in_component {
                    visitor.lhha(source, child);
                }
            }
            None => {
                let document = source.document(child.tree);
                if !is_opaque(document, child.node, name) {
                    walk_controls(visitor, source, child, container, in_component)?;
                }
            }
        }
    }
    Ok(())
}
