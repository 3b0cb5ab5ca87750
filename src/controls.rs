//! # Control Tree
//!
//! Static analysis of the control markup. The walk in [`crate::visitor`]
//! drives a [`ControlTreeBuilder`], which records one [`ControlAnalysis`] per
//! control in visitation order and maintains the side indices used at run
//! time:
//!
//! - controls by prefixed id and by element name
//! - repeat nesting and the repeat hierarchy string
//! - attribute controls by `(for, name)`
//! - label/help/hint/alert attached to their controls
//!
//! Once the walk is over the builder is frozen into a read-only [`ControlTree`].

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::HashMap;

use crate::document::{ns, Document, QName};
use crate::query::{Query, QueryEvaluator};
use crate::scope::{ScopeId, ScopeTree};
use crate::validate::{AnalysisError, Diagnostics, WARN_UNRESOLVED_LHHA};
use crate::visitor::{
    is_lhha, is_value_control_name, walk_controls, ControlSource, ControlVisitor, ElementClass,
    ElementRef, TreeRef,
};

/// Separates a prefixed id from its repeat iteration suffix in effective ids.
pub const REPEAT_SEPARATOR: char = '\u{00B7}';

/// Prefixed id of an effective id such as `foo$bar·1-2`.
pub fn prefixed_id_of_effective(effective_id: &str) -> &str {
    effective_id
        .split_once(REPEAT_SEPARATOR)
        .map(|(prefixed, _)| prefixed)
        .unwrap_or(effective_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ControlId(pub u32);

impl ControlId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANALYSIS RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LhhaKind {
    Label,
    Help,
    Hint,
    Alert,
}

impl LhhaKind {
    pub fn from_local_name(local: &str) -> Option<Self> {
        match local {
            "label" => Some(Self::Label),
            "help" => Some(Self::Help),
            "hint" => Some(Self::Hint),
            "alert" => Some(Self::Alert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LhhaAnalysis {
    pub kind: LhhaKind,
    pub static_id: Option<String>,
    #[serde(skip)]
    pub element: ElementRef,
    /// Attached through a `for` reference.
    pub is_external: bool,
    /// Literal text when the element has no `ref`, `bind` or `value`.
    pub static_value: Option<String>,
}

impl LhhaAnalysis {
    fn new(document: &Document, element: ElementRef, kind: LhhaKind) -> Self {
        let node = element.node;
        let is_dynamic = ["ref", "bind", "value"]
            .iter()
            .any(|a| document.attr(node, a).is_some());
        Self {
            kind,
            static_id: document.static_id(node).map(str::to_string),
            element,
            is_external: document.attr(node, "for").is_some(),
            static_value: (!is_dynamic).then(|| document.text_content(node).trim().to_string()),
        }
    }

    pub fn has_static_value(&self) -> bool {
        self.static_value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ControlKind {
    Container,
    Leaf,
    Component,
    Variable {
        name: String,
    },
    Repeat {
        /// Repeats directly nested in this one.
        nested: Vec<ControlId>,
    },
    #[serde(rename_all = "camelCase")]
    Attribute {
        for_prefixed_id: String,
        attribute_name: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlAnalysis {
    pub id: ControlId,
    /// 1-based visitation order.
    pub index: usize,
    pub prefixed_id: String,
    pub static_id: String,
    pub name: QName,
    #[serde(skip)]
    pub element: ElementRef,
    pub scope: ScopeId,
    pub parent: Option<ControlId>,
    pub level: usize,
    pub kind: ControlKind,
    pub is_container: bool,
    pub has_node_binding: bool,
    pub has_value: bool,
    pub classes: IndexSet<String>,
    pub label: Option<LhhaAnalysis>,
    pub help: Option<LhhaAnalysis>,
    pub hint: Option<LhhaAnalysis>,
    pub alert: Option<LhhaAnalysis>,
    pub ancestor_repeat: Option<ControlId>,
    /// Names of the variables visible from this control, outermost first.
    pub in_scope_variables: Vec<String>,
}

impl ControlAnalysis {
    pub fn is_repeat(&self) -> bool {
        matches!(self.kind, ControlKind::Repeat { .. })
    }

    pub fn lhha(&self, kind: LhhaKind) -> Option<&LhhaAnalysis> {
        match kind {
            LhhaKind::Label => self.label.as_ref(),
            LhhaKind::Help => self.help.as_ref(),
            LhhaKind::Hint => self.hint.as_ref(),
            LhhaKind::Alert => self.alert.as_ref(),
        }
    }

    fn set_lhha(&mut self, lhha: LhhaAnalysis) {
        let slot = match lhha.kind {
            LhhaKind::Label => &mut self.label,
            LhhaKind::Help => &mut self.help,
            LhhaKind::Hint => &mut self.hint,
            LhhaKind::Alert => &mut self.alert,
        };
        *slot = Some(lhha);
    }

    pub fn add_classes(&mut self, classes: &str) {
        for class in classes.split_whitespace() {
            self.classes.insert(class.to_string());
        }
    }

    /// Space-separated class list, `None` when empty.
    pub fn class_string(&self) -> Option<String> {
        if self.classes.is_empty() {
            None
        } else {
            Some(self.classes.iter().cloned().collect::<Vec<_>>().join(" "))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlTree {
    controls: Vec<ControlAnalysis>,
    #[serde(skip)]
    by_prefixed_id: HashMap<String, ControlId>,
    by_type: IndexMap<String, Vec<ControlId>>,
    repeat_children: HashMap<String, Vec<String>>,
    repeat_hierarchy: String,
    attribute_controls: HashMap<String, HashMap<String, ControlId>>,
    has_offline_support: bool,
    offline_insert_trigger_ids: Vec<String>,
    scripts: IndexMap<String, String>,
}

impl ControlTree {
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Controls in visitation order.
    pub fn controls(&self) -> impl Iterator<Item = &ControlAnalysis> {
        self.controls.iter()
    }

    pub fn get(&self, id: ControlId) -> &ControlAnalysis {
        &self.controls[id.index()]
    }

    pub fn control(&self, prefixed_id: &str) -> Option<&ControlAnalysis> {
        self.by_prefixed_id.get(prefixed_id).map(|id| self.get(*id))
    }

    pub fn contains(&self, prefixed_id: &str) -> bool {
        self.by_prefixed_id.contains_key(prefixed_id)
    }

    pub fn control_element(&self, prefixed_id: &str) -> Option<ElementRef> {
        self.control(prefixed_id).map(|c| c.element)
    }

    pub fn control_position(&self, prefixed_id: &str) -> Option<usize> {
        self.control(prefixed_id).map(|c| c.index)
    }

    pub fn has_node_binding(&self, prefixed_id: &str) -> bool {
        self.control(prefixed_id).is_some_and(|c| c.has_node_binding)
    }

    pub fn lhha(&self, prefixed_id: &str, kind: LhhaKind) -> Option<&LhhaAnalysis> {
        self.control(prefixed_id).and_then(|c| c.lhha(kind))
    }

    /// Accepts prefixed ids and effective ids.
    pub fn is_value_control(&self, effective_id: &str) -> bool {
        self.control(prefixed_id_of_effective(effective_id))
            .is_some_and(|c| c.has_value)
    }

    pub fn repeat_hierarchy(&self) -> &str {
        &self.repeat_hierarchy
    }

    pub fn repeat_children(&self, repeat_prefixed_id: &str) -> &[String] {
        self.repeat_children
            .get(repeat_prefixed_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn repeat_controls(&self) -> impl Iterator<Item = &ControlAnalysis> {
        self.controls.iter().filter(|c| c.is_repeat())
    }

    /// Whether a control with this element local name exists.
    pub fn has_control_by_name(&self, local_name: &str) -> bool {
        self.by_type.contains_key(local_name)
    }

    pub fn controls_by_name(&self, local_name: &str) -> Vec<&ControlAnalysis> {
        self.by_type
            .get(local_name)
            .map(|ids| ids.iter().map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    pub fn has_attribute_control(&self, prefixed_for: &str) -> bool {
        self.attribute_controls.contains_key(prefixed_for)
    }

    pub fn attribute_control(&self, prefixed_for: &str, name: &str) -> Option<&ControlAnalysis> {
        self.attribute_controls
            .get(prefixed_for)
            .and_then(|m| m.get(name))
            .map(|id| self.get(*id))
    }

    /// Ancestor repeats of a control, leaf to root, stopping before `end`.
    pub fn ancestor_repeats(&self, start: &ControlAnalysis, end: Option<&str>) -> Vec<String> {
        let mut result = Vec::new();
        let mut current = start.ancestor_repeat.map(|id| self.get(id));
        while let Some(repeat) = current {
            if end == Some(repeat.prefixed_id.as_str()) {
                break;
            }
            result.push(repeat.prefixed_id.clone());
            current = repeat.ancestor_repeat.map(|id| self.get(id));
        }
        result
    }

    /// Append the control's classes to `out`, space-separated.
    pub fn append_classes(&self, out: &mut String, prefixed_id: &str) {
        let Some(classes) = self.control(prefixed_id).and_then(|c| c.class_string()) else {
            return;
        };
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&classes);
    }

    pub fn has_offline_support(&self) -> bool {
        self.has_offline_support
    }

    pub fn offline_insert_trigger_ids(&self) -> &[String] {
        &self.offline_insert_trigger_ids
    }

    pub fn scripts(&self) -> &IndexMap<String, String> {
        &self.scripts
    }

    fn control_mut(&mut self, prefixed_id: &str) -> Option<&mut ControlAnalysis> {
        let id = *self.by_prefixed_id.get(prefixed_id)?;
        Some(&mut self.controls[id.index()])
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ControlTreeBuilder<'d> {
    tree: ControlTree,
    /// Variables declared in each open container, root first.
    variable_frames: Vec<Vec<String>>,
    deferred_lhha: Vec<ElementRef>,
    diagnostics: &'d mut Diagnostics,
}

impl<'d> ControlTreeBuilder<'d> {
    pub fn new(diagnostics: &'d mut Diagnostics) -> Self {
        Self {
            tree: ControlTree::default(),
            variable_frames: vec![Vec::new()],
            deferred_lhha: Vec::new(),
            diagnostics,
        }
    }

    /// Walk the controls document, its shadow trees included.
    pub fn build(
        mut self,
        controls: &Document,
        scopes: &ScopeTree,
    ) -> Result<ControlTree, AnalysisError> {
        let source = ControlSource::new(controls, scopes);
        let root = ElementRef::new(TreeRef::Controls, controls.root());
        walk_controls(&mut self, &source, root, None, false)?;

        for lhha in std::mem::take(&mut self.deferred_lhha) {
            if !self.attach_external_lhha(&source, lhha) {
                let document = source.document(lhha.tree);
                let name = document.name(lhha.node).map(|n| n.qualified()).unwrap_or_default();
                let target = document.attr(lhha.node, "for").unwrap_or_default();
                self.diagnostics.warn(
                    WARN_UNRESOLVED_LHHA,
                    format!(
                        "could not find control associated with LHHA element: {} for {}",
                        name, target
                    ),
                );
            }
        }

        Ok(self.tree)
    }

    fn attach_external_lhha(&mut self, source: &ControlSource<'_>, element: ElementRef) -> bool {
        let document = source.document(element.tree);
        let (Some(target), Some(name)) = (document.attr(element.node, "for"), document.name(element.node))
        else {
            return true;
        };
        let Some(kind) = LhhaKind::from_local_name(&name.local) else {
            return true;
        };
        let scope = source.scopes.scope(source.scope_of(element));
        let prefixed_id = scope.prefixed_id_for_static_id(target);
        match self.tree.control_mut(&prefixed_id) {
            Some(control) => {
                control.set_lhha(LhhaAnalysis::new(document, element, kind));
                true
            }
            None => false,
        }
    }

    fn visible_variables(&self) -> Vec<String> {
        self.variable_frames.iter().flatten().cloned().collect()
    }
}

impl ControlVisitor for ControlTreeBuilder<'_> {
    type Container = Option<ControlId>;

    fn start_control(
        &mut self,
        source: &ControlSource<'_>,
        element: ElementRef,
        class: ElementClass,
        container: Option<ControlId>,
    ) -> Result<Option<ControlId>, AnalysisError> {
        let document = source.document(element.tree);
        let node = element.node;
        let name = document.name(node).cloned().unwrap_or_else(|| QName::local(""));

        let Some(static_id) = document.static_id(node).map(str::to_string) else {
            return Err(AnalysisError::MissingControlId {
                element: name.qualified(),
            });
        };

        let scope_id = source.scope_of(element);
        let scope = source.scopes.scope(scope_id);
        let prefixed_id = scope.prefixed_id_for_static_id(&static_id);
        let id = ControlId(self.tree.controls.len() as u32);

        let parent = container.map(|c| self.tree.get(c));
        let level = parent.map(|p| p.level + 1).unwrap_or(0);
        let ancestor_repeat = parent.and_then(|p| if p.is_repeat() { Some(p.id) } else { p.ancestor_repeat });

        let kind = if name.is(ns::XFORMS, "repeat") {
            ControlKind::Repeat { nested: Vec::new() }
        } else if name.is(ns::XXFORMS, "attribute") {
            let attr = |a: &str| {
                document.attr(node, a).ok_or_else(|| AnalysisError::MissingAttribute {
                    element: prefixed_id.clone(),
                    attribute: a.to_string(),
                })
            };
            ControlKind::Attribute {
                for_prefixed_id: scope.prefixed_id_for_static_id(attr("for")?),
                attribute_name: attr("name")?.to_string(),
            }
        } else {
            match class {
                ElementClass::Container => ControlKind::Container,
                ElementClass::Component => ControlKind::Component,
                ElementClass::Variable => ControlKind::Variable {
                    name: document.attr(node, "name").unwrap_or(&static_id).to_string(),
                },
                ElementClass::Leaf | ElementClass::Lhha => ControlKind::Leaf,
            }
        };

        let mut control = ControlAnalysis {
            id,
            index: self.tree.controls.len() + 1,
            prefixed_id: prefixed_id.clone(),
            static_id,
            name: name.clone(),
            element,
            scope: scope_id,
            parent: container,
            level,
            kind,
            is_container: class == ElementClass::Container,
            has_node_binding: ["ref", "bind", "nodeset"]
                .iter()
                .any(|a| document.attr(node, a).is_some()),
            has_value: is_value_control_name(&name),
            classes: IndexSet::new(),
            label: None,
            help: None,
            hint: None,
            alert: None,
            ancestor_repeat,
            in_scope_variables: self.visible_variables(),
        };
        if let Some(classes) = document.attr(node, "class") {
            control.add_classes(classes);
        }

        // Nested LHHA without `for` belong to the control itself
        if class != ElementClass::Component {
            for child in document.child_elements(node) {
                let Some(child_name) = document.name(child) else {
                    continue;
                };
                if !is_lhha(child_name) || document.attr(child, "for").is_some() {
                    continue;
                }
                if let Some(kind) = LhhaKind::from_local_name(&child_name.local) {
                    control.set_lhha(LhhaAnalysis::new(document, ElementRef::new(element.tree, child), kind));
                }
            }
        }

        if control.is_repeat() {
            if !self.tree.repeat_hierarchy.is_empty() {
                self.tree.repeat_hierarchy.push(',');
            }
            self.tree.repeat_hierarchy.push_str(&prefixed_id);
            if let Some(ancestor) = ancestor_repeat {
                let ancestor_prefixed_id = self.tree.get(ancestor).prefixed_id.clone();
                self.tree.repeat_hierarchy.push(' ');
                self.tree.repeat_hierarchy.push_str(&ancestor_prefixed_id);
                self.tree
                    .repeat_children
                    .entry(ancestor_prefixed_id)
                    .or_default()
                    .push(prefixed_id.clone());
                if let ControlKind::Repeat { nested } = &mut self.tree.controls[ancestor.index()].kind {
                    nested.push(id);
                }
            }
        }

        if let ControlKind::Attribute { for_prefixed_id, attribute_name } = &control.kind {
            self.tree
                .attribute_controls
                .entry(for_prefixed_id.clone())
                .or_default()
                .insert(attribute_name.clone(), id);
        }

        if let ControlKind::Variable { name } = &control.kind {
            if let Some(frame) = self.variable_frames.last_mut() {
                frame.push(name.clone());
            }
        }

        self.tree
            .by_type
            .entry(name.local.clone())
            .or_default()
            .push(id);
        self.tree.by_prefixed_id.insert(prefixed_id, id);
        self.tree.controls.push(control);

        if matches!(class, ElementClass::Container | ElementClass::Component) {
            self.variable_frames.push(Vec::new());
        }
        Ok(Some(id))
    }

    fn end_control(&mut self, _control: Option<ControlId>, class: ElementClass) {
        if matches!(class, ElementClass::Container | ElementClass::Component) {
            self.variable_frames.pop();
        }
    }

    fn lhha(&mut self, source: &ControlSource<'_>, element: ElementRef) {
        if !self.attach_external_lhha(source, element) {
            self.deferred_lhha.push(element);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OFFLINE SUPPORT
// ═══════════════════════════════════════════════════════════════════════════════

const OFFLINE_CLASSES: [(&str, &str, &str); 5] = [
    (ns::XXFORMS, "online", "xxforms-online"),
    (ns::XXFORMS, "offline", "xxforms-offline"),
    (ns::XXFORMS, "offline-save", "xxforms-offline-save"),
    (ns::XFORMS, "insert", "xxforms-offline-insert"),
    (ns::XFORMS, "delete", "xxforms-offline-delete"),
];

/// Tag triggers reachable from offline-related actions. Best effort: a
/// trigger next to a `DOMActivate` handler enclosing such an action is
/// assumed to run it.
pub fn classify_offline(
    tree: &mut ControlTree,
    source: &ControlSource<'_>,
    model_documents: &[&Document],
    evaluator: &dyn QueryEvaluator,
) {
    let offline = Query::ElementsNamed(QName::new(ns::XXFORMS, "offline"));

    let mut trees = vec![TreeRef::Controls];
    trees.extend((0..source.scopes.shadow_trees().count()).map(TreeRef::Shadow));

    let has_offline_support = model_documents
        .iter()
        .copied()
        .chain(trees.iter().map(|t| source.document(*t)))
        .any(|d| !evaluator.select(d, &offline).is_empty());
    tree.has_offline_support = has_offline_support;
    if !has_offline_support {
        return;
    }

    for tree_ref in trees {
        let document = source.document(tree_ref);
        for (namespace, local, class) in OFFLINE_CLASSES {
            let query = Query::ActivationTriggers(QName::new(namespace, local));
            for trigger in evaluator.select(document, &query) {
                let Some(prefixed_id) = source.prefixed_id(ElementRef::new(tree_ref, trigger)) else {
                    continue;
                };
                let Some(control) = tree.control_mut(&prefixed_id) else {
                    continue;
                };
                control.add_classes(class);
                if local == "insert" && !tree.offline_insert_trigger_ids.contains(&prefixed_id) {
                    tree.offline_insert_trigger_ids.push(prefixed_id);
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCRIPTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collect `xxf:script` bodies of `document` keyed by prefixed id.
pub fn extract_scripts(
    tree: &mut ControlTree,
    document: &Document,
    evaluator: &dyn QueryEvaluator,
    prefix_of: impl Fn(crate::document::NodeId) -> String,
) {
    let query = Query::ElementsNamed(QName::new(ns::XXFORMS, "script"));
    for script in evaluator.select(document, &query) {
        if let Some(static_id) = document.static_id(script) {
            let prefixed_id = format!("{}{}", prefix_of(script), static_id);
            tree.scripts.insert(prefixed_id, document.text_content(script));
        }
    }
}
