//! # Scope Resolution
//!
//! A scope is the id namespace created by the top-level document or by one
//! component instance. Scopes live in an arena addressed by [`ScopeId`]; a
//! scope only points at its parent.
//!
//! Prefixes concatenate: the scope of a component instance with prefixed id
//! `outer$comp` has the full prefix `outer$comp$`, so every id becomes
//! globally unique once prefixed.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

use crate::component::{ComponentRegistry, ShadowTree};
use crate::document::{ns, Document, NodeId, QName};
use crate::validate::AnalysisError;

pub const COMPONENT_SEPARATOR: char = '$';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub const TOP_LEVEL: ScopeId = ScopeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub id: ScopeId,
    /// Prefixed id of the component instance that created the scope, empty
    /// for the top-level scope.
    pub scope_id: String,
    full_prefix: String,
    pub parent: Option<ScopeId>,
}

impl Scope {
    pub fn full_prefix(&self) -> &str {
        &self.full_prefix
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn prefixed_id_for_static_id(&self, static_id: &str) -> String {
        format!("{}{}", self.full_prefix, static_id)
    }

    /// Inverse of [`Scope::prefixed_id_for_static_id`]. `None` when the id was
    /// not prefixed by this scope.
    pub fn static_id_for_prefixed_id<'a>(&self, prefixed_id: &'a str) -> Option<&'a str> {
        prefixed_id.strip_prefix(self.full_prefix.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    by_prefix: HashMap<String, ScopeId>,
    /// Resolution scope of every element carrying an id.
    by_prefixed_id: HashMap<String, ScopeId>,
    shadow_trees: IndexMap<String, ShadowTree>,
    components: ComponentRegistry,
}

impl ScopeTree {
    pub fn new(components: ComponentRegistry) -> Self {
        let top = Scope {
            id: ScopeId::TOP_LEVEL,
            scope_id: String::new(),
            full_prefix: String::new(),
            parent: None,
        };
        let mut by_prefix = HashMap::new();
        by_prefix.insert(String::new(), ScopeId::TOP_LEVEL);
        Self {
            scopes: vec![top],
            by_prefix,
            by_prefixed_id: HashMap::new(),
            shadow_trees: IndexMap::new(),
            components,
        }
    }

    pub fn top_level_scope(&self) -> &Scope {
        &self.scopes[0]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn parent(&self, id: ScopeId) -> Option<&Scope> {
        self.scope(id).parent.map(|p| self.scope(p))
    }

    /// Create the inner scope of the component instance `scope_id`.
    pub fn create_scope(&mut self, parent: ScopeId, scope_id: &str) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        let full_prefix = format!("{}{}", scope_id, COMPONENT_SEPARATOR);
        self.by_prefix.insert(full_prefix.clone(), id);
        self.scopes.push(Scope {
            id,
            scope_id: scope_id.to_string(),
            full_prefix,
            parent: Some(parent),
        });
        id
    }

    pub fn index_prefixed_id(&mut self, prefixed_id: String, scope: ScopeId) {
        self.by_prefixed_id.insert(prefixed_id, scope);
    }

    pub fn resolution_scope_by_prefixed_id(&self, prefixed_id: &str) -> Option<&Scope> {
        self.by_prefixed_id.get(prefixed_id).map(|id| self.scope(*id))
    }

    pub fn resolution_scope_by_prefix(&self, prefix: &str) -> Option<&Scope> {
        self.by_prefix.get(prefix).map(|id| self.scope(*id))
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn is_component(&self, name: &QName) -> bool {
        self.components.is_component(name)
    }

    /// Whether the element with this prefixed id is a bound component instance.
    pub fn has_binding(&self, prefixed_id: &str) -> bool {
        self.shadow_trees.contains_key(prefixed_id)
    }

    pub fn shadow_tree(&self, prefixed_id: &str) -> Option<&ShadowTree> {
        self.shadow_trees.get(prefixed_id)
    }

    pub fn shadow_tree_index(&self, prefixed_id: &str) -> Option<usize> {
        self.shadow_trees.get_index_of(prefixed_id)
    }

    pub fn shadow_tree_at(&self, index: usize) -> Option<&ShadowTree> {
        self.shadow_trees.get_index(index).map(|(_, tree)| tree)
    }

    pub fn shadow_trees(&self) -> impl Iterator<Item = (&str, &ShadowTree)> {
        self.shadow_trees.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop binding templates once analysis no longer needs them.
    pub fn free_transient_state(&mut self) {
        self.components.free_templates();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Where the resolver is walking: the controls document or a shadow tree.
#[derive(Debug, Clone, Copy)]
enum Source<'a> {
    Controls(&'a Document),
    Shadow(&'a str),
}

/// Build the scope tree of a controls document: index every id in its
/// resolution scope and instantiate every component, recursively.
pub fn resolve_scopes(
    controls: &Document,
    components: ComponentRegistry,
) -> Result<ScopeTree, AnalysisError> {
    let mut tree = ScopeTree::new(components);
    let root = controls.root();
    for child in controls.child_elements(root).collect::<Vec<_>>() {
        resolve_element(&mut tree, Source::Controls(controls), child, ScopeId::TOP_LEVEL)?;
    }
    tracing::debug!(
        target: "formstate::analysis",
        scopes = tree.len(),
        components = tree.shadow_trees.len(),
        "resolved scopes"
    );
    Ok(tree)
}

fn resolve_element(
    tree: &mut ScopeTree,
    source: Source<'_>,
    id: NodeId,
    scope: ScopeId,
) -> Result<(), AnalysisError> {
    // Shadow trees are owned by the tree, so look them up again on each step
    let (name, static_id) = {
        let document = source_document(tree, source);
        (
            document.name(id).cloned(),
            document.static_id(id).map(str::to_string),
        )
    };
    let Some(name) = name else {
        return Ok(());
    };
    if name.ns == ns::XBL {
        return Ok(());
    }

    if let Some(static_id) = &static_id {
        let prefixed_id = tree.scope(scope).prefixed_id_for_static_id(static_id);
        tree.index_prefixed_id(prefixed_id, scope);
    }
    if name.is(ns::XFORMS, "instance") {
        return Ok(());
    }

    if tree.components.is_component(&name) {
        let Some(static_id) = static_id else {
            return Err(AnalysisError::unresolved_component(
                &name.qualified(),
                "component instance has no id",
            ));
        };
        let prefixed_id = tree.scope(scope).prefixed_id_for_static_id(&static_id);
        let inner = tree.create_scope(scope, &prefixed_id);
        let shadow = {
            let document = source_document(tree, source);
            tree.components
                .instantiate(document, id, &prefixed_id, scope, inner)?
        };
        tracing::debug!(
            target: "formstate::analysis",
            component = %name,
            prefixed_id = %prefixed_id,
            "instantiated component"
        );
        // Handlers on the bound element stay in the outer scope
        let handler_ids: Vec<String> = {
            let document = source_document(tree, source);
            document
                .child_elements(id)
                .filter(|c| document.attribute(*c, ns::EVENTS, "event").is_some())
                .flat_map(|c| document.descendants(c))
                .filter_map(|d| document.static_id(d).map(str::to_string))
                .collect()
        };
        for handler_id in handler_ids {
            let prefixed = tree.scope(scope).prefixed_id_for_static_id(&handler_id);
            tree.index_prefixed_id(prefixed, scope);
        }

        let shadow_root = shadow.document.root();
        tree.shadow_trees.insert(prefixed_id.clone(), shadow);

        let children: Vec<NodeId> = source_document(tree, Source::Shadow(&prefixed_id))
            .child_elements(shadow_root)
            .collect();
        for child in children {
            let child_scope = tree.shadow_trees[&prefixed_id].scope_of(child);
            resolve_element(tree, Source::Shadow(&prefixed_id), child, child_scope)?;
        }
        return Ok(());
    }

    let builtin = name.ns == ns::XFORMS || name.ns == ns::XXFORMS || name.ns == ns::XHTML;
    if !builtin && tree.components.is_component_namespace(&name.ns) {
        return Err(AnalysisError::unresolved_component(
            &name.qualified(),
            "no binding matches this element",
        ));
    }

    let children: Vec<NodeId> = source_document(tree, source).child_elements(id).collect();
    for child in children {
        let child_scope = match source {
            Source::Controls(_) => scope,
            Source::Shadow(key) => tree.shadow_trees[key].scope_of(child),
        };
        resolve_element(tree, source, child, child_scope)?;
    }
    Ok(())
}

fn source_document<'a>(tree: &'a ScopeTree, source: Source<'a>) -> &'a Document {
    match source {
        Source::Controls(document) => document,
        Source::Shadow(key) => &tree.shadow_trees[key].document,
    }
}
