//! Component bindings and shadow trees.
//!
//! A binding maps an element name to a template:
//!
//! ```xml
//! <xbl:binding element="fr|greeting">
//!   <xbl:template>
//!     <xf:output id="message" value="'Hello'"/>
//!     <xbl:content/>
//!   </xbl:template>
//! </xbl:binding>
//! ```
//!
//! Each instance of a bound element gets a shadow tree copied from the
//! template. `xbl:content` is replaced by the bound element's own children,
//! which keep resolving in the scope around the instance.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::document::{ns, Document, NodeId, QName};
use crate::scope::ScopeId;
use crate::validate::AnalysisError;

#[derive(Debug, Clone)]
pub struct Binding {
    pub element: QName,
    pub binding_id: Option<String>,
    /// Released by [`ComponentRegistry::free_templates`].
    template: Option<Document>,
}

impl Binding {
    pub fn has_template(&self) -> bool {
        self.template.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    bindings: HashMap<QName, Binding>,
    namespaces: HashSet<String>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every `xbl:binding` of the document.
    pub fn from_document(document: &Document) -> Result<Self, AnalysisError> {
        let mut registry = Self::new();
        let bindings: Vec<NodeId> = document
            .descendants(document.root())
            .filter(|id| document.is_named(*id, ns::XBL, "binding"))
            .filter(|id| !document.has_ancestor_named(*id, ns::XFORMS, "instance"))
            .collect();

        for binding in bindings {
            let binding_id = document.static_id(binding).map(str::to_string);
            let reference = binding_id.as_deref().unwrap_or("xbl:binding");

            let Some(selector) = document.attr(binding, "element") else {
                return Err(AnalysisError::unresolved_component(
                    reference,
                    "binding has no element selector",
                ));
            };
            let element = resolve_selector(document, selector)?;

            let Some(template) = document.first_child_named(binding, ns::XBL, "template") else {
                return Err(AnalysisError::unresolved_component(selector, "binding has no template"));
            };

            registry.register(Binding {
                element,
                binding_id,
                template: Some(document.subtree_document(template)),
            });
        }
        Ok(registry)
    }

    pub fn register(&mut self, binding: Binding) {
        self.namespaces.insert(binding.element.ns.clone());
        self.bindings.entry(binding.element.clone()).or_insert(binding);
    }

    pub fn binding(&self, name: &QName) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn is_component(&self, name: &QName) -> bool {
        self.bindings.contains_key(name)
    }

    /// Namespaces used by at least one binding selector.
    pub fn is_component_namespace(&self, uri: &str) -> bool {
        self.namespaces.contains(uri)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn free_templates(&mut self) {
        for binding in self.bindings.values_mut() {
            binding.template = None;
        }
    }

    /// Build the shadow tree of the bound element `bound` of `source`.
    pub fn instantiate(
        &self,
        source: &Document,
        bound: NodeId,
        prefixed_id: &str,
        outer_scope: ScopeId,
        inner_scope: ScopeId,
    ) -> Result<ShadowTree, AnalysisError> {
        let name = source
            .name(bound)
            .ok_or_else(|| AnalysisError::unresolved_component(prefixed_id, "not an element"))?;
        let template = self
            .binding(name)
            .ok_or_else(|| AnalysisError::unresolved_component(&name.qualified(), "no binding"))?
            .template
            .as_ref()
            .ok_or_else(|| {
                AnalysisError::unresolved_component(&name.qualified(), "binding template released")
            })?;

        let mut document = template.clone();
        let mut outer_nodes = HashSet::new();

        let insertion_points: Vec<NodeId> = document
            .descendants(document.root())
            .filter(|id| document.is_named(*id, ns::XBL, "content"))
            .collect();

        let content: Vec<NodeId> = source
            .children(bound)
            .iter()
            .copied()
            .filter(|c| source.attribute(*c, ns::EVENTS, "event").is_none())
            .collect();

        for point in insertion_points {
            let (Some(parent), Some(index)) = (document.parent(point), document.child_index(point))
            else {
                continue;
            };
            document.detach(point);
            for (offset, child) in content.iter().enumerate() {
                let copied = source.insert_subtree(*child, &mut document, parent, index + offset);
                outer_nodes.extend(document.descendants(copied));
            }
        }

        Ok(ShadowTree {
            document,
            bound_prefixed_id: prefixed_id.to_string(),
            inner_scope,
            outer_scope,
            outer_nodes,
        })
    }
}

fn resolve_selector(document: &Document, selector: &str) -> Result<QName, AnalysisError> {
    let (prefix, local) = selector.split_once('|').unwrap_or(("", selector));
    if local.is_empty() {
        return Err(AnalysisError::unresolved_component(selector, "empty element selector"));
    }
    let uri = document.namespace_for_prefix(prefix).ok_or_else(|| {
        AnalysisError::unresolved_component(selector, "selector prefix is not declared")
    })?;
    Ok(QName::with_prefix(prefix, uri, local))
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHADOW TREES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowTree {
    pub document: Document,
    pub bound_prefixed_id: String,
    pub inner_scope: ScopeId,
    pub outer_scope: ScopeId,
    /// Elements copied from the bound element's content.
    #[serde(skip)]
    outer_nodes: HashSet<NodeId>,
}

impl ShadowTree {
    pub fn is_outer(&self, node: NodeId) -> bool {
        self.outer_nodes.contains(&node)
    }

    /// Scope an element of the shadow tree resolves in.
    pub fn scope_of(&self, node: NodeId) -> ScopeId {
        if self.is_outer(node) {
            self.outer_scope
        } else {
            self.inner_scope
        }
    }
}
