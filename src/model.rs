//! Data models: instances and bind declarations, grouped per scope.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

use crate::document::{ns, Document, NodeId};
use crate::scope::{Scope, ScopeId, ScopeTree};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bind {
    pub id: Option<String>,
    /// `ref`, or `nodeset` when `ref` is absent.
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub bind_type: Option<String>,
    pub calculate: Option<String>,
    pub relevant: Option<String>,
    pub readonly: Option<String>,
    pub required: Option<String>,
    pub constraint: Option<String>,
    pub children: Vec<Bind>,
}

impl Bind {
    fn from_element(document: &Document, id: NodeId) -> Self {
        let attr = |name: &str| document.attr(id, name).map(str::to_string);
        Self {
            id: attr("id"),
            reference: attr("ref").or_else(|| attr("nodeset")),
            bind_type: attr("type"),
            calculate: attr("calculate"),
            relevant: attr("relevant"),
            readonly: attr("readonly"),
            required: attr("required"),
            constraint: attr("constraint"),
            children: binds_under(document, id),
        }
    }
}

fn binds_under(document: &Document, parent: NodeId) -> Vec<Bind> {
    document
        .child_elements(parent)
        .filter(|c| document.is_named(*c, ns::XFORMS, "bind"))
        .map(|c| Bind::from_element(document, c))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub prefixed_id: String,
    pub static_id: String,
    pub scope: ScopeId,
    /// Standalone copy of the `xf:model` element.
    #[serde(skip)]
    pub document: Document,
    pub instance_static_ids: Vec<String>,
    /// Instance elements of [`Model::document`], in document order.
    #[serde(skip)]
    pub instance_nodes: Vec<NodeId>,
    pub default_instance_static_id: Option<String>,
    pub default_instance_prefixed_id: Option<String>,
    pub binds: Vec<Bind>,
}

impl Model {
    /// `fallback_id` is used when the model element carries no id.
    pub fn new(scope: &Scope, document: Document, fallback_id: &str) -> Self {
        let root = document.root();
        let static_id = document
            .static_id(root)
            .map(str::to_string)
            .unwrap_or_else(|| fallback_id.to_string());

        let instance_nodes: Vec<NodeId> = document
            .child_elements(root)
            .filter(|c| document.is_named(*c, ns::XFORMS, "instance"))
            .collect();
        let instance_static_ids: Vec<String> = instance_nodes
            .iter()
            .filter_map(|i| document.static_id(*i).map(str::to_string))
            .collect();
        let default_instance_static_id = instance_static_ids.first().cloned();
        let default_instance_prefixed_id = default_instance_static_id
            .as_deref()
            .map(|id| scope.prefixed_id_for_static_id(id));
        let binds = binds_under(&document, root);

        Self {
            prefixed_id: scope.prefixed_id_for_static_id(&static_id),
            static_id,
            scope: scope.id,
            document,
            instance_static_ids,
            instance_nodes,
            default_instance_static_id,
            default_instance_prefixed_id,
            binds,
        }
    }

    pub fn has_instance(&self, static_id: &str) -> bool {
        self.instance_static_ids.iter().any(|i| i == static_id)
    }
}

/// Copies of the `xf:model` elements under `root` that are not inside an
/// instance, in document order.
pub fn extract_nested_models(document: &Document, root: NodeId) -> Vec<Document> {
    document
        .descendants(root)
        .filter(|id| document.is_named(*id, ns::XFORMS, "model"))
        .filter(|id| !document.has_ancestor_named(*id, ns::XFORMS, "instance"))
        .map(|id| document.subtree_document(id))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODEL INDEX
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct ModelIndex {
    by_prefixed_id: IndexMap<String, Model>,
    by_scope: HashMap<ScopeId, Vec<String>>,
}

impl ModelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model document found in `scope`.
    pub fn add_model_document(&mut self, scope: &Scope, document: Document) -> &Model {
        let fallback = format!("xf-model-{}", self.by_prefixed_id.len() + 1);
        let model = Model::new(scope, document, &fallback);
        let prefixed_id = model.prefixed_id.clone();
        self.by_scope
            .entry(scope.id)
            .or_default()
            .push(prefixed_id.clone());
        let entry = self.by_prefixed_id.entry(prefixed_id).or_insert(model);
        &*entry
    }

    pub fn model(&self, prefixed_id: &str) -> Option<&Model> {
        self.by_prefixed_id.get(prefixed_id)
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.by_prefixed_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_prefixed_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_prefixed_id.is_empty()
    }

    pub fn models_for_scope(&self, scope: ScopeId) -> Vec<&Model> {
        self.by_scope
            .get(&scope)
            .map(|ids| ids.iter().filter_map(|id| self.model(id)).collect())
            .unwrap_or_default()
    }

    pub fn default_model_for_scope(&self, scope: ScopeId) -> Option<&Model> {
        self.by_scope
            .get(&scope)
            .and_then(|ids| ids.first())
            .and_then(|id| self.model(id))
    }

    pub fn default_model_prefixed_id_for_scope(&self, scope: ScopeId) -> Option<&str> {
        self.default_model_for_scope(scope)
            .map(|m| m.prefixed_id.as_str())
    }

    pub fn default_instance_prefixed_id_for_scope(&self, scope: ScopeId) -> Option<&str> {
        self.default_model_for_scope(scope)
            .and_then(|m| m.default_instance_prefixed_id.as_deref())
    }

    pub fn instance_containers(&self, model_prefixed_id: &str) -> &[NodeId] {
        self.model(model_prefixed_id)
            .map(|m| m.instance_nodes.as_slice())
            .unwrap_or(&[])
    }

    /// Resolve an instance id from `start` outwards through the enclosing scopes.
    pub fn find_instance_prefixed_id(
        &self,
        scopes: &ScopeTree,
        start: ScopeId,
        instance_static_id: &str,
    ) -> Option<String> {
        let mut current = Some(scopes.scope(start));
        while let Some(scope) = current {
            if self
                .models_for_scope(scope.id)
                .iter()
                .any(|m| m.has_instance(instance_static_id))
            {
                return Some(scope.prefixed_id_for_static_id(instance_static_id));
            }
            current = scopes.parent(scope.id);
        }
        None
    }
}
