//! # Form Document Model
//!
//! Arena representation of a parsed form description. Every node lives in a
//! flat `Vec` and is addressed by [`NodeId`]; nodes store their parent id
//! instead of a back-reference, so a document can be walked in both
//! directions, shared read-only between threads and serialized as-is.
//!
//! Documents are produced by [`crate::parse`] (or built directly) and are the
//! input of static analysis. Model documents and component shadow trees are
//! deep copies of subtrees of the main document.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Namespace URIs recognized by the analysis.
pub mod ns {
    pub const XFORMS: &str = "http://www.w3.org/2002/xforms";
    pub const XXFORMS: &str = "http://orbeon.org/oxf/xml/xforms";
    pub const EVENTS: &str = "http://www.w3.org/2001/xml-events";
    pub const XBL: &str = "http://www.w3.org/ns/xbl";
    pub const XHTML: &str = "http://www.w3.org/1999/xhtml";
    pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Namespace-qualified name. Equality and hashing ignore the prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QName {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ns: String,
    pub local: String,
}

impl QName {
    pub fn new(ns: &str, local: &str) -> Self {
        Self {
            prefix: String::new(),
            ns: ns.to_string(),
            local: local.to_string(),
        }
    }

    pub fn with_prefix(prefix: &str, ns: &str, local: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ns: ns.to_string(),
            local: local.to_string(),
        }
    }

    /// Name in no namespace.
    pub fn local(local: &str) -> Self {
        Self::new("", local)
    }

    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.ns == ns && self.local == local
    }

    /// `prefix:local`, or just `local` without a prefix.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.ns == other.ns && self.local == other.local
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ns.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: &str) -> Self {
        Self {
            name,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeKind {
    Element {
        name: QName,
        #[serde(default)]
        attributes: Vec<Attribute>,
    },
    Text { value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Deserialization checks that the arena forms a single consistent tree per
/// parentless node, so decoded tokens can be walked safely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDocument")]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    /// Prefix -> namespace URI declarations seen in the source markup.
    #[serde(default)]
    namespaces: IndexMap<String, String>,
}

#[derive(Deserialize)]
struct RawDocument {
    nodes: Vec<Node>,
    root: NodeId,
    #[serde(default)]
    namespaces: IndexMap<String, String>,
}

impl TryFrom<RawDocument> for Document {
    type Error = String;

    fn try_from(raw: RawDocument) -> Result<Self, Self::Error> {
        let RawDocument { nodes, root, namespaces } = raw;
        let len = nodes.len();
        let in_range = |id: NodeId| id.index() < len;

        if !in_range(root) {
            return Err(format!("root {} out of range for {} nodes", root.0, len));
        }
        if nodes[root.index()].parent.is_some() {
            return Err("root has a parent".to_string());
        }

        let mut referenced = vec![false; len];
        for (index, node) in nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                if !in_range(parent) {
                    return Err(format!("node {} has parent {} out of range", index, parent.0));
                }
                if !nodes[parent.index()].children.iter().any(|c| c.index() == index) {
                    return Err(format!("node {} is missing from the children of {}", index, parent.0));
                }
            }
            if matches!(node.kind, NodeKind::Text { .. }) && !node.children.is_empty() {
                return Err(format!("text node {} has children", index));
            }
            for &child in &node.children {
                if !in_range(child) {
                    return Err(format!("node {} has child {} out of range", index, child.0));
                }
                if nodes[child.index()].parent.map(NodeId::index) != Some(index) {
                    return Err(format!("child {} does not point back to {}", child.0, index));
                }
                if std::mem::replace(&mut referenced[child.index()], true) {
                    return Err(format!("node {} is listed as a child more than once", child.0));
                }
            }
        }

        // With consistent links, every node outside a cycle hangs below a
        // parentless node
        let mut reached = 0;
        let mut stack: Vec<usize> = (0..len).filter(|&i| nodes[i].parent.is_none()).collect();
        while let Some(index) = stack.pop() {
            reached += 1;
            stack.extend(nodes[index].children.iter().map(|c| c.index()));
        }
        if reached != len {
            return Err("node links form a cycle".to_string());
        }

        Ok(Self { nodes, root, namespaces })
    }
}

impl Document {
    pub fn new(root_name: QName) -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Element {
                    name: root_name,
                    attributes: Vec::new(),
                },
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
            namespaces: IndexMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Number of nodes in the arena, including detached ones.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        self.namespaces
            .entry(prefix.to_string())
            .or_insert_with(|| uri.to_string());
    }

    pub fn namespace_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.namespaces.get(prefix).map(|s| s.as_str())
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.namespaces.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.index()].children.push(id);
        id
    }

    pub fn append_element(
        &mut self,
        parent: NodeId,
        name: QName,
        attributes: Vec<Attribute>,
    ) -> NodeId {
        self.push(parent, NodeKind::Element { name, attributes })
    }

    pub fn append_text(&mut self, parent: NodeId, value: &str) -> NodeId {
        self.push(
            parent,
            NodeKind::Text {
                value: value.to_string(),
            },
        )
    }

    /// Unlink a node from its parent. The node stays in the arena.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.index()].parent.take() {
            self.nodes[parent.index()].children.retain(|c| *c != id);
        }
    }

    pub fn name(&self, id: NodeId) -> Option<&QName> {
        match &self.node(id).kind {
            NodeKind::Element { name, .. } => Some(name),
            NodeKind::Text { .. } => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Element { .. })
    }

    pub fn is_named(&self, id: NodeId, ns: &str, local: &str) -> bool {
        self.name(id).is_some_and(|n| n.is(ns, local))
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.node(id).kind {
            NodeKind::Element { attributes, .. } => attributes,
            NodeKind::Text { .. } => &[],
        }
    }

    pub fn attribute(&self, id: NodeId, ns: &str, local: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.name.is(ns, local))
            .map(|a| a.value.as_str())
    }

    /// Attribute in no namespace.
    pub fn attr(&self, id: NodeId, local: &str) -> Option<&str> {
        self.attribute(id, "", local)
    }

    pub fn set_attribute(&mut self, id: NodeId, name: QName, value: &str) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[id.index()].kind {
            match attributes.iter_mut().find(|a| a.name == name) {
                Some(existing) => existing.value = value.to_string(),
                None => attributes.push(Attribute::new(name, value)),
            }
        }
    }

    /// The element's `id` attribute.
    pub fn static_id(&self, id: NodeId) -> Option<&str> {
        self.attr(id, "id")
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |c| self.is_element(*c))
    }

    pub fn first_child_named(&self, id: NodeId, ns: &str, local: &str) -> Option<NodeId> {
        self.child_elements(id).find(|c| self.is_named(*c, ns, local))
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            document: self,
            next: self.parent(id),
        }
    }

    pub fn has_ancestor_named(&self, id: NodeId, ns: &str, local: &str) -> bool {
        self.ancestors(id).any(|a| self.is_named(a, ns, local))
    }

    /// Elements of the subtree rooted at `id`, in document order, `id` included.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            document: self,
            stack: vec![id],
        }
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.node(id).kind {
            NodeKind::Text { value } => out.push_str(value),
            NodeKind::Element { .. } => {
                for child in self.children(id) {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Deep copy of the subtree at `src` appended under `dest_parent` in `dest`.
    pub fn copy_subtree(&self, src: NodeId, dest: &mut Document, dest_parent: NodeId) -> NodeId {
        let copied = dest.push(dest_parent, self.node(src).kind.clone());
        for child in self.children(src) {
            self.copy_subtree(*child, dest, copied);
        }
        copied
    }

    /// Deep copy of the subtree at `src` inserted under `dest_parent` in `dest`
    /// at child position `index`.
    pub fn insert_subtree(
        &self,
        src: NodeId,
        dest: &mut Document,
        dest_parent: NodeId,
        index: usize,
    ) -> NodeId {
        let copied = self.copy_subtree(src, dest, dest_parent);
        let children = &mut dest.nodes[dest_parent.index()].children;
        children.pop();
        let index = index.min(children.len());
        children.insert(index, copied);
        copied
    }

    /// Position of `id` among its parent's children.
    pub fn child_index(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// New document whose root is a deep copy of the element at `src`.
    pub fn subtree_document(&self, src: NodeId) -> Document {
        let name = self
            .name(src)
            .cloned()
            .unwrap_or_else(|| QName::local("text"));
        let mut document = Document::new(name);
        document.namespaces = self.namespaces.clone();
        let root = document.root();
        for attribute in self.attributes(src) {
            document.set_attribute(root, attribute.name.clone(), &attribute.value);
        }
        for child in self.children(src) {
            self.copy_subtree(*child, &mut document, root);
        }
        document
    }
}

pub struct Ancestors<'a> {
    document: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.document.parent(current);
        Some(current)
    }
}

pub struct Descendants<'a> {
    document: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let current = self.stack.pop()?;
            if !self.document.is_element(current) {
                continue;
            }
            let children = self.document.children(current);
            self.stack.extend(children.iter().rev().copied());
            return Some(current);
        }
    }
}
