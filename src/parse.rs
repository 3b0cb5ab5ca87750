//! Parse Module
//!
//! Loads form description markup into a [`Document`] arena. Parsing itself is
//! delegated to xml5ever's tree builder; this module only converts the
//! resulting `RcDom` into the arena, keeping namespaces and dropping
//! whitespace-only text, comments and processing instructions.

use markup5ever_rcdom::{Handle, NodeData, RcDom};
use tendril::TendrilSink;
use xml5ever::driver::{parse_document, XmlParseOpts};
use xml5ever::{Attribute as XmlAttribute, QualName};

use crate::document::{ns, Document, NodeId, QName};
use crate::validate::AnalysisError;

/// Parse a form description (or a request document) into a [`Document`].
pub fn parse_form_document(source: &str) -> Result<Document, AnalysisError> {
    let dom: RcDom = parse_document(RcDom::default(), XmlParseOpts::default()).one(source);

    let root = dom
        .document
        .children
        .borrow()
        .iter()
        .find(|h| matches!(h.data, NodeData::Element { .. }))
        .cloned()
        .ok_or_else(|| AnalysisError::MalformedMarkup {
            reason: "document has no root element".to_string(),
        })?;

    let NodeData::Element { name, attrs, .. } = &root.data else {
        return Err(AnalysisError::MalformedMarkup {
            reason: "document root is not an element".to_string(),
        });
    };
    let attrs = attrs.borrow().clone();

    let mut document = Document::new(convert_name(name));
    declare_name(&mut document, name);
    let root_id = document.root();
    copy_attributes(&mut document, root_id, &attrs);

    for child in root.children.borrow().iter() {
        convert_node(child, &mut document, root_id);
    }

    Ok(document)
}

fn convert_node(handle: &Handle, document: &mut Document, parent: NodeId) {
    match &handle.data {
        NodeData::Element { name, attrs, .. } => {
            declare_name(document, name);
            let id = document.append_element(parent, convert_name(name), Vec::new());
            copy_attributes(document, id, &attrs.borrow());
            for child in handle.children.borrow().iter() {
                convert_node(child, document, id);
            }
        }
        NodeData::Text { contents } => {
            let text = contents.borrow();
            if !text.trim().is_empty() {
                document.append_text(parent, &text);
            }
        }
        _ => {}
    }
}

fn convert_name(name: &QualName) -> QName {
    let prefix = name.prefix.as_ref().map(|p| &**p).unwrap_or("");
    QName::with_prefix(prefix, &name.ns, &name.local)
}

fn declare_name(document: &mut Document, name: &QualName) {
    if let Some(prefix) = &name.prefix {
        if !name.ns.is_empty() {
            document.declare_namespace(prefix, &name.ns);
        }
    }
}

fn copy_attributes(document: &mut Document, id: NodeId, attrs: &[XmlAttribute]) {
    for attr in attrs {
        let prefix = attr.name.prefix.as_ref().map(|p| &**p).unwrap_or("");

        // Namespace declarations feed the prefix table, not the attribute list
        if prefix == "xmlns" {
            document.declare_namespace(&attr.name.local, &attr.value);
            continue;
        }
        if prefix.is_empty() && &*attr.name.local == "xmlns" {
            document.declare_namespace("", &attr.value);
            continue;
        }
        if &*attr.name.ns == ns::XMLNS {
            continue;
        }

        declare_name(document, &attr.name);
        document.set_attribute(id, convert_name(&attr.name), &attr.value);
    }
}
