#[cfg(test)]
mod tests {
    use crate::document::{Document, QName};
    use crate::parse::parse_form_document;

    const ELEMENT: &str = r#"{"type":"element","name":{"local":"e"}}"#;

    fn read(nodes: &str, root: u32) -> Result<Document, serde_json::Error> {
        let nodes = nodes.replace("E", ELEMENT);
        serde_json::from_str(&format!(r#"{{"nodes":[{}],"root":{}}}"#, nodes, root))
    }

    #[test]
    fn test_serialized_document_reads_back() {
        let doc = parse_form_document(r#"<a xmlns:p="urn:p"><b><p:c/>text</b><d/></a>"#).unwrap();
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();

        assert_eq!(back.len(), doc.len());
        assert_eq!(back.namespace_for_prefix("p"), Some("urn:p"));
        let names: Vec<String> = back
            .descendants(back.root())
            .filter_map(|id| back.name(id).map(QName::qualified))
            .collect();
        assert!(names.contains(&"p:c".to_string()));
    }

    #[test]
    fn test_detached_nodes_are_accepted() {
        let mut doc = Document::new(QName::local("a"));
        let root = doc.root();
        let b = doc.append_element(root, QName::local("b"), Vec::new());
        doc.append_element(b, QName::local("c"), Vec::new());
        doc.detach(b);

        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert!(back.children(back.root()).is_empty());
    }

    #[test]
    fn test_root_out_of_range() {
        assert!(read("", 7).is_err());
        assert!(read("{\"kind\":E}", 1).is_err());
    }

    #[test]
    fn test_links_out_of_range() {
        assert!(read(r#"{"kind":E,"children":[3]}"#, 0).is_err());
        assert!(read(r#"{"kind":E},{"kind":E,"parent":9}"#, 0).is_err());
    }

    #[test]
    fn test_links_must_agree() {
        // Child without a back link
        assert!(read(r#"{"kind":E,"children":[1]},{"kind":E}"#, 0).is_err());
        // Parent that does not list the child
        assert!(read(r#"{"kind":E},{"kind":E,"parent":0}"#, 0).is_err());
        // Same child listed twice
        assert!(read(r#"{"kind":E,"children":[1,1]},{"kind":E,"parent":0}"#, 0).is_err());
        // Root with a parent
        assert!(read(r#"{"kind":E,"parent":1},{"kind":E,"children":[0]}"#, 0).is_err());
        assert!(read(r#"{"kind":E,"children":[1]},{"kind":E,"parent":0}"#, 0).is_ok());
    }

    #[test]
    fn test_cycles_are_rejected() {
        let cycle = r#"{"kind":E},{"kind":E,"parent":2,"children":[2]},{"kind":E,"parent":1,"children":[1]}"#;
        assert!(read(cycle, 0).is_err());
        let self_loop = r#"{"kind":E},{"kind":E,"parent":1,"children":[1]}"#;
        assert!(read(self_loop, 0).is_err());
    }

    #[test]
    fn test_text_nodes_have_no_children() {
        let text = r#"{"kind":E,"children":[1]},{"kind":{"type":"text","value":"x"},"parent":0,"children":[2]},{"kind":E,"parent":1}"#;
        assert!(read(text, 0).is_err());
    }
}
