#[cfg(test)]
mod tests {
    use crate::document::{ns, QName};
    use crate::parse::parse_form_document;
    use crate::validate::INV_MALFORMED_MARKUP;

    #[test]
    fn test_namespaced_elements_and_attributes() {
        let xml = r#"
            <static-state xmlns:xf="http://www.w3.org/2002/xforms"
                          xmlns:ev="http://www.w3.org/2001/xml-events"
                          deployment="plain">
                <xf:group id="g">
                    <xf:action ev:event="DOMActivate"/>
                </xf:group>
            </static-state>
        "#;

        let doc = parse_form_document(xml).unwrap();
        let root = doc.root();
        assert_eq!(doc.name(root), Some(&QName::local("static-state")));
        assert_eq!(doc.attr(root, "deployment"), Some("plain"));
        assert_eq!(doc.namespace_for_prefix("xf"), Some(ns::XFORMS));

        let group = doc.first_child_named(root, ns::XFORMS, "group").unwrap();
        assert_eq!(doc.static_id(group), Some("g"));

        let action = doc.first_child_named(group, ns::XFORMS, "action").unwrap();
        assert_eq!(doc.attribute(action, ns::EVENTS, "event"), Some("DOMActivate"));
        assert_eq!(doc.parent(action), Some(group));
    }

    #[test]
    fn test_namespace_declarations_are_not_attributes() {
        let xml = r#"<root xmlns:xf="http://www.w3.org/2002/xforms" a="1"/>"#;
        let doc = parse_form_document(xml).unwrap();
        let names: Vec<String> = doc
            .attributes(doc.root())
            .iter()
            .map(|a| a.name.qualified())
            .collect();
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[test]
    fn test_whitespace_text_is_dropped() {
        let xml = r#"
            <root>
                <label>  Name  </label>
            </root>
        "#;
        let doc = parse_form_document(xml).unwrap();
        let label = doc.first_child_named(doc.root(), "", "label").unwrap();
        assert_eq!(doc.children(doc.root()).len(), 1);
        assert_eq!(doc.text_content(label), "  Name  ");
    }

    #[test]
    fn test_empty_input_is_malformed() {
        let err = parse_form_document("").unwrap_err();
        assert_eq!(err.code(), INV_MALFORMED_MARKUP);
    }
}
