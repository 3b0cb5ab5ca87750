#[cfg(test)]
mod tests {
    use crate::component::ComponentRegistry;
    use crate::document::{Document, QName};
    use crate::parse::parse_form_document;
    use crate::scope::{resolve_scopes, ScopeId, ScopeTree};
    use crate::validate::{AnalysisError, INV_UNRESOLVED_COMPONENT};

    fn form(body: &str) -> Document {
        let xml = format!(
            r#"<static-state xmlns:xf="http://www.w3.org/2002/xforms"
                             xmlns:xxf="http://orbeon.org/oxf/xml/xforms"
                             xmlns:ev="http://www.w3.org/2001/xml-events"
                             xmlns:xbl="http://www.w3.org/ns/xbl"
                             xmlns:fr="http://orbeon.org/oxf/xml/form-runner">{}</static-state>"#,
            body
        );
        parse_form_document(&xml).unwrap()
    }

    fn resolve(document: &Document) -> Result<ScopeTree, AnalysisError> {
        let components = ComponentRegistry::from_document(document)?;
        resolve_scopes(document, components)
    }

    const GREETING_BINDING: &str = r#"
        <xbl:xbl>
            <xbl:binding element="fr|greeting">
                <xbl:template>
                    <xf:group id="inner-group">
                        <xf:output id="message" value="'Hello'"/>
                        <xbl:content/>
                    </xf:group>
                </xbl:template>
            </xbl:binding>
        </xbl:xbl>
    "#;

    #[test]
    fn test_top_level_ids_resolve_in_top_level_scope() {
        let doc = form(r#"<xf:group id="g"><xf:input id="i"/></xf:group>"#);
        let scopes = resolve(&doc).unwrap();

        assert_eq!(scopes.len(), 1);
        let scope = scopes.resolution_scope_by_prefixed_id("i").unwrap();
        assert!(scope.is_top_level());
        assert_eq!(scope.full_prefix(), "");
    }

    #[test]
    fn test_prefix_round_trip() {
        let doc = form(&format!(
            r#"{}<fr:greeting id="hello"/>"#,
            GREETING_BINDING
        ));
        let scopes = resolve(&doc).unwrap();

        for scope in scopes.scopes() {
            let prefixed = scope.prefixed_id_for_static_id("message");
            assert_eq!(scope.static_id_for_prefixed_id(&prefixed), Some("message"));
        }
        let inner = scopes.resolution_scope_by_prefix("hello$").unwrap();
        assert_eq!(inner.prefixed_id_for_static_id("message"), "hello$message");
        assert_eq!(inner.static_id_for_prefixed_id("other$message"), None);
    }

    #[test]
    fn test_component_instance_creates_nested_scope() {
        let doc = form(&format!(
            r#"{}
            <xf:group id="outer">
                <fr:greeting id="hello">
                    <xf:input id="name" ref="name"/>
                </fr:greeting>
            </xf:group>"#,
            GREETING_BINDING
        ));
        let scopes = resolve(&doc).unwrap();

        assert_eq!(scopes.len(), 2);
        assert!(scopes.has_binding("hello"));

        let hello = scopes.resolution_scope_by_prefixed_id("hello").unwrap();
        assert!(hello.is_top_level());

        let message = scopes.resolution_scope_by_prefixed_id("hello$message").unwrap();
        assert_eq!(message.full_prefix(), "hello$");
        assert_eq!(message.scope_id, "hello");
        assert_eq!(message.parent, Some(ScopeId::TOP_LEVEL));

        // Content passed to the component keeps resolving outside of it
        let name = scopes.resolution_scope_by_prefixed_id("name").unwrap();
        assert!(name.is_top_level());
        assert!(scopes.resolution_scope_by_prefixed_id("hello$name").is_none());
    }

    #[test]
    fn test_nested_component_prefixes_concatenate() {
        let doc = form(
            r#"
            <xbl:xbl>
                <xbl:binding element="fr|outer">
                    <xbl:template>
                        <fr:inner id="b"/>
                    </xbl:template>
                </xbl:binding>
                <xbl:binding element="fr|inner">
                    <xbl:template>
                        <xf:input id="c"/>
                    </xbl:template>
                </xbl:binding>
            </xbl:xbl>
            <fr:outer id="a"/>
        "#,
        );
        let scopes = resolve(&doc).unwrap();

        assert_eq!(scopes.len(), 3);
        let c = scopes.resolution_scope_by_prefixed_id("a$b$c").unwrap();
        assert_eq!(c.full_prefix(), "a$b$");
        let parent = scopes.parent(c.id).unwrap();
        assert_eq!(parent.full_prefix(), "a$");
        assert!(scopes.shadow_tree("a$b").is_some());
    }

    #[test]
    fn test_unbound_element_in_component_namespace_is_fatal() {
        let doc = form(&format!(r#"{}<fr:missing id="m"/>"#, GREETING_BINDING));
        let err = resolve(&doc).unwrap_err();
        assert_eq!(err.code(), INV_UNRESOLVED_COMPONENT);
    }

    #[test]
    fn test_component_instance_without_id_is_fatal() {
        let doc = form(&format!(r#"{}<fr:greeting/>"#, GREETING_BINDING));
        let err = resolve(&doc).unwrap_err();
        assert_eq!(err.code(), INV_UNRESOLVED_COMPONENT);
    }

    #[test]
    fn test_binding_without_template_is_fatal() {
        let doc = form(r#"<xbl:xbl><xbl:binding element="fr|empty"/></xbl:xbl>"#);
        let err = ComponentRegistry::from_document(&doc).unwrap_err();
        assert_eq!(err.code(), INV_UNRESOLVED_COMPONENT);
    }

    #[test]
    fn test_undeclared_selector_prefix_is_fatal() {
        let doc = form(
            r#"<xbl:xbl><xbl:binding element="zz|thing"><xbl:template/></xbl:binding></xbl:xbl>"#,
        );
        let err = ComponentRegistry::from_document(&doc).unwrap_err();
        assert_eq!(err.code(), INV_UNRESOLVED_COMPONENT);
    }

    #[test]
    fn test_free_transient_state_releases_templates() {
        let doc = form(&format!(r#"{}<fr:greeting id="hello"/>"#, GREETING_BINDING));
        let mut scopes = resolve(&doc).unwrap();
        let greeting = QName::new("http://orbeon.org/oxf/xml/form-runner", "greeting");
        assert!(scopes.components().binding(&greeting).unwrap().has_template());

        scopes.free_transient_state();
        let binding = scopes.components().binding(&greeting).unwrap();
        assert!(!binding.has_template());
        // Shadow trees stay available
        assert!(scopes.shadow_tree("hello").is_some());
    }
}
