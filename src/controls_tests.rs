#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::controls::ControlKind;
    use crate::parse::parse_form_document;
    use crate::static_state::StaticState;
    use crate::validate::{AnalysisError, INV_MISSING_ATTRIBUTE, INV_MISSING_CONTROL_ID, WARN_UNRESOLVED_LHHA};

    fn form(body: &str) -> StaticState {
        let xml = format!(
            r#"<static-state xmlns:xf="http://www.w3.org/2002/xforms"
                             xmlns:xxf="http://orbeon.org/oxf/xml/xforms"
                             xmlns:ev="http://www.w3.org/2001/xml-events"
                             xmlns:xbl="http://www.w3.org/ns/xbl"
                             xmlns:xhtml="http://www.w3.org/1999/xhtml"
                             xmlns:fr="http://orbeon.org/oxf/xml/form-runner">
                <xf:model id="model"><xf:instance id="instance"><data/></xf:instance></xf:model>
                {}
            </static-state>"#,
            body
        );
        let doc = parse_form_document(&xml).unwrap();
        StaticState::from_document(doc, None, &EngineConfig::default()).unwrap()
    }

    fn analysis_error(body: &str) -> AnalysisError {
        form(body).analyze().unwrap_err()
    }

    const REPEATS: &str = r#"
        <xf:group id="g">
            <xf:label>Group</xf:label>
            <xf:repeat id="r1" ref="row">
                <xf:input id="a" ref="x">
                    <xf:label>A</xf:label>
                    <xf:hint ref="hint"/>
                </xf:input>
                <xf:repeat id="r2" ref="sub">
                    <xf:output id="b" value="."/>
                </xf:repeat>
            </xf:repeat>
            <xf:help for="a">Help A</xf:help>
            <xf:alert for="later">Alert</xf:alert>
            <xf:trigger id="later"/>
        </xf:group>
    "#;

    #[test]
    fn test_repeat_hierarchy() {
        let state = form(REPEATS);
        let analysis = state.analyzed().unwrap();

        assert_eq!(analysis.repeat_hierarchy(), "r1,r2 r1");
        assert_eq!(analysis.controls().repeat_children("r1"), ["r2".to_string()]);
        assert!(analysis.controls().repeat_children("r2").is_empty());

        let r1 = analysis.control("r1").unwrap();
        let r2 = analysis.control("r2").unwrap();
        assert_eq!(r1.kind, ControlKind::Repeat { nested: vec![r2.id] });
        assert_eq!(r2.ancestor_repeat, Some(r1.id));
        assert_eq!(analysis.control("b").unwrap().ancestor_repeat, Some(r2.id));
    }

    #[test]
    fn test_positions_follow_visitation_order() {
        let state = form(REPEATS);
        let analysis = state.analyzed().unwrap();

        let order: Vec<&str> = analysis
            .controls()
            .controls()
            .map(|c| c.prefixed_id.as_str())
            .collect();
        assert_eq!(order, vec!["g", "r1", "a", "r2", "b", "later"]);
        assert_eq!(analysis.control_position("g"), Some(1));
        assert_eq!(analysis.control_position("later"), Some(6));

        let b = analysis.control("b").unwrap();
        assert_eq!(b.level, 3);
        assert_eq!(b.parent, Some(analysis.control("r2").unwrap().id));
    }

    #[test]
    fn test_lhha_resolution() {
        let state = form(REPEATS);
        let analysis = state.analyzed().unwrap();

        let label = analysis.label("g").unwrap();
        assert_eq!(label.static_value.as_deref(), Some("Group"));
        assert!(!label.is_external);

        assert_eq!(analysis.label("a").unwrap().static_value.as_deref(), Some("A"));
        assert!(!analysis.hint("a").unwrap().has_static_value());

        let help = analysis.help("a").unwrap();
        assert!(help.is_external);
        assert_eq!(help.static_value.as_deref(), Some("Help A"));

        // Forward reference resolved after the walk
        assert!(analysis.alert("later").is_some());
        assert!(state.warnings().is_empty());
    }

    #[test]
    fn test_unresolved_lhha_is_a_warning() {
        let state = form(r#"<xf:group id="g"><xf:hint for="nowhere">?</xf:hint></xf:group>"#);
        state.analyze().unwrap();

        let warnings = state.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WARN_UNRESOLVED_LHHA);
        assert!(warnings[0].message.contains("for nowhere"));
    }

    #[test]
    fn test_value_controls_and_bindings() {
        let state = form(REPEATS);
        let analysis = state.analyzed().unwrap();

        assert!(analysis.is_value_control("a"));
        assert!(analysis.is_value_control("a\u{00B7}1"));
        assert!(analysis.is_value_control("b\u{00B7}1-2"));
        assert!(!analysis.is_value_control("later"));
        assert!(!analysis.is_value_control("g"));
        assert!(!analysis.is_value_control("missing"));

        assert!(analysis.has_node_binding("a"));
        assert!(!analysis.has_node_binding("b"));

        assert!(analysis.has_control_by_name("repeat"));
        assert_eq!(analysis.controls().controls_by_name("repeat").len(), 2);
        assert!(!analysis.has_control_by_name("select1"));
    }

    #[test]
    fn test_transparent_markup_and_opaque_models() {
        let state = form(
            r#"
            <xhtml:div>
                <xf:input id="wrapped"/>
                <xf:model id="nested"><xf:instance id="ni"><xf:input id="data-not-control"/></xf:instance></xf:model>
            </xhtml:div>
        "#,
        );
        let analysis = state.analyzed().unwrap();
        assert!(analysis.control("wrapped").is_some());
        assert!(analysis.control("data-not-control").is_none());
        assert!(analysis.models().model("nested").is_some());
    }

    #[test]
    fn test_attribute_controls_are_indexed() {
        let state = form(
            r#"<xf:group id="g"><xxf:attribute id="attr" for="g" name="class" value="'x'"/></xf:group>"#,
        );
        let analysis = state.analyzed().unwrap();

        assert!(analysis.has_attribute_control("g"));
        let attr = analysis.attribute_control("g", "class").unwrap();
        assert_eq!(attr.prefixed_id, "attr");
        assert_eq!(
            attr.kind,
            ControlKind::Attribute {
                for_prefixed_id: "g".to_string(),
                attribute_name: "class".to_string(),
            }
        );
        assert!(analysis.attribute_control("g", "style").is_none());
    }

    #[test]
    fn test_attribute_control_without_name_is_fatal() {
        let err = analysis_error(r#"<xxf:attribute id="attr" for="g"/>"#);
        assert_eq!(err.code(), INV_MISSING_ATTRIBUTE);
    }

    #[test]
    fn test_control_without_id_is_fatal() {
        let err = analysis_error(r#"<xf:group id="g"><xf:input ref="x"/></xf:group>"#);
        assert_eq!(err.code(), INV_MISSING_CONTROL_ID);
        assert_eq!(err.to_string(), "Missing mandatory id for element: xf:input");
    }

    #[test]
    fn test_failed_analysis_is_not_exposed() {
        let state = form(r#"<xf:input ref="x"/>"#);
        assert!(state.analyze().is_err());
        assert!(state.analysis().is_none());
        assert!(state.analyze().is_err());
    }

    #[test]
    fn test_variables_in_scope() {
        let state = form(
            r#"
            <xf:group id="outer">
                <xxf:variable id="v1" name="total" select="1"/>
                <xf:group id="inner">
                    <xf:variable id="v2" name="local" select="2"/>
                    <xf:input id="deep"/>
                </xf:group>
                <xf:input id="after"/>
            </xf:group>
        "#,
        );
        let analysis = state.analyzed().unwrap();

        assert_eq!(
            analysis.control("v1").unwrap().kind,
            ControlKind::Variable { name: "total".to_string() }
        );
        assert_eq!(analysis.control("deep").unwrap().in_scope_variables, vec!["total", "local"]);
        assert_eq!(analysis.control("after").unwrap().in_scope_variables, vec!["total"]);
    }

    #[test]
    fn test_component_lhha_is_not_auto_associated() {
        let state = form(
            r#"
            <xbl:xbl>
                <xbl:binding element="fr|greeting">
                    <xbl:template>
                        <xf:output id="message" value="'Hello'"/>
                        <xbl:content/>
                    </xbl:template>
                </xbl:binding>
            </xbl:xbl>
            <fr:greeting id="hello">
                <xf:label>Not attached</xf:label>
            </fr:greeting>
        "#,
        );
        let analysis = state.analyzed().unwrap();

        let hello = analysis.control("hello").unwrap();
        assert_eq!(hello.kind, ControlKind::Component);
        assert!(hello.label.is_none());

        let message = analysis.control("hello$message").unwrap();
        assert_eq!(message.parent, Some(hello.id));
        assert_eq!(message.static_id, "message");
        assert_ne!(message.scope, hello.scope);
    }

    #[test]
    fn test_offline_triggers_are_classified() {
        let state = form(
            r#"
            <xf:group id="g">
                <xf:trigger id="save">
                    <xf:action ev:event="DOMActivate"><xxf:offline/></xf:action>
                </xf:trigger>
                <xf:trigger id="add" class="button">
                    <xf:action ev:event="DOMActivate"><xf:insert ref="row"/></xf:action>
                </xf:trigger>
                <xf:trigger id="plain"/>
            </xf:group>
        "#,
        );
        let analysis = state.analyzed().unwrap();

        assert!(analysis.has_offline_support());
        assert!(analysis.control("save").unwrap().classes.contains("xxforms-offline"));
        assert_eq!(analysis.offline_insert_trigger_ids(), ["add".to_string()]);

        let mut classes = String::from("xforms-trigger");
        analysis.append_classes(&mut classes, "add");
        assert_eq!(classes, "xforms-trigger button xxforms-offline-insert");

        let mut none = String::new();
        analysis.append_classes(&mut none, "plain");
        assert!(none.is_empty());
    }

    #[test]
    fn test_no_offline_support_without_offline_action() {
        let state = form(
            r#"<xf:trigger id="add"><xf:action ev:event="DOMActivate"><xf:insert ref="row"/></xf:action></xf:trigger>"#,
        );
        let analysis = state.analyzed().unwrap();
        assert!(!analysis.has_offline_support());
        assert!(analysis.offline_insert_trigger_ids().is_empty());
        assert!(analysis.control("add").unwrap().classes.is_empty());
    }

    #[test]
    fn test_scripts_are_extracted() {
        let state = form(
            r#"
            <xf:trigger id="t">
                <xxf:script id="s" ev:event="DOMActivate">alert(1)</xxf:script>
            </xf:trigger>
        "#,
        );
        let analysis = state.analyzed().unwrap();
        assert_eq!(analysis.scripts().get("s").map(|s| s.as_str()), Some("alert(1)"));
    }
}
