#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::codec::{Base64JsonCodec, CodecError, StateCodec};
    use crate::config::EngineConfig;
    use crate::document::Document;
    use crate::parse::parse_form_document;
    use crate::properties::{PropertyValue, SESSION_HEARTBEAT_PROPERTY, STATE_HANDLING_PROPERTY};
    use crate::state_manager::{
        read_request_tokens, DocumentFactory, LiveDocument, Session, StateError, StateManager,
        StateToken,
    };
    use crate::static_state::StaticState;
    use crate::store::{InMemoryStateStore, SerializedState, StateStore};
    use crate::validate::AnalysisError;

    // ═══════════════════════════════════════════════════════════════════════════
    // FIXTURES
    // ═══════════════════════════════════════════════════════════════════════════

    #[derive(Debug)]
    struct TestDocument {
        static_state: Arc<StaticState>,
        uuid: String,
        value: String,
        dirty: bool,
        origin: &'static str,
    }

    impl TestDocument {
        fn new(static_state: Arc<StaticState>, uuid: &str, value: &str) -> Self {
            Self {
                static_state,
                uuid: uuid.to_string(),
                value: value.to_string(),
                dirty: false,
                origin: "created",
            }
        }
    }

    impl LiveDocument for TestDocument {
        fn static_state(&self) -> &Arc<StaticState> {
            &self.static_state
        }

        fn dynamic_state_uuid(&self) -> &str {
            &self.uuid
        }

        fn encode_dynamic_state(&self, _codec: &dyn StateCodec) -> Result<String, StateError> {
            Ok(self.value.clone())
        }

        fn is_dirty_since_last_request(&self) -> bool {
            self.dirty
        }

        fn update_dynamic_state(&mut self) {
            self.uuid = format!("{}-next", self.uuid);
            self.dirty = false;
        }
    }

    struct TestFactory;

    impl DocumentFactory<TestDocument> for TestFactory {
        fn restore(
            &self,
            static_state: Arc<StaticState>,
            encoded_dynamic_state: &str,
        ) -> Result<TestDocument, StateError> {
            let mut document = TestDocument::new(static_state, "restored", encoded_dynamic_state);
            document.origin = "restored";
            Ok(document)
        }
    }

    struct TestSession {
        new: bool,
        max_inactive_interval: i64,
    }

    impl Session for TestSession {
        fn is_new(&self) -> bool {
            self.new
        }

        fn max_inactive_interval(&self) -> i64 {
            self.max_inactive_interval
        }
    }

    const ACTIVE: TestSession = TestSession {
        new: false,
        max_inactive_interval: 1800,
    };

    fn static_state(config: &EngineConfig) -> Arc<StaticState> {
        let xml = r#"<static-state xmlns:xf="http://www.w3.org/2002/xforms">
                <xf:model id="model"><xf:instance id="instance"><data/></xf:instance></xf:model>
                <xf:input id="name" ref="name"/>
            </static-state>"#;
        let doc = parse_form_document(xml).unwrap();
        Arc::new(StaticState::from_document(doc, None, config).unwrap())
    }

    fn client_config() -> EngineConfig {
        EngineConfig::default().with_property(
            STATE_HANDLING_PROPERTY,
            PropertyValue::String("client".to_string()),
        )
    }

    fn manager(config: EngineConfig) -> StateManager<TestDocument> {
        StateManager::new(config, Arc::new(Base64JsonCodec::new()))
    }

    fn request(static_token: &str, dynamic_token: &str) -> Document {
        let xml = format!(
            r#"<xxf:event-request xmlns:xxf="http://orbeon.org/oxf/xml/xforms">
                <xxf:static-state>{}</xxf:static-state>
                <xxf:dynamic-state>{}</xxf:dynamic-state>
            </xxf:event-request>"#,
            static_token, dynamic_token
        );
        parse_form_document(&xml).unwrap()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TOKENS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_token_parsing() {
        let token = StateToken::parse("pers:abc123");
        assert_eq!(
            token,
            StateToken::Indirect {
                prefix: "pers:",
                key: "abc123"
            }
        );
        assert!(token.is_session_dependent());
        assert_eq!(token.key(), "abc123");

        let direct = StateToken::parse("eyJyb290Ijp7fX0");
        assert!(!direct.is_indirect());
        assert_eq!(direct.prefix(), None);
        assert_eq!(direct.key(), "eyJyb290Ijp7fX0");

        assert!(StateToken::parse("sess:x").is_session_dependent());
        assert!(!StateToken::parse("abcd:x").is_session_dependent());
        assert!(!StateToken::parse("ab").is_indirect());
    }

    #[test]
    fn test_read_request_tokens() {
        let (static_token, dynamic_token) = read_request_tokens(&request("pers:s", " pers:d ")).unwrap();
        assert_eq!(static_token, "pers:s");
        assert_eq!(dynamic_token, "pers:d");

        let incomplete = parse_form_document(
            r#"<xxf:event-request xmlns:xxf="http://orbeon.org/oxf/xml/xforms">
                <xxf:static-state>pers:s</xxf:static-state>
            </xxf:event-request>"#,
        )
        .unwrap();
        assert!(matches!(
            read_request_tokens(&incomplete),
            Err(StateError::MalformedRequest { .. })
        ));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DECODING
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_missing_session_is_rejected() {
        let manager = manager(EngineConfig::default());
        let err = manager
            .find_or_restore_document(&request("pers:s", "pers:d"), None, &TestFactory)
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Session has expired. Unable to process incoming request.");
    }

    #[test]
    fn test_inconsistent_prefixes() {
        let manager = manager(EngineConfig::default());
        let err = manager.decode_client_state("pers:a", "sess:b", Some(&ACTIVE)).unwrap_err();
        assert_eq!(err.to_string(), "Inconsistent XForms state prefixes: pers:, sess:");

        let err = manager.decode_client_state("pers:a", "plain", Some(&ACTIVE)).unwrap_err();
        assert!(matches!(err, StateError::InconsistentPrefixes { ref dynamic_prefix, .. } if dynamic_prefix.is_empty()));
    }

    #[test]
    fn test_prefix_without_store() {
        let manager = manager(EngineConfig::default());
        let err = manager.decode_client_state("sess:a", "sess:b", Some(&ACTIVE)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid state prefix: sess:");
    }

    #[test]
    fn test_store_miss_messages() {
        let manager = manager(EngineConfig::default());

        let err = manager.decode_client_state("pers:s1", "pers:d1", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Your session has expired. Please reload the current page. Note that you will lose any unsaved changes. Static state key: s1, dynamic state key: d1"
        );

        let fresh = TestSession {
            new: true,
            max_inactive_interval: 1800,
        };
        let err = manager.decode_client_state("pers:s1", "pers:d1", Some(&fresh)).unwrap_err();
        assert!(matches!(err, StateError::SessionExpired { .. }));

        let err = manager.decode_client_state("pers:s1", "pers:d1", Some(&ACTIVE)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to retrieve XForms engine state. Please reload the current page. Note that you will lose any unsaved changes. Static state key: s1, dynamic state key: d1"
        );
    }

    #[test]
    fn test_direct_tokens_pass_through() {
        let manager = manager(EngineConfig::default());
        let state = manager.decode_client_state("encoded-static", "encoded-dynamic", None).unwrap();
        assert_eq!(state, SerializedState::new("encoded-static", "encoded-dynamic"));
    }

    #[test]
    fn test_session_store_resolves_session_tokens() {
        let store = Arc::new(InMemoryStateStore::default());
        store.add("s", "d", SerializedState::new("static", "dynamic"));
        let manager = manager(EngineConfig::default()).with_session_store(store);

        let state = manager.decode_client_state("sess:s", "sess:d", Some(&ACTIVE)).unwrap();
        assert_eq!(state, SerializedState::new("static", "dynamic"));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_server_state_persists_and_restores() {
        let mut config = EngineConfig::default();
        config.cache.cache_document = false;
        let store = Arc::new(InMemoryStateStore::default());
        let manager = manager(config.clone()).with_persistent_store(store.clone());

        let static_state = static_state(&config);
        let document = TestDocument::new(Arc::clone(&static_state), "d1", "dynamic-1");
        let static_token = manager.client_encoded_static_state(&document).unwrap();
        let dynamic_token = manager.client_encoded_dynamic_state(&document).unwrap();
        assert_eq!(static_token, format!("pers:{}", static_state.uuid()));
        assert_eq!(dynamic_token, "pers:d1");

        manager.after_initial_response(document).unwrap();
        assert_eq!(store.len(), 1);
        assert!(static_state.is_serialized());

        let restored = manager
            .find_or_restore_document(&request(&static_token, &dynamic_token), Some(&ACTIVE), &TestFactory)
            .unwrap();
        assert_eq!(restored.origin, "restored");
        assert_eq!(restored.value, "dynamic-1");
        assert!(Arc::ptr_eq(&restored.static_state, &static_state));
    }

    #[test]
    fn test_password_guards_direct_tokens_only() {
        let mut config = EngineConfig {
            password: Some("secret".to_string()),
            ..EngineConfig::default()
        };
        config.cache.cache_document = false;
        let manager = manager(config.clone());

        // Server-held state restores from the store without a signature
        let server_state = static_state(&config);
        let static_token = format!("pers:{}", server_state.uuid());
        manager
            .after_initial_response(TestDocument::new(server_state, "d1", "dynamic-1"))
            .unwrap();
        let restored = manager
            .find_or_restore_document(&request(&static_token, "pers:d1"), Some(&ACTIVE), &TestFactory)
            .unwrap();
        assert_eq!(restored.value, "dynamic-1");

        // An unsigned direct token is refused even when it claims server handling
        let forged = static_state(&EngineConfig::default())
            .serialize(&Base64JsonCodec::new())
            .unwrap();
        let err = manager
            .find_or_restore_document(&request(&forged, "dynamic"), None, &TestFactory)
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::Analysis(AnalysisError::Codec(CodecError::BadSignature))
        ));
    }

    #[test]
    fn test_cached_document_is_checked_out() {
        let config = EngineConfig::default();
        let manager = manager(config.clone());
        let static_state = static_state(&config);
        let static_token = format!("pers:{}", static_state.uuid());

        manager
            .after_initial_response(TestDocument::new(static_state, "d1", "dynamic-1"))
            .unwrap();
        assert_eq!(manager.document_cache().len(), 1);

        let request = request(&static_token, "pers:d1");
        let first = manager
            .find_or_restore_document(&request, Some(&ACTIVE), &TestFactory)
            .unwrap();
        assert_eq!(first.origin, "created");
        assert!(manager.document_cache().is_empty());

        // The next request rebuilds from the store while the first is out
        let second = manager
            .find_or_restore_document(&request, Some(&ACTIVE), &TestFactory)
            .unwrap();
        assert_eq!(second.origin, "restored");

        manager.after_update_response(first).unwrap();
        assert_eq!(manager.document_cache().len(), 1);
    }

    #[test]
    fn test_client_state_round_trip_through_cache() {
        let config = client_config();
        let manager = manager(config.clone());
        let document = TestDocument::new(static_state(&config), "d1", "dynamic-1");

        let static_token = manager.client_encoded_static_state(&document).unwrap();
        let dynamic_token = manager.client_encoded_dynamic_state(&document).unwrap();
        assert!(!static_token.starts_with("pers:"));
        assert_eq!(dynamic_token, "dynamic-1");

        manager.after_initial_response(document).unwrap();
        let found = manager
            .find_or_restore_document(&request(&static_token, &dynamic_token), None, &TestFactory)
            .unwrap();
        assert_eq!(found.origin, "created");

        // Without the cache the document is rebuilt from the tokens themselves
        let rebuilt = manager
            .find_or_restore_document(&request(&static_token, &dynamic_token), None, &TestFactory)
            .unwrap();
        assert_eq!(rebuilt.origin, "restored");
        assert_eq!(rebuilt.value, "dynamic-1");
    }

    #[test]
    fn test_before_update_response_snapshots_dirty_documents() {
        let config = EngineConfig::default();
        let manager = manager(config.clone());
        let mut document = TestDocument::new(static_state(&config), "d1", "v");

        manager.before_update_response(&mut document);
        assert_eq!(document.uuid, "d1");

        document.dirty = true;
        manager.before_update_response(&mut document);
        assert_eq!(document.uuid, "d1-next");
        assert!(!document.dirty);
    }

    #[test]
    fn test_heartbeat_delay() {
        let config = EngineConfig::default();
        let manager = manager(config.clone());
        let document = TestDocument::new(static_state(&config), "d1", "v");
        assert_eq!(manager.heartbeat_delay(&document, Some(&ACTIVE)), 1_440_000);
        assert_eq!(manager.heartbeat_delay(&document, None), -1);

        let no_heartbeat = EngineConfig::default().with_property(SESSION_HEARTBEAT_PROPERTY, PropertyValue::Boolean(false));
        let document = TestDocument::new(static_state(&no_heartbeat), "d1", "v");
        assert_eq!(manager.heartbeat_delay(&document, Some(&ACTIVE)), -1);

        let client = client_config();
        let document = TestDocument::new(static_state(&client), "d1", "v");
        assert_eq!(manager.heartbeat_delay(&document, Some(&ACTIVE)), -1);
    }
}
