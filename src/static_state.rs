//! # Static State
//!
//! The immutable, shareable result of compiling one form description.
//!
//! A static state is created either from a freshly parsed document or from a
//! token produced by [`StaticState::serialize`]. Construction only splits the
//! document (models, controls, properties, bindings); the expensive part runs
//! in [`StaticState::analyze`], at most once, after which the [`Analysis`] is
//! read-only and shared by every session using the form.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use uuid::Uuid;

use crate::codec::{CodecError, StateCodec};
use crate::component::ComponentRegistry;
use crate::config::{EngineConfig, FeatureFlags, PathMatcher};
use crate::controls::{
    classify_offline, extract_scripts, ControlAnalysis, ControlTree, ControlTreeBuilder, LhhaAnalysis,
    LhhaKind,
};
use crate::document::{ns, Document, NodeId, QName};
use crate::events::{index_control_handlers, index_model_handlers, EventHandler, EventIndex};
use crate::model::{extract_nested_models, Model, ModelIndex};
use crate::properties::{
    DeclaredProperties, PropertyTable, PropertyValue, NOSCRIPT_PROPERTY, NOSCRIPT_SUPPORT_PROPERTY,
    XPATH_ANALYSIS_PROPERTY,
};
use crate::query::{QueryEvaluator, TreeQueryEvaluator};
use crate::scope::{resolve_scopes, ScopeId, ScopeTree};
use crate::validate::{AnalysisError, AnalysisWarning, Diagnostics};
use crate::visitor::ControlSource;

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    #[default]
    Plain,
    Separate,
    Integrated,
}

impl DeploymentType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plain" => Some(Self::Plain),
            "separate" => Some(Self::Separate),
            "integrated" => Some(Self::Integrated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub system_id: String,
    pub line: u32,
    pub column: u32,
}

/// Request-level information recorded on the root of the static state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub deployment_type: DeploymentType,
    pub context_path: Option<String>,
    pub base_uri: Option<String>,
    pub container_type: Option<String>,
    pub container_namespace: Option<String>,
    pub location: Option<SourceLocation>,
}

impl DocumentMetadata {
    fn from_root(document: &Document) -> Result<Self, AnalysisError> {
        let root = document.root();
        let attr = |name: &str| document.attr(root, name).map(str::to_string);

        let deployment_type = match document.attr(root, "deployment") {
            Some(value) => DeploymentType::parse(value).ok_or_else(|| AnalysisError::MalformedMarkup {
                reason: format!("unknown deployment type: {}", value),
            })?,
            None => DeploymentType::Plain,
        };

        let location = document.attr(root, "system-id").and_then(|system_id| {
            let line = document.attr(root, "line")?.parse().ok()?;
            let column = document.attr(root, "column")?.parse().ok()?;
            Some(SourceLocation {
                system_id: system_id.to_string(),
                line,
                column,
            })
        });

        Ok(Self {
            deployment_type,
            context_path: attr("context-path"),
            base_uri: document
                .attribute(root, "http://www.w3.org/XML/1998/namespace", "base")
                .or_else(|| document.attr(root, "base"))
                .map(str::to_string),
            container_type: attr("container-type"),
            container_namespace: attr("container-namespace"),
            location,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANALYSIS
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything [`StaticState::analyze`] computes. Sealed once built.
#[derive(Debug)]
pub struct Analysis {
    scopes: ScopeTree,
    models: ModelIndex,
    controls: ControlTree,
    events: EventIndex,
    warnings: Vec<AnalysisWarning>,
}

impl Analysis {
    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    pub fn models(&self) -> &ModelIndex {
        &self.models
    }

    pub fn controls(&self) -> &ControlTree {
        &self.controls
    }

    pub fn events(&self) -> &EventIndex {
        &self.events
    }

    pub fn warnings(&self) -> &[AnalysisWarning] {
        &self.warnings
    }

    pub fn control(&self, prefixed_id: &str) -> Option<&ControlAnalysis> {
        self.controls.control(prefixed_id)
    }

    pub fn control_position(&self, prefixed_id: &str) -> Option<usize> {
        self.controls.control_position(prefixed_id)
    }

    pub fn has_node_binding(&self, prefixed_id: &str) -> bool {
        self.controls.has_node_binding(prefixed_id)
    }

    pub fn label(&self, prefixed_id: &str) -> Option<&LhhaAnalysis> {
        self.controls.lhha(prefixed_id, LhhaKind::Label)
    }

    pub fn help(&self, prefixed_id: &str) -> Option<&LhhaAnalysis> {
        self.controls.lhha(prefixed_id, LhhaKind::Help)
    }

    pub fn hint(&self, prefixed_id: &str) -> Option<&LhhaAnalysis> {
        self.controls.lhha(prefixed_id, LhhaKind::Hint)
    }

    pub fn alert(&self, prefixed_id: &str) -> Option<&LhhaAnalysis> {
        self.controls.lhha(prefixed_id, LhhaKind::Alert)
    }

    pub fn is_value_control(&self, effective_id: &str) -> bool {
        self.controls.is_value_control(effective_id)
    }

    pub fn repeat_hierarchy(&self) -> &str {
        self.controls.repeat_hierarchy()
    }

    pub fn has_control_by_name(&self, local_name: &str) -> bool {
        self.controls.has_control_by_name(local_name)
    }

    pub fn has_attribute_control(&self, prefixed_for: &str) -> bool {
        self.controls.has_attribute_control(prefixed_for)
    }

    pub fn attribute_control(&self, prefixed_for: &str, name: &str) -> Option<&ControlAnalysis> {
        self.controls.attribute_control(prefixed_for, name)
    }

    pub fn handlers_for_observer(&self, observer_prefixed_id: &str) -> Vec<&EventHandler> {
        self.events.handlers_for_observer(observer_prefixed_id)
    }

    pub fn observer_has_handler_for_event(&self, observer_prefixed_id: &str, event_name: &str) -> bool {
        self.events.observer_has_handler_for_event(observer_prefixed_id, event_name)
    }

    pub fn has_handler_for_event(&self, event_name: &str, include_all_events: bool) -> bool {
        self.events.has_handler_for_event(event_name, include_all_events)
    }

    pub fn key_handlers(&self) -> Vec<&EventHandler> {
        self.events.key_handlers()
    }

    pub fn models_for_scope(&self, scope: ScopeId) -> Vec<&Model> {
        self.models.models_for_scope(scope)
    }

    pub fn default_model_for_scope(&self, scope: ScopeId) -> Option<&Model> {
        self.models.default_model_for_scope(scope)
    }

    pub fn default_instance_prefixed_id_for_scope(&self, scope: ScopeId) -> Option<&str> {
        self.models.default_instance_prefixed_id_for_scope(scope)
    }

    pub fn find_instance_prefixed_id(&self, start: ScopeId, instance_static_id: &str) -> Option<String> {
        self.models
            .find_instance_prefixed_id(&self.scopes, start, instance_static_id)
    }

    pub fn scripts(&self) -> &indexmap::IndexMap<String, String> {
        self.controls.scripts()
    }

    pub fn append_classes(&self, out: &mut String, prefixed_id: &str) {
        self.controls.append_classes(out, prefixed_id)
    }

    pub fn has_offline_support(&self) -> bool {
        self.controls.has_offline_support()
    }

    pub fn offline_insert_trigger_ids(&self) -> &[String] {
        self.controls.offline_insert_trigger_ids()
    }

    /// Repeats enclosing `start_prefixed_id`, leaf to root, stopping before
    /// `end_prefixed_id`. Action ids resolve through their ancestor observer.
    pub fn ancestor_repeats(&self, start_prefixed_id: &str, end_prefixed_id: Option<&str>) -> Vec<String> {
        let control = self.controls.control(start_prefixed_id).or_else(|| {
            self.events
                .ancestor_observer(start_prefixed_id)
                .and_then(|observer| self.controls.control(observer))
        });
        match control {
            Some(control) => self.controls.ancestor_repeats(control, end_prefixed_id),
            None => Vec::new(),
        }
    }

    pub fn find_closest_common_ancestor_repeat(&self, prefixed_id1: &str, prefixed_id2: &str) -> Option<String> {
        let ancestors1 = self.ancestor_repeats(prefixed_id1, None);
        let ancestors2 = self.ancestor_repeats(prefixed_id2, None);

        let mut result = None;
        for (repeat1, repeat2) in ancestors1.iter().rev().zip(ancestors2.iter().rev()) {
            if repeat1 != repeat2 {
                break;
            }
            result = Some(repeat1.clone());
        }
        result
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATIC STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// A static state document split into the parts a [`StaticState`] keeps.
struct Split {
    metadata: DocumentMetadata,
    properties: PropertyTable,
    components: ComponentRegistry,
    controls: Document,
    model_documents: Vec<Document>,
    xhtml: Option<Document>,
    /// The XHTML snapshot came from the static state document itself.
    xhtml_embedded: bool,
    path_matchers: Vec<PathMatcher>,
    warnings: Vec<AnalysisWarning>,
}

impl Split {
    fn from_document(
        document: &Document,
        xhtml: Option<Document>,
        config: &EngineConfig,
    ) -> Result<Self, AnalysisError> {
        let root = document.root();
        let mut diagnostics = Diagnostics::new();

        let metadata = DocumentMetadata::from_root(document)?;

        let top_level_models: Vec<NodeId> = document
            .child_elements(root)
            .filter(|c| document.is_named(*c, ns::XFORMS, "model"))
            .collect();

        // Properties
        let mut declared = DeclaredProperties::default();
        if let Some(properties) = document.first_child_named(root, "", "properties") {
            for attribute in document.attributes(properties) {
                declared
                    .global
                    .push((attribute.name.local.clone(), attribute.value.clone()));
            }
        }
        for model in &top_level_models {
            for attribute in document.attributes(*model) {
                if attribute.name.ns == ns::XXFORMS {
                    declared
                        .model
                        .push((attribute.name.local.clone(), attribute.value.clone()));
                }
            }
        }
        let properties = PropertyTable::resolve(&declared, &config.global_properties, &mut diagnostics)?;

        let components = ComponentRegistry::from_document(document)?;

        // Controls: every namespaced top-level element except models, XHTML and bindings
        let mut controls = Document::new(QName::local("controls"));
        for (prefix, uri) in document.namespaces() {
            controls.declare_namespace(prefix, uri);
        }
        let controls_root = controls.root();
        let mut top_level_controls = 0;
        for child in document.child_elements(root) {
            let Some(name) = document.name(child) else {
                continue;
            };
            if name.ns.is_empty()
                || name.ns == ns::XBL
                || name.is(ns::XFORMS, "model")
                || name.is(ns::XHTML, "html")
            {
                continue;
            }
            document.copy_subtree(child, &mut controls, controls_root);
            top_level_controls += 1;
        }

        let mut model_documents: Vec<Document> = top_level_models
            .iter()
            .map(|m| document.subtree_document(*m))
            .collect();
        let nested_models = extract_nested_models(&controls, controls_root);
        tracing::debug!(
            target: "formstate::analysis",
            top_level_models = model_documents.len(),
            nested_models = nested_models.len(),
            top_level_controls,
            "split static state document"
        );
        model_documents.extend(nested_models);

        let (xhtml, xhtml_embedded) = match xhtml {
            Some(provided) => (Some(provided), false),
            None => match document.first_child_named(root, ns::XHTML, "html") {
                Some(html) => (Some(document.subtree_document(html)), true),
                None => (None, false),
            },
        };

        let path_matchers = match document.first_child_named(root, "", "matchers") {
            Some(matchers) => document
                .child_elements(matchers)
                .filter(|m| document.is_named(*m, "", "matcher"))
                .filter_map(|m| PathMatcher::from_element(document, m))
                .collect(),
            None => config.path_matchers.clone(),
        };

        Ok(Self {
            metadata,
            properties,
            components,
            controls,
            model_documents,
            xhtml,
            xhtml_embedded,
            path_matchers,
            warnings: diagnostics.into_warnings(),
        })
    }
}

/// Where an encoded static state was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// Carried directly by a client request.
    Request,
    /// Read back from a server-side state store.
    Store,
}

/// Either the document the state was built from, or its encoded form once
/// serialized.
#[derive(Debug)]
enum Source {
    Document(Document),
    Encoded(String),
}

pub struct StaticState {
    uuid: String,
    metadata: DocumentMetadata,
    properties: PropertyTable,
    features: FeatureFlags,
    password: Option<String>,
    controls: Document,
    model_documents: Vec<Document>,
    xhtml: Option<Document>,
    path_matchers: Vec<PathMatcher>,
    /// Consumed by the first successful analysis.
    components: Mutex<Option<ComponentRegistry>>,
    source: Mutex<Source>,
    evaluator: Arc<dyn QueryEvaluator>,
    construction_warnings: Vec<AnalysisWarning>,
    modes: OnceLock<(bool, bool)>,
    analyze_lock: Mutex<()>,
    analysis: OnceLock<Analysis>,
}

impl std::fmt::Debug for StaticState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticState")
            .field("uuid", &self.uuid)
            .field("metadata", &self.metadata)
            .field("analyzed", &self.analysis.get().is_some())
            .finish_non_exhaustive()
    }
}

impl StaticState {
    /// Build a static state from a parsed static state document.
    pub fn from_document(
        document: Document,
        xhtml: Option<Document>,
        config: &EngineConfig,
    ) -> Result<Self, AnalysisError> {
        Self::from_document_with(document, xhtml, config, Arc::new(TreeQueryEvaluator))
    }

    pub fn from_document_with(
        document: Document,
        xhtml: Option<Document>,
        config: &EngineConfig,
        evaluator: Arc<dyn QueryEvaluator>,
    ) -> Result<Self, AnalysisError> {
        let split = Split::from_document(&document, xhtml, config)?;
        Ok(Self::assemble(split, Source::Document(document), config, evaluator))
    }

    /// Restore a static state from a token produced by [`StaticState::serialize`].
    ///
    /// With a password configured, a token carried by a request must be
    /// signed; the signature is checked before the document is read.
    pub fn from_encoded(
        encoded: &str,
        origin: TokenOrigin,
        codec: &dyn StateCodec,
        config: &EngineConfig,
    ) -> Result<Self, AnalysisError> {
        let password = match origin {
            TokenOrigin::Request => config.password.as_deref(),
            TokenOrigin::Store => None,
        };
        let document = codec.decode(encoded, password)?;

        let split = Split::from_document(&document, None, config)?;
        Ok(Self::assemble(
            split,
            Source::Encoded(encoded.to_string()),
            config,
            Arc::new(TreeQueryEvaluator),
        ))
    }

    fn assemble(
        split: Split,
        source: Source,
        config: &EngineConfig,
        evaluator: Arc<dyn QueryEvaluator>,
    ) -> Self {
        let mut state = Self {
            uuid: Uuid::new_v4().to_string(),
            metadata: split.metadata,
            properties: split.properties,
            features: config.features,
            password: config.password.clone(),
            controls: split.controls,
            model_documents: split.model_documents,
            xhtml: None,
            path_matchers: split.path_matchers,
            components: Mutex::new(Some(split.components)),
            source: Mutex::new(source),
            evaluator,
            construction_warnings: split.warnings,
            modes: OnceLock::new(),
            analyze_lock: Mutex::new(()),
            analysis: OnceLock::new(),
        };

        // A snapshot supplied by the caller is only kept for noscript mode
        if split.xhtml_embedded || state.is_noscript() {
            state.xhtml = split.xhtml;
        }
        state
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Analysis
    // ───────────────────────────────────────────────────────────────────────────

    /// Run the analysis if it has not run yet. Returns `true` only for the
    /// call that performed it.
    pub fn analyze(&self) -> Result<bool, AnalysisError> {
        self.ensure_analyzed().map(|(_, performed)| performed)
    }

    /// The analysis, running it first if needed.
    pub fn analyzed(&self) -> Result<&Analysis, AnalysisError> {
        self.ensure_analyzed().map(|(analysis, _)| analysis)
    }

    /// The analysis if it already ran.
    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.get()
    }

    pub fn is_analyzed(&self) -> bool {
        self.analysis.get().is_some()
    }

    fn ensure_analyzed(&self) -> Result<(&Analysis, bool), AnalysisError> {
        if let Some(analysis) = self.analysis.get() {
            return Ok((analysis, false));
        }

        let _guard = self.analyze_lock.lock();
        if let Some(analysis) = self.analysis.get() {
            return Ok((analysis, false));
        }

        let started = Instant::now();
        let analysis = self.run_analysis()?;
        tracing::debug!(
            target: "formstate::analysis",
            uuid = %self.uuid,
            controls = analysis.controls.len(),
            models = analysis.models.len(),
            handlers = analysis.events.len(),
            scopes = analysis.scopes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analyzed static state"
        );

        let analysis = self.analysis.get_or_init(|| analysis);
        self.components.lock().take();
        Ok((analysis, true))
    }

    fn run_analysis(&self) -> Result<Analysis, AnalysisError> {
        let evaluator = self.evaluator.as_ref();
        let components = self.components.lock().clone().unwrap_or_default();
        let mut diagnostics = Diagnostics::new();

        let mut scopes = resolve_scopes(&self.controls, components)?;

        let mut models = ModelIndex::new();
        for document in &self.model_documents {
            models.add_model_document(scopes.top_level_scope(), document.clone());
        }
        for (_, shadow) in scopes.shadow_trees() {
            let document = &shadow.document;
            for node in document.descendants(document.root()) {
                if document.is_named(node, ns::XFORMS, "model")
                    && !document.has_ancestor_named(node, ns::XFORMS, "instance")
                    && !shadow.is_outer(node)
                {
                    models.add_model_document(scopes.scope(shadow.inner_scope), document.subtree_document(node));
                }
            }
        }

        let mut controls = ControlTreeBuilder::new(&mut diagnostics).build(&self.controls, &scopes)?;

        extract_scripts(&mut controls, &self.controls, evaluator, |_| String::new());
        for model in models.models() {
            let prefix = scopes.scope(model.scope).full_prefix().to_string();
            extract_scripts(&mut controls, &model.document, evaluator, |_| prefix.clone());
        }
        for (_, shadow) in scopes.shadow_trees() {
            extract_scripts(&mut controls, &shadow.document, evaluator, |node| {
                scopes.scope(shadow.scope_of(node)).full_prefix().to_string()
            });
        }

        let mut events = EventIndex::new();
        {
            let source = ControlSource::new(&self.controls, &scopes);
            index_control_handlers(&mut events, &source, &controls, evaluator);

            let model_documents: Vec<&Document> = models.models().map(|m| &m.document).collect();
            classify_offline(&mut controls, &source, &model_documents, evaluator);

            for model in models.models() {
                index_model_handlers(&mut events, model, &scopes, evaluator);
            }
        }

        scopes.free_transient_state();

        Ok(Analysis {
            scopes,
            models,
            controls,
            events,
            warnings: diagnostics.into_warnings(),
        })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Serialization
    // ───────────────────────────────────────────────────────────────────────────

    /// Encoded form of this static state. The source document is folded
    /// with the XHTML snapshot and the path matchers, encoded once, then
    /// dropped.
    pub fn serialize(&self, codec: &dyn StateCodec) -> Result<String, CodecError> {
        let mut source = self.source.lock();
        let document = match &mut *source {
            Source::Encoded(encoded) => return Ok(encoded.clone()),
            Source::Document(document) => document,
        };

        let root = document.root();
        if let Some(xhtml) = &self.xhtml {
            if document.first_child_named(root, ns::XHTML, "html").is_none() {
                xhtml.copy_subtree(xhtml.root(), document, root);
            }
        }
        if !self.path_matchers.is_empty() && document.first_child_named(root, "", "matchers").is_none() {
            let matchers = document.append_element(root, QName::local("matchers"), Vec::new());
            for matcher in &self.path_matchers {
                matcher.append_to(document, matchers);
            }
        }

        let password = if self.properties.is_client_state_handling() {
            self.password.as_deref()
        } else {
            None
        };
        let encoded = codec.encode(document, password)?;
        tracing::debug!(
            target: "formstate::analysis",
            uuid = %self.uuid,
            size = encoded.len(),
            signed = password.is_some(),
            "serialized static state"
        );

        *source = Source::Encoded(encoded.clone());
        Ok(encoded)
    }

    pub fn is_serialized(&self) -> bool {
        matches!(&*self.source.lock(), Source::Encoded(_))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────────────────

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn controls_document(&self) -> &Document {
        &self.controls
    }

    pub fn model_documents(&self) -> &[Document] {
        &self.model_documents
    }

    pub fn xhtml_document(&self) -> Option<&Document> {
        self.xhtml.as_ref()
    }

    pub fn path_matchers(&self) -> &[PathMatcher] {
        &self.path_matchers
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.property(name)
    }

    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.properties.string_property(name)
    }

    pub fn boolean_property(&self, name: &str) -> Option<bool> {
        self.properties.boolean_property(name)
    }

    pub fn integer_property(&self, name: &str) -> Option<i64> {
        self.properties.integer_property(name)
    }

    pub fn is_client_state_handling(&self) -> bool {
        self.properties.is_client_state_handling()
    }

    fn modes(&self) -> (bool, bool) {
        *self.modes.get_or_init(|| {
            let noscript = self.features.noscript
                && self.boolean_property(NOSCRIPT_PROPERTY).unwrap_or(false)
                && self.boolean_property(NOSCRIPT_SUPPORT_PROPERTY).unwrap_or(false);
            let xpath_analysis =
                self.features.xpath_analysis && self.boolean_property(XPATH_ANALYSIS_PROPERTY).unwrap_or(false);
            (noscript, xpath_analysis)
        })
    }

    pub fn is_noscript(&self) -> bool {
        self.modes().0
    }

    pub fn is_xpath_analysis(&self) -> bool {
        self.modes().1
    }

    /// Element of a control, in the controls document or in a shadow tree.
    pub fn control_element(&self, prefixed_id: &str) -> Option<(&Document, NodeId)> {
        let analysis = self.analysis.get()?;
        let element = analysis.controls.control_element(prefixed_id)?;
        let source = ControlSource::new(&self.controls, &analysis.scopes);
        Some((source.document(element.tree), element.node))
    }

    /// Construction and analysis warnings.
    pub fn warnings(&self) -> Vec<AnalysisWarning> {
        let mut warnings = self.construction_warnings.clone();
        if let Some(analysis) = self.analysis.get() {
            warnings.extend(analysis.warnings.iter().cloned());
        }
        warnings
    }
}
