//! Engine configuration.
//!
//! Everything the host can tune lives in [`EngineConfig`], loadable from JSON.
//! Services are built from a config value; nothing here is process-global.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::document::{Document, NodeId, QName};
use crate::properties::PropertyValue;

pub const DEFAULT_DOCUMENT_CACHE_NAME: &str = "xforms.cache.documents";
pub const DEFAULT_DOCUMENT_CACHE_SIZE: usize = 10;
pub const DEFAULT_STATIC_STATE_CACHE_SIZE: usize = 50;
pub const DEFAULT_STATE_STORE_SIZE: usize = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Host-level property overrides, applied when a form does not set them.
    pub global_properties: HashMap<String, PropertyValue>,
    pub features: FeatureFlags,
    pub cache: CacheConfig,
    /// Key cached documents by the static state only.
    pub ajax_test: bool,
    /// Signs client-held static state tokens.
    pub password: Option<String>,
    /// Versioned resource paths recorded into every static state.
    pub path_matchers: Vec<PathMatcher>,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_property(mut self, name: &str, value: PropertyValue) -> Self {
        self.global_properties.insert(name.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
    pub noscript: bool,
    pub xpath_analysis: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub cache_document: bool,
    pub document_cache_name: String,
    pub document_cache_size: usize,
    pub static_state_cache_size: usize,
    /// Dynamic states kept by the in-memory persistent store.
    pub state_store_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_document: true,
            document_cache_name: DEFAULT_DOCUMENT_CACHE_NAME.to_string(),
            document_cache_size: DEFAULT_DOCUMENT_CACHE_SIZE,
            static_state_cache_size: DEFAULT_STATIC_STATE_CACHE_SIZE,
            state_store_size: DEFAULT_STATE_STORE_SIZE,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VERSIONED PATHS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMatcher {
    /// Regular expression matched against the full request path.
    pub path_info: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub versioned: bool,
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

impl PartialEq for PathMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.path_info == other.path_info
            && self.mime_type == other.mime_type
            && self.versioned == other.versioned
    }
}

impl PathMatcher {
    pub fn new(path_info: &str, mime_type: Option<&str>, versioned: bool) -> Self {
        Self {
            path_info: path_info.to_string(),
            mime_type: mime_type.map(str::to_string),
            versioned,
            compiled: OnceLock::new(),
        }
    }

    /// Invalid patterns never match.
    pub fn matches(&self, path: &str) -> bool {
        self.compiled
            .get_or_init(|| Regex::new(&format!("^(?:{})$", self.path_info)).ok())
            .as_ref()
            .is_some_and(|re| re.is_match(path))
    }

    /// Append a `<matcher>` element under `parent`.
    pub fn append_to(&self, document: &mut Document, parent: NodeId) {
        let matcher = document.append_element(parent, QName::local("matcher"), Vec::new());
        document.set_attribute(matcher, QName::local("path-info"), &self.path_info);
        if let Some(mime_type) = &self.mime_type {
            document.set_attribute(matcher, QName::local("mime-type"), mime_type);
        }
        document.set_attribute(matcher, QName::local("versioned"), &self.versioned.to_string());
    }

    pub fn from_element(document: &Document, id: NodeId) -> Option<Self> {
        let path_info = document.attr(id, "path-info")?;
        Some(Self::new(
            path_info,
            document.attr(id, "mime-type"),
            document.attr(id, "versioned") == Some("true"),
        ))
    }
}
