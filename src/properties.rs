//! # Property Resolution
//!
//! Every tunable of a form is a named, typed property with a compiled-in
//! default. A form can override properties globally (attributes of the
//! `<properties>` element) or on its top-level models (`xxf:*` attributes),
//! and the host can override defaults through [`crate::config::EngineConfig`].
//!
//! The resolved [`PropertyTable`] only stores values that differ from the
//! compiled-in default; lookups fall back to the registry.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::validate::{AnalysisError, Diagnostics, WARN_IGNORED_PROPERTY};

pub const STATE_HANDLING_PROPERTY: &str = "state-handling";
pub const STATE_HANDLING_CLIENT_VALUE: &str = "client";
pub const STATE_HANDLING_SERVER_VALUE: &str = "server";

pub const READONLY_APPEARANCE_PROPERTY: &str = "readonly-appearance";
pub const READONLY_APPEARANCE_STATIC_VALUE: &str = "static";
pub const READONLY_APPEARANCE_DYNAMIC_VALUE: &str = "dynamic";

pub const NOSCRIPT_PROPERTY: &str = "noscript";
pub const NOSCRIPT_SUPPORT_PROPERTY: &str = "noscript-support";
pub const XPATH_ANALYSIS_PROPERTY: &str = "xpath-analysis";
pub const EXTERNAL_EVENTS_PROPERTY: &str = "external-events";
pub const SESSION_HEARTBEAT_PROPERTY: &str = "session-heartbeat";

// ═══════════════════════════════════════════════════════════════════════════════
// VALUES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Boolean,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Integer(_) => PropertyType::Integer,
            Self::String(_) => PropertyType::String,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::String(s) => f.write_str(s),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    pub name: &'static str,
    pub default: PropertyValue,
    /// Closed set of accepted values for enumerated string properties.
    pub allowed: Option<&'static [&'static str]>,
}

impl PropertyDefinition {
    fn new(name: &'static str, default: PropertyValue) -> Self {
        Self {
            name,
            default,
            allowed: None,
        }
    }

    fn enumerated(name: &'static str, default: &str, allowed: &'static [&'static str]) -> Self {
        Self {
            name,
            default: PropertyValue::String(default.to_string()),
            allowed: Some(allowed),
        }
    }

    /// Convert a raw attribute value to the property's type.
    pub fn parse(&self, raw: &str) -> Option<PropertyValue> {
        match self.default.property_type() {
            PropertyType::String => Some(PropertyValue::String(raw.to_string())),
            PropertyType::Boolean => match raw.trim() {
                "true" => Some(PropertyValue::Boolean(true)),
                "false" => Some(PropertyValue::Boolean(false)),
                _ => None,
            },
            PropertyType::Integer => raw.trim().parse().ok().map(PropertyValue::Integer),
        }
    }

    /// Bring a host-supplied value to the property's type.
    fn coerce(&self, value: &PropertyValue) -> Option<PropertyValue> {
        if value.property_type() == self.default.property_type() {
            Some(value.clone())
        } else {
            self.parse(&value.to_string())
        }
    }

    fn accepts(&self, value: &PropertyValue) -> bool {
        match (self.allowed, value) {
            (Some(allowed), PropertyValue::String(s)) => allowed.contains(&s.as_str()),
            (Some(_), _) => false,
            (None, _) => true,
        }
    }
}

lazy_static! {
    static ref PROPERTY_DEFINITIONS: IndexMap<&'static str, PropertyDefinition> = {
        use PropertyValue::{Boolean, Integer};
        let string = |s: &str| PropertyValue::String(s.to_string());

        let definitions = vec![
            PropertyDefinition::enumerated(
                STATE_HANDLING_PROPERTY,
                STATE_HANDLING_SERVER_VALUE,
                &[STATE_HANDLING_CLIENT_VALUE, STATE_HANDLING_SERVER_VALUE],
            ),
            PropertyDefinition::enumerated(
                READONLY_APPEARANCE_PROPERTY,
                READONLY_APPEARANCE_DYNAMIC_VALUE,
                &[READONLY_APPEARANCE_STATIC_VALUE, READONLY_APPEARANCE_DYNAMIC_VALUE],
            ),
            PropertyDefinition::new(NOSCRIPT_PROPERTY, Boolean(false)),
            PropertyDefinition::new(NOSCRIPT_SUPPORT_PROPERTY, Boolean(true)),
            PropertyDefinition::new(XPATH_ANALYSIS_PROPERTY, Boolean(false)),
            PropertyDefinition::new(EXTERNAL_EVENTS_PROPERTY, string("")),
            PropertyDefinition::new(SESSION_HEARTBEAT_PROPERTY, Boolean(true)),
            PropertyDefinition::new("readonly", Boolean(false)),
            PropertyDefinition::new("order", string("label control help alert hint")),
            PropertyDefinition::new("offline", Boolean(false)),
            PropertyDefinition::new("show-error-dialog", Boolean(true)),
            PropertyDefinition::new("show-recoverable-errors", Integer(10)),
            PropertyDefinition::new("delay-before-incremental-request", Integer(500)),
            PropertyDefinition::new("internal-short-delay", Integer(10)),
            PropertyDefinition::new("format.input.date", string("[M]/[D]/[Y]")),
        ];

        definitions.into_iter().map(|d| (d.name, d)).collect()
    };
}

pub fn property_definition(name: &str) -> Option<&'static PropertyDefinition> {
    PROPERTY_DEFINITIONS.get(name)
}

pub fn property_definitions() -> impl Iterator<Item = &'static PropertyDefinition> {
    PROPERTY_DEFINITIONS.values()
}

/// Parse a raw value for a known property. `None` for unknown names or values
/// that do not fit the property's type.
pub fn parse_property(name: &str, raw: &str) -> Option<PropertyValue> {
    property_definition(name)?.parse(raw)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTY TABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Properties declared by a form, as `(name, raw value)` pairs in document order.
#[derive(Debug, Clone, Default)]
pub struct DeclaredProperties {
    pub global: Vec<(String, String)>,
    pub model: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyTable {
    non_default: HashMap<String, PropertyValue>,
    allowed_external_events: HashSet<String>,
}

impl PropertyTable {
    /// Merge document declarations with host configuration and defaults.
    pub fn resolve(
        declared: &DeclaredProperties,
        global_config: &HashMap<String, PropertyValue>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, AnalysisError> {
        let mut non_default: HashMap<String, PropertyValue> = HashMap::new();

        for (name, raw) in &declared.global {
            match parse_property(name, raw) {
                Some(value) => {
                    non_default.insert(name.clone(), value);
                }
                None => diagnostics.warn(
                    WARN_IGNORED_PROPERTY,
                    format!("ignoring global property '{}'", name),
                ),
            }
        }

        // Model-level properties never override a global declaration
        for (name, raw) in &declared.model {
            match parse_property(name, raw) {
                Some(value) => {
                    non_default.entry(name.clone()).or_insert(value);
                }
                None => diagnostics.warn(
                    WARN_IGNORED_PROPERTY,
                    format!("ignoring property '{}' on model element", name),
                ),
            }
        }

        for definition in property_definitions() {
            match non_default.get(definition.name) {
                None => {
                    let global = global_config
                        .get(definition.name)
                        .and_then(|v| definition.coerce(v));
                    if let Some(value) = global {
                        if value != definition.default {
                            non_default.insert(definition.name.to_string(), value);
                        }
                    }
                }
                Some(value) if *value == definition.default => {
                    non_default.remove(definition.name);
                }
                Some(_) => {}
            }
        }

        let mut table = Self {
            non_default,
            allowed_external_events: HashSet::new(),
        };

        for definition in property_definitions().filter(|d| d.allowed.is_some()) {
            if let Some(value) = table.property(definition.name) {
                if !definition.accepts(value) {
                    return Err(AnalysisError::InvalidProperty {
                        property: definition.name.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }

        if let Some(events) = table.string_property(EXTERNAL_EVENTS_PROPERTY) {
            let events: HashSet<String> = events.split_whitespace().map(str::to_string).collect();
            table.allowed_external_events = events;
        }

        Ok(table)
    }

    pub fn non_default_properties(&self) -> &HashMap<String, PropertyValue> {
        &self.non_default
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.non_default
            .get(name)
            .or_else(|| property_definition(name).map(|d| &d.default))
    }

    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(PropertyValue::as_str)
    }

    pub fn boolean_property(&self, name: &str) -> Option<bool> {
        self.property(name).and_then(PropertyValue::as_bool)
    }

    pub fn integer_property(&self, name: &str) -> Option<i64> {
        self.property(name).and_then(PropertyValue::as_integer)
    }

    pub fn allowed_external_events(&self) -> &HashSet<String> {
        &self.allowed_external_events
    }

    pub fn is_client_state_handling(&self) -> bool {
        self.string_property(STATE_HANDLING_PROPERTY) == Some(STATE_HANDLING_CLIENT_VALUE)
    }
}
