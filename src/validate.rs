use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecError;

// ═══════════════════════════════════════════════════════════════════════════════
// INVARIANT CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const INV_MISSING_CONTROL_ID: &str = "FS-ERR-ID-001";
pub const INV_INVALID_PROPERTY: &str = "FS-ERR-PROP-001";
pub const INV_UNRESOLVED_COMPONENT: &str = "FS-ERR-XBL-001";
pub const INV_MISSING_ATTRIBUTE: &str = "FS-ERR-ATTR-001";
pub const INV_MALFORMED_MARKUP: &str = "FS-ERR-MARKUP-001";
pub const INV_CODEC: &str = "FS-ERR-CODEC-001";

pub const WARN_IGNORED_PROPERTY: &str = "FS-WARN-PROP";
pub const WARN_UNRESOLVED_LHHA: &str = "FS-WARN-LHHA";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        INV_MISSING_CONTROL_ID => "Every control carries an id that is unique once prefixed by its scope.",
        INV_INVALID_PROPERTY => "Enumerated properties only take one of their allowed values.",
        INV_UNRESOLVED_COMPONENT => "Every component instance resolves to exactly one binding and template.",
        INV_MISSING_ATTRIBUTE => "Attribute controls name both the element they target and the attribute.",
        INV_MALFORMED_MARKUP => "Analysis only runs on a well-formed document with a root element.",
        INV_CODEC => "A static state token decodes to the document it was encoded from.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANALYSIS ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Structural validation failure. Fatal: no partial static state is exposed.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("Missing mandatory id for element: {element}")]
    MissingControlId { element: String },

    #[error("Invalid xxf:{property} attribute value: {value}")]
    InvalidProperty { property: String, value: String },

    #[error("Unresolvable component reference '{reference}': {reason}")]
    UnresolvedComponent { reference: String, reason: String },

    #[error("Missing attribute '{attribute}' on element: {element}")]
    MissingAttribute { element: String, attribute: String },

    #[error("Malformed markup: {reason}")]
    MalformedMarkup { reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingControlId { .. } => INV_MISSING_CONTROL_ID,
            Self::InvalidProperty { .. } => INV_INVALID_PROPERTY,
            Self::UnresolvedComponent { .. } => INV_UNRESOLVED_COMPONENT,
            Self::MissingAttribute { .. } => INV_MISSING_ATTRIBUTE,
            Self::MalformedMarkup { .. } => INV_MALFORMED_MARKUP,
            Self::Codec(_) => INV_CODEC,
        }
    }

    pub fn guarantee(&self) -> &'static str {
        get_guarantee(self.code())
    }

    pub(crate) fn unresolved_component(reference: &str, reason: &str) -> Self {
        Self::UnresolvedComponent {
            reference: reference.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WARNINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisWarning {
    pub code: &'static str,
    pub message: String,
}

/// Non-fatal findings collected while a static state is built.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<AnalysisWarning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, code: &'static str, message: String) {
        tracing::warn!(target: "formstate::analysis", code, "{}", message);
        self.warnings.push(AnalysisWarning { code, message });
    }

    pub fn warnings(&self) -> &[AnalysisWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<AnalysisWarning> {
        self.warnings
    }
}
