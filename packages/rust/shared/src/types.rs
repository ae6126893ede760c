//! Core domain types for page assembly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Request-scoped state threaded through every pipeline stage.
///
/// Replaces process-wide "current language" globals: each render owns one.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Time-sortable identifier used in tracing spans.
    pub request_id: Uuid,
    /// Requested language, if the route carried one.
    pub language: Option<String>,
    /// Site default language, used as the localization fallback.
    pub default_language: String,
}

impl RequestContext {
    /// Context for a render in `language` with the given fallback.
    pub fn new(language: Option<String>, default_language: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            language,
            default_language: default_language.into(),
        }
    }

    /// The language content is rendered in: requested, else the default.
    pub fn effective_language(&self) -> &str {
        self.language.as_deref().unwrap_or(&self.default_language)
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// One entry in a page's module sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Slug-cased discriminant, e.g. `hero-banner`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload fields (everything except the discriminant).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Module {
    /// Build a module from a raw CMS object.
    ///
    /// The discriminant comes from `type` if present, else `_type`, slug-cased.
    /// Returns `None` for non-objects and objects without a type tag.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let raw = match fields.remove("type") {
            Some(Value::String(s)) => s,
            _ => match fields.remove("_type") {
                Some(Value::String(s)) => s,
                _ => return None,
            },
        };
        fields.remove("_type");
        Some(Self {
            kind: slug_case(&raw),
            fields,
        })
    }

    /// Convert back into a plain object with a `type` field.
    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        fields.insert("type".into(), Value::String(self.kind));
        Value::Object(fields)
    }

    /// Document identifier, if the module carries one.
    pub fn id(&self) -> Option<&str> {
        self.fields.get("_id").and_then(Value::as_str)
    }
}

/// Convert a raw type tag to kebab case: `heroBanner` → `hero-banner`.
pub fn slug_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_alphanumeric() {
            out.push(c);
            prev_lower = true;
        } else {
            if !out.ends_with('-') && !out.is_empty() {
                out.push('-');
            }
            prev_lower = false;
        }
    }
    out.trim_end_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// Fetch settlement
// ---------------------------------------------------------------------------

/// Outcome of one orchestrated remote call after the settle-all barrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Settled {
    /// Decoded response body.
    Ok { value: Value },
    /// The call failed or timed out; the message is for logs only.
    Failed { error: String, transient: bool },
}
